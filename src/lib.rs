// Core modules for evkv
pub mod error; // ProtocolError taxonomy
pub mod protocol; // RESP line reader + reply encoders
pub mod command; // Command enum, read_command, CommandHandler
pub mod storage; // Dict + shared Db handle
pub mod expiry; // deferred-delete worker thread
pub mod sys; // Sys capability + MioSys
pub mod net; // EventLoop (server loop)
pub mod config; // Config defaults + EVKV_* overrides

pub use command::*;
pub use config::Config;
pub use error::*;
pub use net::*;
pub use protocol::*;
pub use storage::*;
pub use sys::*;

// Redis-compatible default port, bound on all interfaces
pub const DEFAULT_PORT: u16 = 6379;

// Listen backlog large enough for redis-benchmark's default client count
pub const DEFAULT_BACKLOG: i32 = 50;
