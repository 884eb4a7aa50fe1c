/*!
 * evkv Server Main Entry Point
 *
 * Initializes logging, reads configuration, creates the store and runs the
 * event loop until an unrecoverable error.
 */

use anyhow::Result;
use evkv::*;
use log::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    // RUST_LOG=debug for per-connection tracing
    env_logger::init();

    let config = Config::from_env()?;
    let db = Db::new()?;

    let mut event_loop = EventLoop::create(MioSys::new(), &config, CommandHandler::new(db))?;
    info!("evkv starting on {}", config.addr);

    let res = event_loop.run();
    if let Err(ref e) = res {
        error!("event loop stopped: {:#}", e);
    }
    res
}
