/*!
 * Server Configuration
 *
 * Defaults match a stock Redis listener. Each field can be overridden from
 * the environment:
 *
 * | variable            | field        |
 * |---------------------|--------------|
 * | `EVKV_ADDR`         | `addr`       |
 * | `EVKV_BACKLOG`      | `backlog`    |
 * | `EVKV_READ_BUFFER`  | `read_buffer`|
 * | `EVKV_MAX_EVENTS`   | `max_events` |
 * | `EVKV_MAX_REQUEST`  | `max_request`|
 * | `EVKV_MAX_OUTPUT`   | `max_output` |
 */

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::str::FromStr;

/// Bytes read from a client per `read` call.
pub const DEFAULT_READ_BUFFER: usize = 2000;

/// Readiness notifications fetched per wait.
pub const DEFAULT_MAX_EVENTS: usize = 128;

/// Largest request a client may send, matching Redis' 512 MiB bulk limit.
pub const DEFAULT_MAX_REQUEST: usize = 512 * 1024 * 1024;

/// Unsent reply bytes tolerated per client before it is disconnected.
pub const DEFAULT_MAX_OUTPUT: usize = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub addr: SocketAddr,
    pub backlog: i32,
    pub read_buffer: usize,
    pub max_events: usize,
    pub max_request: usize,
    pub max_output: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], crate::DEFAULT_PORT)),
            backlog: crate::DEFAULT_BACKLOG,
            read_buffer: DEFAULT_READ_BUFFER,
            max_events: DEFAULT_MAX_EVENTS,
            max_request: DEFAULT_MAX_REQUEST,
            max_output: DEFAULT_MAX_OUTPUT,
        }
    }
}

impl Config {
    /// Defaults overridden by any `EVKV_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup("EVKV_ADDR") {
            config.addr = parse_var("EVKV_ADDR", &v)?;
        }
        if let Some(v) = lookup("EVKV_BACKLOG") {
            config.backlog = parse_var("EVKV_BACKLOG", &v)?;
        }
        if let Some(v) = lookup("EVKV_READ_BUFFER") {
            config.read_buffer = parse_var("EVKV_READ_BUFFER", &v)?;
        }
        if let Some(v) = lookup("EVKV_MAX_EVENTS") {
            config.max_events = parse_var("EVKV_MAX_EVENTS", &v)?;
        }
        if let Some(v) = lookup("EVKV_MAX_REQUEST") {
            config.max_request = parse_var("EVKV_MAX_REQUEST", &v)?;
        }
        if let Some(v) = lookup("EVKV_MAX_OUTPUT") {
            config.max_output = parse_var("EVKV_MAX_OUTPUT", &v)?;
        }
        if config.read_buffer == 0 || config.max_events == 0 || config.max_request == 0 {
            anyhow::bail!(
                "EVKV_READ_BUFFER, EVKV_MAX_EVENTS and EVKV_MAX_REQUEST must be positive"
            );
        }
        Ok(config)
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .with_context(|| format!("invalid {name}={value:?}"))
}
