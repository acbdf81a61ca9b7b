//! Configuration for the Hex TCP server.
//!
//! The only runtime input is an optional port argument. Everything
//! else has a fixed default that library callers may override in code.

use tracing::warn;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8099;
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// IP address / interface to bind to (e.g. "0.0.0.0" or "127.0.0.1").
    pub bind_addr: String,

    /// TCP port to listen on. `0` asks the OS for an ephemeral port.
    pub port: u16,

    /// Maximum number of workers serving clients at the same time.
    /// Extra connections are accepted and wait for a free slot.
    pub max_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            port: DEFAULT_PORT,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

impl Config {
    /// Build a `Config` from the raw port argument.
    ///
    /// A missing argument means the default port. An argument that is not
    /// a valid `u16` also falls back to the default, with a warning; it
    /// never fails startup.
    pub fn from_args(port_arg: Option<&str>) -> Self {
        Config {
            port: parse_port(port_arg),
            ..Config::default()
        }
    }

    /// Convenience: `addr:port` socket string.
    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

fn parse_port(arg: Option<&str>) -> u16 {
    match arg {
        None => DEFAULT_PORT,
        Some(raw) => match raw.trim().parse::<u16>() {
            Ok(port) => port,
            Err(e) => {
                warn!(
                    "Invalid port number {:?} ({}). Using default port {}.",
                    raw, e, DEFAULT_PORT
                );
                DEFAULT_PORT
            }
        },
    }
}
