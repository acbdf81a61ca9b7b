//! Mapping from a received command to its response line.

use hex_core::Command;
use tracing::info;

use crate::server::StopHandle;

/// Turns one command line into one response line.
///
/// Implementations must not touch the registry or any connection. The
/// worker that called `process` is still delivering the response, so
/// anything that tears it down has to happen elsewhere.
pub trait CommandProcessor: Send + Sync + 'static {
    fn process(&self, command: &str) -> String;
}

/// The server's own command set: `stop` shuts the server down, anything
/// else is acknowledged.
#[derive(Debug, Clone)]
pub struct ServerCommands {
    stop: StopHandle,
}

impl ServerCommands {
    pub fn new(stop: StopHandle) -> Self {
        Self { stop }
    }
}

impl CommandProcessor for ServerCommands {
    fn process(&self, command: &str) -> String {
        let command = Command::parse(command);
        if command == Command::Stop {
            info!("Stop command received, shutting down server");
            self.stop.stop_in_background();
        }
        command.response()
    }
}
