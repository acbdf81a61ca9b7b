//! Classification of a single received line.

use crate::messages;

/// A line received from a client, classified.
///
/// Keywords are matched case-insensitively against the whole line.
/// Anything else is a `Request` and is carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Disconnect this client only.
    Exit,
    /// Stop the whole server.
    Stop,
    /// Any other text.
    Request(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        if line.eq_ignore_ascii_case("exit") {
            Command::Exit
        } else if line.eq_ignore_ascii_case("stop") {
            Command::Stop
        } else {
            Command::Request(line.to_string())
        }
    }

    /// Response line for commands that get one from the processor.
    ///
    /// `Exit` is answered by the worker itself with the farewell.
    pub fn response(&self) -> String {
        match self {
            Command::Exit => messages::FAREWELL.to_string(),
            Command::Stop => messages::SERVER_STOPPED.to_string(),
            Command::Request(text) => messages::acknowledge(text),
        }
    }
}

/// True if `response` tells the worker that delivered it to stop too.
pub fn is_shutdown_ack(response: &str) -> bool {
    response == messages::SERVER_STOPPED
}
