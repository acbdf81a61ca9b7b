//! Text sent by the server over the wire.
//!
//! Every message is a single line; the line terminator is added by
//! the connection layer, never here.

/// Sent once to every client as soon as its worker starts running.
pub const GREETING: &str =
    "Connected to Hex Game Server. Type 'exit' to disconnect, 'stop' to stop the server.";

/// Sent to a client that disconnects with `exit`.
pub const FAREWELL: &str = "Goodbye!";

/// Response to `stop`. A worker that delivers this line shuts itself down.
pub const SERVER_STOPPED: &str = "Server stopped";

const ACK_PREFIX: &str = "Server received the request: ";

/// Generic acknowledgment for any request the server does not act on.
pub fn acknowledge(request: &str) -> String {
    format!("{}{}", ACK_PREFIX, request)
}
