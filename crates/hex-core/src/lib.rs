//! hex-core
//!
//! Pure command logic for the Hex game line server:
//! - command classification (`exit`, `stop`, everything else)
//! - the fixed lifecycle messages sent to clients
//! - response formatting

pub mod command;
pub mod messages;

pub use command::{is_shutdown_ack, Command};
pub use messages::{acknowledge, FAREWELL, GREETING, SERVER_STOPPED};
