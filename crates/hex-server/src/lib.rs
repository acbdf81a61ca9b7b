//! hex-server
//!
//! Multi-client async TCP line server for the Hex game.

pub mod config;
pub mod error;
pub mod types;
pub mod connection;
pub mod registry;
pub mod processor;
pub mod server;

// these are internal modules, not re-exported
mod pool;
mod worker;

pub use config::Config;
pub use error::{Result, ServerError};
pub use server::{Server, ServerState, StopHandle};
