//! Error types for the server.
//!
//! Only `Bind` ever escapes `Server::start`. Per-connection I/O failures
//! end the affected worker and are logged there; a bad port argument is
//! handled in `config` with a warning.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound. Fatal at startup.
    #[error("could not start server on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A socket read, write or close failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
