//! Module with the error types returned when setting up a server.
//!
//! Steady-state per-connection errors are never surfaced through these types:
//! they are logged and contained to the connection they occurred on.

use std::error::Error;
use std::{fmt, io};

/// Error returned when starting an [`HttpServer`].
///
/// [`HttpServer`]: crate::server::HttpServer
#[derive(Debug)]
pub enum ServerError {
    /// Error binding the listening socket.
    Bind(io::Error),
    /// Error setting up the accept loop.
    Accept(io::Error),
    /// Error starting a worker thread or its event loop.
    Worker(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ServerError::*;
        match self {
            Bind(err) => write!(f, "error binding listening socket: {err}"),
            Accept(err) => write!(f, "error setting up accept loop: {err}"),
            Worker(err) => write!(f, "error starting worker: {err}"),
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        use ServerError::*;
        match self {
            Bind(err) | Accept(err) | Worker(err) => Some(err),
        }
    }
}
