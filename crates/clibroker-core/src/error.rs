//! Error types for the `CliBroker` core library.

use thiserror::Error;

/// Result type alias using the `CliBroker` error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by broker, session and adapter operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying stream failed (closed pipe, bad descriptor, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The input surface reached end of input.
    #[error("Input stream is closed")]
    Closed,

    /// An operation was attempted on a session after it was closed.
    #[error("Session is closed")]
    SessionClosed,

    /// A queued request lost its grant channel before being granted.
    #[error("Access request was abandoned before it was granted")]
    Abandoned,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error marks end of input rather than a failure.
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
