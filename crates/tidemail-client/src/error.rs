//! Error types for the client engine.

use thiserror::Error;

/// Errors surfaced to command issuers.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O failure on the connection; fatal.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Grammar error while decoding a server line; fatal to the connection.
    #[error(transparent)]
    Proto(#[from] tidemail_proto::Error),

    /// The server refused the command (`NO` completion).
    #[error("server returned NO: {0}")]
    No(String),

    /// The server rejected the command as malformed (`BAD` completion).
    #[error("server returned BAD: {0}")]
    Bad(String),

    /// The server announced it is closing the connection.
    #[error("server sent BYE: {0}")]
    Bye(String),

    /// The connection was torn down while the command was pending.
    #[error("connection closed: {0}")]
    Closed(String),

    /// The peer violated the protocol in a way the grammar cannot express.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The SASL exchange failed locally before completion.
    #[error("authentication exchange failed: {0}")]
    Auth(String),
}

/// Result type alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
