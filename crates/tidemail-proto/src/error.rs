//! Error types for the protocol layer.

use thiserror::Error;

/// Errors produced while encoding or decoding the IMAP grammar.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A token did not match the expected grammar shape.
    ///
    /// Grammar errors are fatal to the connection being decoded; the
    /// protocol has no mid-line resynchronization.
    #[error("parse error at position {position}: {message}")]
    Parse {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// A number-set text form could not be parsed.
    #[error("invalid number set: {0}")]
    NumberSet(String),

    /// A continuation request was cancelled before it was fulfilled.
    #[error("continuation cancelled: {0}")]
    Cancelled(String),
}

/// Result type alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
