//! Error types for the server engine.

use thiserror::Error;

use tidemail_proto::{ResponseCode, Status};

/// A typed protocol refusal: carries exactly what goes on the tagged
/// completion line. Non-fatal to the connection.
#[derive(Debug, Error)]
#[error("{status}: {text}")]
pub struct ResponseError {
    /// `NO` or `BAD`.
    pub status: Status,
    /// Optional bracketed response code.
    pub code: Option<ResponseCode>,
    /// Human-readable refusal text.
    pub text: String,
}

impl ResponseError {
    /// An operational refusal (`NO`).
    #[must_use]
    pub fn no(text: impl Into<String>) -> Self {
        Self {
            status: Status::No,
            code: None,
            text: text.into(),
        }
    }

    /// A malformed-command rejection (`BAD`).
    #[must_use]
    pub fn bad(text: impl Into<String>) -> Self {
        Self {
            status: Status::Bad,
            code: None,
            text: text.into(),
        }
    }

    /// Attaches a response code to the completion line.
    #[must_use]
    pub fn with_code(mut self, code: ResponseCode) -> Self {
        self.code = Some(code);
        self
    }
}

/// Errors inside the server engine.
///
/// `Io` and `Proto` are fatal to the connection. `Response` travels from
/// a handler to the tagged completion line. `Backend` never reaches the
/// client verbatim: it is logged and translated to a generic
/// `NO [SERVERBUG]` completion.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O failure on the connection; fatal.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Grammar error while decoding a command; fatal to the connection.
    #[error(transparent)]
    Proto(#[from] tidemail_proto::Error),

    /// A typed refusal destined for the tagged completion line.
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// An unclassified backend failure.
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A tracker misuse, such as two concurrent IDLE drains on one
    /// session.
    #[error("tracker error: {0}")]
    Tracker(String),
}

impl Error {
    /// Wraps an arbitrary backend failure.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Result type alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
