//! Server-side SASL exchange shape.
//!
//! The engine owns the wire protocol (base64 framing, `+` prompts, the
//! `*` abort line); a [`SaslEngine`] sees only decoded payloads.
//! Mechanism cryptography is out of scope here, so the trait is the
//! whole story: backends plug in whatever mechanisms they support.

use crate::{ResponseError, Result};

/// Engine verdict after consuming one client response.
#[derive(Debug, PartialEq, Eq)]
pub enum SaslStep {
    /// Send this payload as a challenge and wait for another response.
    Challenge(Vec<u8>),
    /// The exchange succeeded; the session is authenticated.
    Done,
}

/// One in-progress SASL exchange.
pub trait SaslEngine: Send {
    /// Consumes the client's decoded response. The initial response (or
    /// an empty payload, when the client sent none) arrives through the
    /// same call.
    ///
    /// # Errors
    ///
    /// A refusal becomes the tagged completion for the AUTHENTICATE
    /// command.
    fn respond(&mut self, response: &[u8]) -> Result<SaslStep>;
}

/// The `PLAIN` mechanism against a password-checking closure.
pub struct PlainEngine<F> {
    verify: F,
}

impl<F> PlainEngine<F>
where
    F: FnMut(&str, &str) -> bool + Send,
{
    /// Creates the engine; `verify` receives authcid and password.
    pub fn new(verify: F) -> Self {
        Self { verify }
    }
}

impl<F> SaslEngine for PlainEngine<F>
where
    F: FnMut(&str, &str) -> bool + Send,
{
    fn respond(&mut self, response: &[u8]) -> Result<SaslStep> {
        if response.is_empty() {
            // The client wants a prompt before sending its payload.
            return Ok(SaslStep::Challenge(Vec::new()));
        }
        let text = std::str::from_utf8(response)
            .map_err(|_| ResponseError::bad("PLAIN payload is not UTF-8"))?;
        // authzid NUL authcid NUL password
        let mut parts = text.splitn(3, '\0');
        let (Some(_authzid), Some(authcid), Some(password)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ResponseError::bad("malformed PLAIN payload").into());
        };
        if (self.verify)(authcid, password) {
            Ok(SaslStep::Done)
        } else {
            Err(ResponseError::no("authentication failed")
                .with_code(tidemail_proto::ResponseCode::AuthenticationFailed)
                .into())
        }
    }
}
