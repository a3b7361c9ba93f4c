//! Continuation-request handshake primitive.
//!
//! Whenever one side must pause mid-command to let the peer react — a
//! synchronizing literal about to be uploaded, a SASL challenge round, an
//! IDLE acknowledgement — the waiting side parks on a
//! [`ContinuationRequest`] and the peer-facing side resolves it through the
//! matching [`ContinuationHandle`]. Exactly one of "fulfilled with text" or
//! "cancelled with error" ever happens, and the waiter observes exactly one
//! event. The single-resolution contract is enforced by the type system:
//! both halves are consumed on use.

use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Creates a linked continuation handle/request pair.
#[must_use]
pub fn continuation() -> (ContinuationHandle, ContinuationRequest) {
    let (tx, rx) = oneshot::channel();
    (ContinuationHandle { tx }, ContinuationRequest { rx })
}

/// The resolving half of a continuation handshake.
///
/// Held by the side that observes the peer's reaction (for a client, the
/// background reader task that sees the `+` prompt line).
#[derive(Debug)]
pub struct ContinuationHandle {
    tx: oneshot::Sender<Result<String>>,
}

impl ContinuationHandle {
    /// Fulfills the request with the prompt's human-readable text.
    pub fn fulfill(self, text: impl Into<String>) {
        // The waiter may have been dropped; that is not an error here.
        let _ = self.tx.send(Ok(text.into()));
    }

    /// Cancels the request; the waiter observes a terminal failure.
    pub fn cancel(self, reason: impl Into<String>) {
        let _ = self.tx.send(Err(Error::Cancelled(reason.into())));
    }
}

/// The waiting half of a continuation handshake.
#[derive(Debug)]
pub struct ContinuationRequest {
    rx: oneshot::Receiver<Result<String>>,
}

impl ContinuationRequest {
    /// Blocks until the peer fulfills or cancels the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the request was cancelled or its
    /// handle was dropped (connection teardown).
    pub async fn wait(self) -> Result<String> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Cancelled("connection closed".into())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fulfilled_with_text() {
        let (handle, request) = continuation();
        handle.fulfill("go ahead");
        assert_eq!(request.wait().await.unwrap(), "go ahead");
    }

    #[tokio::test]
    async fn cancelled_with_error() {
        let (handle, request) = continuation();
        handle.cancel("logout");
        assert!(matches!(request.wait().await, Err(Error::Cancelled(_))));
    }

    #[tokio::test]
    async fn dropped_handle_is_a_cancellation() {
        let (handle, request) = continuation();
        drop(handle);
        assert!(matches!(request.wait().await, Err(Error::Cancelled(_))));
    }

    #[tokio::test]
    async fn fulfilling_without_a_waiter_is_harmless() {
        let (handle, request) = continuation();
        drop(request);
        handle.fulfill("+");
    }
}
