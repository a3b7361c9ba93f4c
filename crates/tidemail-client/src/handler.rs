//! Application hooks for unsolicited server traffic.

use crate::response::{FetchData, UntaggedResponse};

/// Receives untagged responses that no pending command claimed.
///
/// The reader task invokes these callbacks inline, so implementations
/// should hand heavy work off rather than block response dispatch. All
/// methods default to doing nothing; override the ones the application
/// cares about.
pub trait ResponseHandler: Send + Sync + 'static {
    /// New message count for the selected mailbox.
    fn on_exists(&self, count: u32) {
        let _ = count;
    }

    /// A message was expunged; later sequence numbers shift down by one.
    fn on_expunge(&self, seq: u32) {
        let _ = seq;
    }

    /// Unsolicited per-message data, typically a flag change.
    fn on_fetch(&self, fetch: &FetchData) {
        let _ = fetch;
    }

    /// The selected mailbox's applicable flags changed.
    fn on_flags(&self, flags: &[String]) {
        let _ = flags;
    }

    /// An `ALERT` response code; the text must reach the user.
    fn on_alert(&self, text: &str) {
        let _ = text;
    }

    /// The server announced it is closing the connection.
    fn on_bye(&self, text: &str) {
        let _ = text;
    }

    /// Any other untagged response nobody claimed.
    fn on_untagged(&self, resp: &UntaggedResponse) {
        let _ = resp;
    }
}

/// A handler that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl ResponseHandler for NoopHandler {}
