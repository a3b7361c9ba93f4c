//! The backend boundary: what the engine asks of mailbox storage.

use std::future::Future;
use std::sync::Arc;

use tidemail_proto::{Capability, SeqSet, UidSet};

use crate::Result;
use crate::sasl::SaslEngine;
use crate::tracker::MailboxTracker;

/// Messages addressed either by current position or by stable
/// identifier. Sequence numbers here are always authoritative; the
/// connection converts the client's view before calling in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSet {
    /// Authoritative 1-based sequence numbers.
    Seq(SeqSet),
    /// Stable UIDs; `*` ranges resolve against the backend's own
    /// highest UID.
    Uid(UidSet),
}

/// The identifying fields of one message, as the engine reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    /// Authoritative 1-based sequence number.
    pub seq: u32,
    /// Stable UID.
    pub uid: u32,
    /// Current flags.
    pub flags: Vec<String>,
}

/// How STORE combines the given flags with a message's current flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Replace the flag list.
    Replace,
    /// Add the given flags.
    Add,
    /// Remove the given flags.
    Remove,
}

/// What the backend hands over when a mailbox is opened.
pub struct SelectedMailbox {
    /// Shared tracker for the mailbox; the connection attaches its own
    /// session to it.
    pub tracker: Arc<MailboxTracker>,
    /// Flags applicable in the mailbox.
    pub flags: Vec<String>,
    /// UID validity epoch.
    pub uid_validity: u32,
    /// Predicted next UID.
    pub uid_next: u32,
    /// Whether changes are refused.
    pub read_only: bool,
}

/// One connection's mailbox backend.
///
/// Storage semantics live entirely behind this trait; the engine only
/// moves protocol. Handlers refuse with
/// [`ResponseError`](crate::ResponseError) (which becomes the tagged
/// `NO`/`BAD` verbatim); any other error is logged server-side and the
/// client sees a generic `NO [SERVERBUG]`.
///
/// A backend that applies a mutation must also queue it on the affected
/// [`MailboxTracker`] so every observer, the mutating connection
/// included, learns of it in order.
pub trait Session: Send {
    /// Capabilities to advertise for the connection's current state.
    fn capabilities(&self) -> Vec<Capability>;

    /// Authenticates with a cleartext username and password.
    fn login(
        &mut self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Begins a SASL exchange for the named mechanism.
    ///
    /// # Errors
    ///
    /// Refusing an unknown mechanism is a
    /// [`ResponseError`](crate::ResponseError) (`NO`).
    fn authenticate(&mut self, mechanism: &str) -> Result<Box<dyn SaslEngine>>;

    /// Opens a mailbox.
    fn select(
        &mut self,
        mailbox: &str,
        read_only: bool,
    ) -> impl Future<Output = Result<SelectedMailbox>> + Send;

    /// Reads the identifying fields of every existing message in the
    /// set, ascending. Addressed messages that do not exist are simply
    /// absent from the result.
    fn fetch(&mut self, set: &MessageSet)
    -> impl Future<Output = Result<Vec<MessageView>>> + Send;

    /// Changes flags on every existing message in the set. The backend
    /// queues the resulting flag state on the mailbox tracker, which is
    /// how the changes reach this and every other observer.
    fn store(
        &mut self,
        set: &MessageSet,
        mode: StoreMode,
        flags: &[String],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Removes all `\Deleted` messages, returning the authoritative
    /// positions expunged (in the order they were applied).
    fn expunge(&mut self) -> impl Future<Output = Result<Vec<u32>>> + Send;

    /// Adds a message to a mailbox.
    fn append(
        &mut self,
        mailbox: &str,
        flags: &[String],
        message: &[u8],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Closes the selected mailbox.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}
