//! Per-connection pending-command registry.
//!
//! Commands in flight are correlated to their tagged completions here.
//! The registry is an explicit per-connection object (not ambient state)
//! exposing exactly three operations to the connection: register, resolve
//! by tag, and resolve everything with a terminal error on teardown. Each
//! command resolves exactly once.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::oneshot;

use tidemail_proto::{Capability, ContinuationHandle, ResponseCode, Status, Tag, UidSet};

use crate::response::{FetchData, UntaggedResponse};
use crate::{Error, Result};

/// Which untagged data a pending command claims.
///
/// Only one command is ever "the" claimant for a given untagged item: the
/// oldest pending command whose interest matches, with FETCH data further
/// correlated by UID when the command addressed messages by UID.
#[derive(Debug, Clone)]
pub(crate) enum Interest {
    /// Claims nothing.
    None,
    /// Claims `* CAPABILITY` listings.
    Capability,
    /// Claims the mailbox-status burst following SELECT/EXAMINE.
    Select,
    /// Claims `* SEARCH` results.
    Search,
    /// Claims `* n EXPUNGE` lines.
    Expunge,
    /// Claims `* n FETCH` lines; `uids` restricts the claim to responses
    /// whose UID falls in the commanded set.
    Fetch {
        /// UID set for UID-addressed fetches.
        uids: Option<UidSet>,
    },
}

/// Typed payload accumulated from claimed untagged responses.
#[derive(Debug, Clone, Default)]
pub struct CommandData {
    /// Capabilities from a claimed CAPABILITY listing.
    pub capabilities: Vec<Capability>,
    /// Claimed per-message FETCH data.
    pub fetches: Vec<FetchData>,
    /// Claimed SEARCH hits.
    pub search: Vec<u32>,
    /// Claimed EXPUNGE positions, in arrival order.
    pub expunged: Vec<u32>,
    /// Message count from a claimed EXISTS.
    pub exists: Option<u32>,
    /// Mailbox flag list from a claimed FLAGS.
    pub flags: Vec<String>,
    /// UIDVALIDITY from a claimed response code.
    pub uid_validity: Option<u32>,
    /// UIDNEXT from a claimed response code.
    pub uid_next: Option<u32>,
    /// Whether the mailbox was opened read-only.
    pub read_only: bool,
}

/// Terminal outcome of a successfully completed command.
#[derive(Debug)]
pub struct Completion {
    /// Completion status (always a success status; refusals surface as
    /// [`Error::No`] / [`Error::Bad`]).
    pub status: Status,
    /// Response code from the tagged line, if any.
    pub code: Option<ResponseCode>,
    /// Human-readable completion text.
    pub text: String,
    /// Untagged data claimed by this command.
    pub data: CommandData,
}

#[derive(Debug)]
struct Pending {
    tag: Tag,
    interest: Interest,
    data: CommandData,
    done: oneshot::Sender<Result<Completion>>,
}

#[derive(Debug, Default)]
struct Inner {
    pending: Vec<Pending>,
    continuations: VecDeque<ContinuationHandle>,
    closed: Option<String>,
}

/// The registry itself; one per connection.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens if a thread panicked while holding
        // the lock; propagating the panic is the right response.
        #[allow(clippy::unwrap_used)]
        self.inner.lock().unwrap()
    }

    /// Registers a command as pending. Fails once the connection closed.
    pub(crate) fn register(
        &self,
        tag: Tag,
        interest: Interest,
    ) -> Result<oneshot::Receiver<Result<Completion>>> {
        let mut inner = self.lock();
        if let Some(reason) = &inner.closed {
            return Err(Error::Closed(reason.clone()));
        }
        let (done, rx) = oneshot::channel();
        inner.pending.push(Pending {
            tag,
            interest,
            data: CommandData::default(),
            done,
        });
        Ok(rx)
    }

    /// Resolves the pending command matching `tag` with its terminal
    /// outcome. Returns `false` for an unknown tag.
    pub(crate) fn resolve(
        &self,
        tag: &Tag,
        status: Status,
        code: Option<ResponseCode>,
        text: String,
    ) -> bool {
        let mut inner = self.lock();
        let Some(idx) = inner.pending.iter().position(|p| &p.tag == tag) else {
            return false;
        };
        let entry = inner.pending.remove(idx);
        let outcome = match status {
            Status::No => Err(Error::No(text)),
            Status::Bad => Err(Error::Bad(text)),
            Status::Bye => Err(Error::Bye(text)),
            _ => Ok(Completion {
                status,
                code,
                text,
                data: entry.data,
            }),
        };
        let _ = entry.done.send(outcome);
        true
    }

    /// Resolves every pending command and cancels every queued
    /// continuation with a terminal failure. Idempotent.
    pub(crate) fn close(&self, reason: &str) {
        let mut inner = self.lock();
        if inner.closed.is_some() {
            return;
        }
        inner.closed = Some(reason.to_string());
        for entry in inner.pending.drain(..) {
            let _ = entry.done.send(Err(Error::Closed(reason.to_string())));
        }
        for handle in inner.continuations.drain(..) {
            handle.cancel(reason);
        }
    }

    /// Returns the close reason once the connection has been torn down.
    pub(crate) fn closed_reason(&self) -> Option<String> {
        self.lock().closed.clone()
    }

    /// Queues a continuation expectation, oldest first.
    pub(crate) fn push_continuation(&self, handle: ContinuationHandle) {
        self.lock().continuations.push_back(handle);
    }

    /// Takes the oldest queued continuation; called on a `+` prompt.
    pub(crate) fn pop_continuation(&self) -> Option<ContinuationHandle> {
        self.lock().continuations.pop_front()
    }

    /// Removes the most recently queued continuation. Used by an issuer
    /// whose command completed before its prompt arrived, while it still
    /// holds the connection's writer — nothing can have queued after it.
    pub(crate) fn pop_stale_continuation(&self) -> Option<ContinuationHandle> {
        self.lock().continuations.pop_back()
    }

    /// Offers an untagged response to the pending set. Returns the
    /// response back if no pending command claims it, so the caller can
    /// hand it to the unsolicited handler.
    pub(crate) fn offer(&self, resp: UntaggedResponse) -> Option<UntaggedResponse> {
        let mut inner = self.lock();
        match resp {
            UntaggedResponse::Capability(caps) => {
                match find(&mut inner, |i| matches!(i, Interest::Capability)) {
                    Some(p) => {
                        p.data.capabilities = caps;
                        None
                    }
                    None => Some(UntaggedResponse::Capability(caps)),
                }
            }
            UntaggedResponse::Search(hits) => {
                match find(&mut inner, |i| matches!(i, Interest::Search)) {
                    Some(p) => {
                        p.data.search.extend(hits);
                        None
                    }
                    None => Some(UntaggedResponse::Search(hits)),
                }
            }
            UntaggedResponse::Expunge(seq) => {
                match find(&mut inner, |i| matches!(i, Interest::Expunge)) {
                    Some(p) => {
                        p.data.expunged.push(seq);
                        None
                    }
                    None => Some(UntaggedResponse::Expunge(seq)),
                }
            }
            UntaggedResponse::Exists(n) => {
                match find(&mut inner, |i| matches!(i, Interest::Select)) {
                    Some(p) => {
                        p.data.exists = Some(n);
                        None
                    }
                    None => Some(UntaggedResponse::Exists(n)),
                }
            }
            UntaggedResponse::Flags(flags) => {
                match find(&mut inner, |i| matches!(i, Interest::Select)) {
                    Some(p) => {
                        p.data.flags = flags;
                        None
                    }
                    None => Some(UntaggedResponse::Flags(flags)),
                }
            }
            UntaggedResponse::Fetch(data) => {
                let claimant = inner.pending.iter_mut().find(|p| match &p.interest {
                    Interest::Fetch { uids: Some(set) } => {
                        // UID-addressed commands correlate by the UID
                        // carried in the response itself.
                        data.uid.is_some_and(|uid| set.contains(uid))
                    }
                    Interest::Fetch { uids: None } => true,
                    _ => false,
                });
                match claimant {
                    Some(p) => {
                        p.data.fetches.push(data);
                        None
                    }
                    None => Some(UntaggedResponse::Fetch(data)),
                }
            }
            UntaggedResponse::Status { status, code, text } => {
                let claimed = match &code {
                    Some(ResponseCode::UidValidity(n)) => {
                        claim_select(&mut inner, |d| d.uid_validity = Some(*n))
                    }
                    Some(ResponseCode::UidNext(n)) => {
                        claim_select(&mut inner, |d| d.uid_next = Some(*n))
                    }
                    _ => false,
                };
                if claimed {
                    None
                } else {
                    Some(UntaggedResponse::Status { status, code, text })
                }
            }
            other => Some(other),
        }
    }
}

fn find<'a>(inner: &'a mut Inner, matches: impl Fn(&Interest) -> bool) -> Option<&'a mut Pending> {
    inner.pending.iter_mut().find(|p| matches(&p.interest))
}

fn claim_select(inner: &mut Inner, apply: impl FnOnce(&mut CommandData)) -> bool {
    match find(inner, |i| matches!(i, Interest::Select)) {
        Some(p) => {
            apply(&mut p.data);
            true
        }
        None => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_matches_by_tag_not_send_order() {
        let registry = Registry::default();
        let rx1 = registry.register(Tag::new("T1"), Interest::None).unwrap();
        let rx2 = registry.register(Tag::new("T2"), Interest::None).unwrap();

        // The second command completes first.
        assert!(registry.resolve(&Tag::new("T2"), Status::Ok, None, "two".into()));
        assert!(registry.resolve(&Tag::new("T1"), Status::Ok, None, "one".into()));

        assert_eq!(rx1.await.unwrap().unwrap().text, "one");
        assert_eq!(rx2.await.unwrap().unwrap().text, "two");
    }

    #[tokio::test]
    async fn unknown_tag_is_reported() {
        let registry = Registry::default();
        assert!(!registry.resolve(&Tag::new("T9"), Status::Ok, None, String::new()));
    }

    #[tokio::test]
    async fn no_and_bad_become_typed_failures() {
        let registry = Registry::default();
        let rx = registry.register(Tag::new("T1"), Interest::None).unwrap();
        registry.resolve(&Tag::new("T1"), Status::No, None, "denied".into());
        assert!(matches!(rx.await.unwrap(), Err(Error::No(t)) if t == "denied"));
    }

    #[tokio::test]
    async fn close_fails_all_pending_exactly_once() {
        let registry = Registry::default();
        let receivers: Vec<_> = (0..5)
            .map(|i| {
                registry
                    .register(Tag::new(format!("T{i}")), Interest::None)
                    .unwrap()
            })
            .collect();

        registry.close("connection closed");
        registry.close("second close is a no-op");

        for rx in receivers {
            match rx.await.unwrap() {
                Err(Error::Closed(reason)) => assert_eq!(reason, "connection closed"),
                other => panic!("expected Closed, got {other:?}"),
            }
        }
        // New registrations are refused after close.
        assert!(matches!(
            registry.register(Tag::new("T9"), Interest::None),
            Err(Error::Closed(_))
        ));
    }

    #[tokio::test]
    async fn fetch_claims_correlate_by_uid() {
        let registry = Registry::default();
        let uids: UidSet = "100:199".parse().unwrap();
        let rx_uid = registry
            .register(Tag::new("T1"), Interest::Fetch { uids: Some(uids) })
            .unwrap();
        let rx_seq = registry
            .register(Tag::new("T2"), Interest::Fetch { uids: None })
            .unwrap();

        // UID 150 belongs to T1 even though T2 is also pending.
        let claimed = registry.offer(UntaggedResponse::Fetch(FetchData {
            seq: 3,
            uid: Some(150),
            flags: None,
        }));
        assert!(claimed.is_none());

        // UID 500 is outside T1's set; T2 (unrestricted) claims it.
        let claimed = registry.offer(UntaggedResponse::Fetch(FetchData {
            seq: 9,
            uid: Some(500),
            flags: None,
        }));
        assert!(claimed.is_none());

        registry.resolve(&Tag::new("T1"), Status::Ok, None, String::new());
        registry.resolve(&Tag::new("T2"), Status::Ok, None, String::new());

        let one = rx_uid.await.unwrap().unwrap();
        assert_eq!(one.data.fetches.len(), 1);
        assert_eq!(one.data.fetches[0].uid, Some(150));

        let two = rx_seq.await.unwrap().unwrap();
        assert_eq!(two.data.fetches.len(), 1);
        assert_eq!(two.data.fetches[0].uid, Some(500));
    }

    #[tokio::test]
    async fn unclaimed_data_is_returned_for_the_handler() {
        let registry = Registry::default();
        let resp = registry.offer(UntaggedResponse::Exists(7));
        assert_eq!(resp, Some(UntaggedResponse::Exists(7)));
    }
}
