//! Per-session sequence-number virtualization.
//!
//! One [`MailboxTracker`] holds the authoritative view of a mailbox:
//! its message count and every attached observer. Each connection that
//! selects the mailbox attaches a [`SessionTracker`], which queues the
//! mutations that observer has not yet been told about. A mutation is
//! immediately visible to the authoritative numbering but only becomes
//! visible to a session once that session drains the corresponding
//! update, so the two numberings drift apart; [`SessionTracker::decode_seq_num`]
//! and [`SessionTracker::encode_seq_num`] convert between them by
//! walking the still-queued expunges.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::{Error, Result};

/// One unit of replay between the mailbox and a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerUpdate {
    /// Message at this 1-based position was removed; later positions
    /// shift down by one.
    Expunge(u32),
    /// The mailbox grew (or shrank) to this many messages.
    NumMessages(u32),
    /// The mailbox's applicable flag list changed.
    MailboxFlags(Vec<String>),
    /// Per-message data changed, typically flags.
    Fetch {
        /// Authoritative 1-based position at the time of the change.
        seq: u32,
        /// The message's UID.
        uid: u32,
        /// The message's flags after the change.
        flags: Vec<String>,
    },
}

/// Updates not yet delivered to one session, plus the message count as
/// of the last delivery. The count only moves when an update drains, so
/// a session's `*` and upper bound never name a message it has not been
/// told exists.
struct SessionQueue {
    updates: VecDeque<TrackerUpdate>,
    client_count: u32,
}

struct SessionShared {
    queue: Mutex<SessionQueue>,
    notify: Notify,
    idling: AtomicBool,
}

struct MailboxInner {
    num_messages: u32,
    sessions: Vec<Arc<SessionShared>>,
}

/// Authoritative shared state for one mailbox.
///
/// Mutations go through the `queue_*` methods; each one updates the
/// authoritative view and fans the update out to every attached session
/// inside the same critical section, so no observer ever sees a partial
/// fan-out.
pub struct MailboxTracker {
    inner: Mutex<MailboxInner>,
}

impl MailboxTracker {
    /// Creates a tracker for a mailbox currently holding `num_messages`
    /// messages.
    #[must_use]
    pub fn new(num_messages: u32) -> Self {
        Self {
            inner: Mutex::new(MailboxInner {
                num_messages,
                sessions: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MailboxInner> {
        // Poisoning means a panic under the lock; propagate it.
        #[allow(clippy::unwrap_used)]
        self.inner.lock().unwrap()
    }

    /// Current authoritative message count.
    #[must_use]
    pub fn num_messages(&self) -> u32 {
        self.lock().num_messages
    }

    /// Attaches a new observer. The session starts consistent with the
    /// current authoritative view and owns an empty queue.
    #[must_use]
    pub fn attach(self: &Arc<Self>) -> SessionTracker {
        let mut inner = self.lock();
        let shared = Arc::new(SessionShared {
            queue: Mutex::new(SessionQueue {
                updates: VecDeque::new(),
                client_count: inner.num_messages,
            }),
            notify: Notify::new(),
            idling: AtomicBool::new(false),
        });
        inner.sessions.push(Arc::clone(&shared));
        drop(inner);
        SessionTracker {
            mailbox: Arc::clone(self),
            shared,
        }
    }

    fn detach(&self, shared: &Arc<SessionShared>) {
        self.lock()
            .sessions
            .retain(|s| !Arc::ptr_eq(s, shared));
    }

    fn fan_out(inner: &mut MailboxInner, update: &TrackerUpdate) {
        for session in &inner.sessions {
            #[allow(clippy::unwrap_used)]
            session
                .queue
                .lock()
                .unwrap()
                .updates
                .push_back(update.clone());
            session.notify.notify_one();
        }
    }

    /// Applies an expunge at an authoritative 1-based position.
    pub fn queue_expunge(&self, seq: u32) {
        let mut inner = self.lock();
        inner.num_messages = inner.num_messages.saturating_sub(1);
        Self::fan_out(&mut inner, &TrackerUpdate::Expunge(seq));
    }

    /// Records growth (or truncation) to `count` messages.
    pub fn queue_num_messages(&self, count: u32) {
        let mut inner = self.lock();
        inner.num_messages = count;
        Self::fan_out(&mut inner, &TrackerUpdate::NumMessages(count));
    }

    /// Records a change to the mailbox's applicable flags.
    pub fn queue_mailbox_flags(&self, flags: Vec<String>) {
        let mut inner = self.lock();
        Self::fan_out(&mut inner, &TrackerUpdate::MailboxFlags(flags));
    }

    /// Records a per-message change at an authoritative position.
    pub fn queue_fetch(&self, seq: u32, uid: u32, flags: Vec<String>) {
        let mut inner = self.lock();
        Self::fan_out(&mut inner, &TrackerUpdate::Fetch { seq, uid, flags });
    }
}

/// One observer's window onto a [`MailboxTracker`].
///
/// Detaches from the mailbox on drop.
pub struct SessionTracker {
    mailbox: Arc<MailboxTracker>,
    shared: Arc<SessionShared>,
}

impl SessionTracker {
    fn queue(&self) -> MutexGuard<'_, SessionQueue> {
        #[allow(clippy::unwrap_used)]
        self.shared.queue.lock().unwrap()
    }

    /// Drains queued updates in FIFO order.
    ///
    /// With `allow_expunge` false the drain stops at the first queued
    /// expunge, leaving it and everything after it for a later poll:
    /// expunge responses must not be interleaved into another command's
    /// response data, but the updates behind one would renumber
    /// inconsistently if they jumped the queue.
    pub fn poll(&self, allow_expunge: bool) -> Vec<TrackerUpdate> {
        let mut queue = self.queue();
        let mut drained = Vec::new();
        while let Some(front) = queue.updates.front() {
            if !allow_expunge && matches!(front, TrackerUpdate::Expunge(_)) {
                break;
            }
            // front() just returned Some.
            #[allow(clippy::unwrap_used)]
            let update = queue.updates.pop_front().unwrap();
            match &update {
                TrackerUpdate::Expunge(_) => {
                    queue.client_count = queue.client_count.saturating_sub(1);
                }
                TrackerUpdate::NumMessages(count) => queue.client_count = *count,
                TrackerUpdate::MailboxFlags(_) | TrackerUpdate::Fetch { .. } => {}
            }
            drained.push(update);
        }
        drained
    }

    /// Whether any update is queued.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.queue().updates.is_empty()
    }

    /// Converts a client-reported sequence number to the authoritative
    /// numbering by replaying the expunges this session has not yet been
    /// told about. Returns `None` when the number names a message that no
    /// longer exists.
    #[must_use]
    pub fn decode_seq_num(&self, mut seq: u32) -> Option<u32> {
        if seq == 0 {
            return None;
        }
        for update in self.queue().updates.iter() {
            if let TrackerUpdate::Expunge(expunged) = update {
                if seq == *expunged {
                    return None;
                }
                if seq > *expunged {
                    seq -= 1;
                }
            }
        }
        Some(seq)
    }

    /// Converts an authoritative sequence number to this session's view;
    /// the inverse walk of [`SessionTracker::decode_seq_num`]. Returns
    /// `None` when the message sits past the count this session has been
    /// told, such as an append it has not yet seen an EXISTS for.
    #[must_use]
    pub fn encode_seq_num(&self, mut seq: u32) -> Option<u32> {
        if seq == 0 {
            return None;
        }
        let queue = self.queue();
        for update in queue.updates.iter().rev() {
            if let TrackerUpdate::Expunge(expunged) = update
                && seq >= *expunged
            {
                seq += 1;
            }
        }
        if seq > queue.client_count {
            return None;
        }
        Some(seq)
    }

    /// The message count as this session was last told it. Growth queued
    /// by other observers does not show up here until the session drains
    /// the corresponding update.
    #[must_use]
    pub fn client_num_messages(&self) -> u32 {
        self.queue().client_count
    }

    /// Claims the session's single IDLE slot. The returned listener
    /// wakes whenever another observer queues an update here; the slot
    /// frees when the listener drops.
    ///
    /// # Errors
    ///
    /// Fails if an IDLE drain is already running on this session.
    pub fn start_idle(&self) -> Result<IdleListener<'_>> {
        if self
            .shared
            .idling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Tracker(
                "an IDLE drain is already running on this session".to_string(),
            ));
        }
        Ok(IdleListener { session: self })
    }
}

impl Drop for SessionTracker {
    fn drop(&mut self) {
        self.mailbox.detach(&self.shared);
    }
}

/// Exclusive handle for one session's IDLE drain loop.
pub struct IdleListener<'a> {
    session: &'a SessionTracker,
}

impl IdleListener<'_> {
    /// Waits until an update lands in the session's queue. A permit is
    /// stored if the notification raced ahead of this call, so updates
    /// queued just before are not missed.
    pub async fn notified(&self) {
        self.session.shared.notify.notified().await;
    }
}

impl Drop for IdleListener<'_> {
    fn drop(&mut self) {
        self.session.shared.idling.store(false, Ordering::Release);
    }
}
