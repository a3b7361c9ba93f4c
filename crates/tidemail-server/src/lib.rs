//! # tidemail-server
//!
//! A sequential IMAP server engine over any async byte stream.
//!
//! [`Connection::run`] drives one connection: greeting, then one command
//! at a time, each answered in full (untagged data, then exactly one
//! tagged completion) before the next is read. Storage lives behind the
//! [`Session`] trait; the engine owns the wire protocol, the connection
//! state table, and the delivery of mailbox changes.
//!
//! Mailbox changes flow through a [`MailboxTracker`]: a backend that
//! applies a mutation queues it there, and every connection observing
//! the mailbox — the mutating one included — drains its own queue into
//! untagged responses at safe points. Because delivery lags mutation,
//! each session carries its own message numbering;
//! [`SessionTracker`] converts between it and the authoritative one.
//!
//! ```no_run
//! use tidemail_server::{Connection, Session};
//!
//! # async fn serve<B: Session + 'static>(backend: B) -> tidemail_server::Result<()> {
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:143").await?;
//! let (stream, _) = listener.accept().await?;
//! Connection::new(stream, backend).run().await?;
//! # Ok(())
//! # }
//! ```

mod conn;
mod error;
mod sasl;
mod session;
pub mod tracker;

pub use conn::Connection;
pub use error::{Error, ResponseError, Result};
pub use sasl::{PlainEngine, SaslEngine, SaslStep};
pub use session::{MessageSet, MessageView, SelectedMailbox, Session, StoreMode};
pub use tracker::{IdleListener, MailboxTracker, SessionTracker, TrackerUpdate};
