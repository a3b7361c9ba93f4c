//! # tidemail-client
//!
//! A pipelined IMAP client engine over any async byte stream.
//!
//! [`Client::connect`] consumes a connected stream, validates the server
//! greeting, and spawns a reader task that owns the read half. Commands
//! are issued through typed helpers or the raw
//! [`CommandBuilder`](command::CommandBuilder); each takes the writer
//! only while its bytes go out, so several commands can be awaiting
//! completions at once. The reader task correlates tagged completions to
//! their issuers, routes claimed untagged data into each command's
//! result, and hands everything unsolicited to the application's
//! [`ResponseHandler`].
//!
//! ```no_run
//! use tidemail_client::{Client, NoopHandler};
//!
//! # async fn run() -> tidemail_client::Result<()> {
//! let stream = tokio::net::TcpStream::connect("mail.example.org:143").await?;
//! let client = Client::connect(stream, NoopHandler).await?;
//! client.login("alice", "hunter2").await?;
//! let mailbox = client.select("INBOX").await?;
//! println!("{} messages", mailbox.exists);
//! client.logout().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod command;
mod conn;
mod error;
mod framed;
pub mod handler;
mod idle;
mod pending;
pub mod response;

pub use auth::{Authenticator, Plain, XOAuth2};
pub use command::PendingCommand;
pub use conn::{Client, Mailbox};
pub use error::{Error, Result};
pub use handler::{NoopHandler, ResponseHandler};
pub use idle::IdleHandle;
pub use pending::{CommandData, Completion};
pub use response::{FetchData, ServerResponse, UntaggedResponse};
