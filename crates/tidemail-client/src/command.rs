//! Command issuing: tags, the shared writer, and the builder.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{MutexGuard, oneshot};

use tidemail_proto::wire::{Encoder, StringForm, string_form};
use tidemail_proto::{NumSet, SetKind, Tag, continuation};

use crate::conn::Shared;
use crate::pending::{Completion, Interest};
use crate::{Error, Result};

/// Generates strictly increasing per-connection command tags.
#[derive(Debug)]
pub struct TagGenerator {
    counter: AtomicU32,
    prefix: char,
}

impl TagGenerator {
    /// Creates a generator with the given prefix character.
    #[must_use]
    pub const fn new(prefix: char) -> Self {
        Self {
            counter: AtomicU32::new(0),
            prefix,
        }
    }

    /// Returns the next tag.
    #[must_use]
    pub fn next(&self) -> Tag {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Tag::new(format!("{}{:04}", self.prefix, n))
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new('T')
    }
}

/// The write half of a connection plus its token encoder.
///
/// Held under an async mutex: a command owns the writer from `begin` to
/// `end`, so pipelined commands interleave at line granularity, never
/// mid-token.
#[derive(Debug)]
pub(crate) struct Writer<W> {
    half: W,
    enc: Encoder,
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    pub(crate) fn new(half: W) -> Self {
        Self {
            half,
            enc: Encoder::new(),
        }
    }

    pub(crate) fn enc(&mut self) -> &mut Encoder {
        &mut self.enc
    }

    /// Flushes everything buffered in the encoder to the wire.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        let bytes = self.enc.take();
        if !bytes.is_empty() {
            self.half.write_all(&bytes).await?;
            self.half.flush().await?;
        }
        Ok(())
    }
}

/// An in-progress command: `tag SP name` has been issued; the caller
/// appends arguments and finishes with [`CommandBuilder::end`].
pub struct CommandBuilder<'a, W: AsyncWrite + Unpin> {
    shared: Arc<Shared>,
    writer: MutexGuard<'a, Writer<W>>,
    tag: Tag,
    interest: Interest,
}

impl<'a, W: AsyncWrite + Unpin> CommandBuilder<'a, W> {
    pub(crate) fn new(
        shared: Arc<Shared>,
        mut writer: MutexGuard<'a, Writer<W>>,
        tag: Tag,
        name: &str,
    ) -> Self {
        writer.enc().atom(tag.as_str()).sp().atom(name);
        Self {
            shared,
            writer,
            tag,
            interest: Interest::None,
        }
    }

    pub(crate) fn interest(mut self, interest: Interest) -> Self {
        self.interest = interest;
        self
    }

    /// Returns the tag allocated to this command.
    #[must_use]
    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    /// Appends a bare atom argument.
    pub fn arg_atom(&mut self, s: &str) -> &mut Self {
        self.writer.enc().sp().atom(s);
        self
    }

    /// Appends a number-set argument in its text form.
    pub fn arg_numset<K: SetKind>(&mut self, set: &NumSet<K>) -> &mut Self {
        self.writer.enc().sp().atom(&set.to_string());
        self
    }

    /// Appends a parenthesized list of atoms.
    pub fn arg_list(&mut self, items: &[&str]) -> &mut Self {
        self.writer.enc().sp().list(items, |e, item| {
            e.atom(item);
        });
        self
    }

    /// Appends a string argument in whichever wire form its content
    /// requires. A string needing literal form goes through
    /// [`CommandBuilder::arg_literal`] and may suspend for a
    /// continuation.
    ///
    /// # Errors
    ///
    /// Fails if the connection is lost during a continuation wait.
    pub async fn arg_string(&mut self, s: &str) -> Result<&mut Self> {
        match string_form(s.as_bytes()) {
            StringForm::Atom => {
                self.writer.enc().sp().atom(s);
            }
            StringForm::Quoted => {
                self.writer.enc().sp().quoted(s);
            }
            StringForm::Literal => {
                self.arg_literal(s.as_bytes()).await?;
            }
        }
        Ok(self)
    }

    /// Appends a literal argument.
    ///
    /// Unless the peer negotiated non-synchronizing literals, the header
    /// is flushed and the payload waits for the peer's `+` go-ahead.
    ///
    /// # Errors
    ///
    /// Fails if the connection is lost before the go-ahead arrives.
    pub async fn arg_literal(&mut self, data: &[u8]) -> Result<&mut Self> {
        let nonsync = self.shared.capabilities().nonsync_literals(data.len());
        self.writer.enc().sp().literal_header(data.len(), nonsync);
        if !nonsync {
            let (handle, request) = continuation();
            self.shared.registry.push_continuation(handle);
            self.writer.flush().await?;
            request.wait().await?;
        }
        self.writer.enc().raw(data);
        Ok(self)
    }

    /// Terminates the command line, registers it as pending, and flushes.
    ///
    /// The returned [`PendingCommand`] resolves when the tagged
    /// completion arrives; the writer is released immediately, so further
    /// commands may be pipelined before this one completes.
    ///
    /// # Errors
    ///
    /// Fails if the connection has already been torn down.
    pub async fn end(self) -> Result<PendingCommand> {
        let (pending, _writer) = self.end_into_parts().await?;
        Ok(pending)
    }

    /// As [`CommandBuilder::end`], but keeps holding the writer. Used by
    /// commands that continue talking mid-command (IDLE, AUTHENTICATE).
    pub(crate) async fn end_into_parts(
        mut self,
    ) -> Result<(PendingCommand, MutexGuard<'a, Writer<W>>)> {
        self.writer.enc().crlf();
        // Register before the bytes can possibly be answered.
        let rx = self.shared.registry.register(self.tag.clone(), self.interest)?;
        if let Err(err) = self.writer.flush().await {
            self.shared.registry.close(&err.to_string());
            return Err(err);
        }
        let pending = PendingCommand { tag: self.tag, rx };
        Ok((pending, self.writer))
    }
}

/// A command awaiting its tagged completion.
#[derive(Debug)]
pub struct PendingCommand {
    tag: Tag,
    pub(crate) rx: oneshot::Receiver<Result<Completion>>,
}

impl PendingCommand {
    /// Returns the command's tag.
    #[must_use]
    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    /// Waits for the command's terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns the typed failure from a `NO`/`BAD` completion, or
    /// [`Error::Closed`] if the connection was torn down first.
    pub async fn wait(self) -> Result<Completion> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Closed("connection closed".to_string())),
        }
    }
}
