//! IDLE: holding the connection open for real-time updates.

use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::MutexGuard;

use tidemail_proto::{Capability, continuation};

use crate::command::{PendingCommand, Writer};
use crate::conn::Client;
use crate::pending::Completion;
use crate::{Error, Result};

impl<S: AsyncRead + AsyncWrite + Send + 'static> Client<S> {
    /// Enters IDLE. The call returns once the server has confirmed with
    /// its continuation prompt; from then on unilateral updates flow to
    /// the connection's [`ResponseHandler`](crate::ResponseHandler) until
    /// [`IdleHandle::done`] is called.
    ///
    /// The handle keeps the writer, so no other command can be issued
    /// while idling; the server would reject one anyway.
    ///
    /// # Errors
    ///
    /// Fails if the server does not advertise IDLE, refuses the command,
    /// or the connection is lost.
    pub async fn idle(&self) -> Result<IdleHandle<'_, S>> {
        if !self.capabilities().has(&Capability::Idle) {
            return Err(Error::Protocol("server does not advertise IDLE".to_string()));
        }
        let builder = self.begin("IDLE").await?;
        let (handle, request) = continuation();
        self.shared().registry.push_continuation(handle);
        let (mut pending, writer) = builder.end_into_parts().await?;

        let confirm = request.wait();
        tokio::pin!(confirm);
        tokio::select! {
            // The completion beating the prompt means the server refused
            // IDLE; our queued expectation is now stale.
            outcome = &mut pending.rx => {
                self.shared().registry.pop_stale_continuation();
                drop(writer);
                return match outcome {
                    Ok(Ok(_)) => Err(Error::Protocol(
                        "IDLE completed without a continuation prompt".to_string(),
                    )),
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(Error::Closed("connection closed".to_string())),
                };
            }
            confirmed = &mut confirm => {
                confirmed?;
            }
        }

        Ok(IdleHandle { pending, writer })
    }
}

/// An IDLE in progress. Dropped without [`IdleHandle::done`], the
/// connection is left inside the IDLE exchange; always finish it.
#[derive(Debug)]
pub struct IdleHandle<'a, S> {
    pending: PendingCommand,
    writer: MutexGuard<'a, Writer<WriteHalf<S>>>,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> IdleHandle<'_, S> {
    /// Ends the IDLE with `DONE` and waits for the tagged completion.
    ///
    /// # Errors
    ///
    /// Propagates refusal or connection failure.
    pub async fn done(mut self) -> Result<Completion> {
        self.writer.enc().atom("DONE").crlf();
        self.writer.flush().await?;
        drop(self.writer);
        self.pending.wait().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::conn::Client;
    use crate::handler::NoopHandler;
    use crate::Error;

    #[tokio::test]
    async fn idle_confirm_update_done() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev2] ready\r\n")
            .write(b"T0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .write(b"DONE\r\n")
            .read(b"* 24 EXISTS\r\nT0000 OK IDLE terminated\r\n")
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        let idle = client.idle().await.unwrap();
        let completion = idle.done().await.unwrap();
        assert_eq!(completion.text, "IDLE terminated");
    }

    #[tokio::test]
    async fn idle_requires_the_capability() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] ready\r\n")
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        assert!(matches!(client.idle().await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn idle_refused_before_prompt() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev2] ready\r\n")
            .write(b"T0000 IDLE\r\n")
            .read(b"T0000 NO not now\r\n")
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        let err = client.idle().await.unwrap_err();
        assert!(matches!(err, Error::No(text) if text == "not now"));
    }
}
