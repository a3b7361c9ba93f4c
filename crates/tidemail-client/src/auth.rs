//! AUTHENTICATE: the SASL challenge/response exchange.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::{AsyncRead, AsyncWrite};

use tidemail_proto::{Capability, ConnState, continuation};

use crate::conn::Client;
use crate::pending::Completion;
use crate::{Error, Result};

/// A SASL mechanism driven from the client side.
///
/// The exchange layer handles base64 framing and the wire protocol; the
/// mechanism only sees decoded challenge and response payloads.
pub trait Authenticator: Send {
    /// Mechanism name as sent in the AUTHENTICATE command.
    fn mechanism(&self) -> &'static str;

    /// Payload sent along with the command when the server supports
    /// `SASL-IR`, avoiding one round trip. `None` means the mechanism
    /// has nothing to say before the first challenge.
    fn initial_response(&mut self) -> Option<Vec<u8>> {
        None
    }

    /// Response to a decoded server challenge.
    ///
    /// # Errors
    ///
    /// Failing here aborts the exchange with `*`.
    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;
}

/// The `PLAIN` mechanism (RFC 4616): authcid and password in one payload.
pub struct Plain {
    username: String,
    password: String,
}

impl Plain {
    /// Creates the mechanism for the given credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    fn payload(&self) -> Vec<u8> {
        format!("\0{}\0{}", self.username, self.password).into_bytes()
    }
}

impl Authenticator for Plain {
    fn mechanism(&self) -> &'static str {
        "PLAIN"
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        Some(self.payload())
    }

    fn respond(&mut self, _challenge: &[u8]) -> Result<Vec<u8>> {
        // Without SASL-IR the server opens with an empty challenge and
        // the whole payload goes here.
        Ok(self.payload())
    }
}

/// The `XOAUTH2` mechanism: user plus OAuth bearer token.
pub struct XOAuth2 {
    user: String,
    access_token: String,
    challenged: bool,
}

impl XOAuth2 {
    /// Creates the mechanism for the given account and token.
    #[must_use]
    pub fn new(user: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            access_token: access_token.into(),
            challenged: false,
        }
    }

    fn payload(&self) -> Vec<u8> {
        format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            self.user, self.access_token
        )
        .into_bytes()
    }
}

impl Authenticator for XOAuth2 {
    fn mechanism(&self) -> &'static str {
        "XOAUTH2"
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        Some(self.payload())
    }

    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        if self.challenged {
            // A second challenge is the JSON error blob; an empty reply
            // makes the server finish with its tagged NO.
            return Ok(Vec::new());
        }
        self.challenged = true;
        if challenge.is_empty() {
            Ok(self.payload())
        } else {
            Ok(Vec::new())
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> Client<S> {
    /// Runs the AUTHENTICATE exchange with the given mechanism.
    ///
    /// Challenge rounds continue until the server issues a tagged
    /// completion. A mechanism error aborts the exchange with the `*`
    /// line, then waits for the server's rejection.
    ///
    /// # Errors
    ///
    /// Surfaces the server's refusal, a mechanism failure, or loss of
    /// the connection.
    pub async fn authenticate(&self, mut auth: impl Authenticator) -> Result<Completion> {
        let mut builder = self.begin("AUTHENTICATE").await?;
        builder.arg_atom(auth.mechanism());
        if self.capabilities().has(&Capability::SaslIr)
            && let Some(ir) = auth.initial_response()
        {
            if ir.is_empty() {
                builder.arg_atom("=");
            } else {
                builder.arg_atom(&BASE64.encode(&ir));
            }
        }
        let (handle, first) = continuation();
        self.shared().registry.push_continuation(handle);
        let (mut pending, mut writer) = builder.end_into_parts().await?;
        let mut request = first;

        loop {
            let wait = request.wait();
            tokio::pin!(wait);
            let challenge_text = tokio::select! {
                // The completion beating the next prompt ends the
                // exchange; our queued expectation is now stale.
                outcome = &mut pending.rx => {
                    self.shared().registry.pop_stale_continuation();
                    drop(writer);
                    return match outcome {
                        Ok(Ok(completion)) => {
                            self.set_state(ConnState::Authenticated);
                            Ok(completion)
                        }
                        Ok(Err(err)) => Err(err),
                        Err(_) => Err(Error::Closed("connection closed".to_string())),
                    };
                }
                text = &mut wait => text?,
            };

            let step = BASE64
                .decode(challenge_text.trim())
                .map_err(|err| Error::Auth(format!("challenge is not base64: {err}")))
                .and_then(|challenge| auth.respond(&challenge));
            match step {
                Ok(reply) => {
                    let (handle, next) = continuation();
                    self.shared().registry.push_continuation(handle);
                    writer.enc().atom(&BASE64.encode(&reply)).crlf();
                    writer.flush().await?;
                    request = next;
                }
                Err(err) => {
                    writer.enc().atom("*").crlf();
                    writer.flush().await?;
                    drop(writer);
                    // The server answers the abort with a tagged BAD/NO.
                    let _ = pending.rx.await;
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::handler::NoopHandler;
    use tidemail_proto::ConnState;

    #[test]
    fn plain_payload_shape() {
        let mut plain = Plain::new("alice", "hunter2");
        let ir = plain.initial_response().unwrap();
        assert_eq!(ir, b"\0alice\0hunter2");
    }

    #[test]
    fn xoauth2_payload_shape() {
        let mut auth = XOAuth2::new("alice@example.org", "ya29.token");
        let ir = auth.initial_response().unwrap();
        assert_eq!(
            ir,
            b"user=alice@example.org\x01auth=Bearer ya29.token\x01\x01"
        );
    }

    #[tokio::test]
    async fn authenticate_with_initial_response() {
        // base64("\0alice\0hunter2")
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev2 AUTH=PLAIN] ready\r\n")
            .write(b"T0000 AUTHENTICATE PLAIN AGFsaWNlAGh1bnRlcjI=\r\n")
            .read(b"T0000 OK authenticated\r\n")
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        client.authenticate(Plain::new("alice", "hunter2")).await.unwrap();
        assert_eq!(client.state(), ConnState::Authenticated);
    }

    #[tokio::test]
    async fn authenticate_without_sasl_ir_uses_a_round() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] ready\r\n")
            .write(b"T0000 AUTHENTICATE PLAIN\r\n")
            .read(b"+\r\n")
            .write(b"AGFsaWNlAGh1bnRlcjI=\r\n")
            .read(b"T0000 OK authenticated\r\n")
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        client.authenticate(Plain::new("alice", "hunter2")).await.unwrap();
    }

    #[tokio::test]
    async fn refusal_surfaces_as_no() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev2 AUTH=PLAIN] ready\r\n")
            .write(b"T0000 AUTHENTICATE PLAIN AGFsaWNlAGh1bnRlcjI=\r\n")
            .read(b"T0000 NO [AUTHENTICATIONFAILED] bad credentials\r\n")
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        let err = client
            .authenticate(Plain::new("alice", "hunter2"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::No(_)));
    }

    #[tokio::test]
    async fn garbage_challenge_aborts_the_exchange() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] ready\r\n")
            .write(b"T0000 AUTHENTICATE PLAIN\r\n")
            .read(b"+ !!not-base64!!\r\n")
            .write(b"*\r\n")
            .read(b"T0000 BAD exchange aborted\r\n")
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        let err = client
            .authenticate(Plain::new("alice", "hunter2"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }
}
