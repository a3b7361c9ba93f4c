//! Connection lifecycle: greeting, the reader task, and typed commands.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::Mutex;

use tidemail_proto::{
    Capability, CapabilitySet, ConnState, ResponseCode, SeqSet, Status, UidSet,
};

use crate::command::{CommandBuilder, TagGenerator, Writer};
use crate::framed::FramedReader;
use crate::handler::ResponseHandler;
use crate::pending::{Completion, Interest, Registry};
use crate::response::{FetchData, ServerResponse, UntaggedResponse};
use crate::{Error, Result};

/// State shared between the client handle and the reader task.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) registry: Registry,
    caps: StdMutex<CapabilitySet>,
}

impl Shared {
    fn new() -> Self {
        Self {
            registry: Registry::default(),
            caps: StdMutex::new(CapabilitySet::new()),
        }
    }

    /// Snapshot of the most recently advertised capabilities.
    pub(crate) fn capabilities(&self) -> CapabilitySet {
        #[allow(clippy::unwrap_used)]
        self.caps.lock().unwrap().clone()
    }

    fn learn(&self, caps: &[Capability]) {
        #[allow(clippy::unwrap_used)]
        self.caps
            .lock()
            .unwrap()
            .replace(caps.iter().cloned());
    }
}

/// Summary of a mailbox opened with SELECT or EXAMINE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mailbox {
    /// Number of messages in the mailbox.
    pub exists: u32,
    /// Flags applicable in the mailbox.
    pub flags: Vec<String>,
    /// UIDVALIDITY value, if advertised.
    pub uid_validity: Option<u32>,
    /// Predicted next UID, if advertised.
    pub uid_next: Option<u32>,
    /// Whether the mailbox was opened read-only.
    pub read_only: bool,
}

/// A pipelined IMAP client over any async byte stream.
///
/// Commands may be issued concurrently; each runs `begin` to `end` under
/// the writer lock and then awaits its own tagged completion, so several
/// commands can be in flight at once. A background task owns the read
/// half and routes every server line to the right waiter.
#[derive(Debug)]
pub struct Client<S> {
    shared: Arc<Shared>,
    writer: Arc<Mutex<Writer<WriteHalf<S>>>>,
    tags: TagGenerator,
    state: StdMutex<ConnState>,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> Client<S> {
    /// Consumes the connected stream, reads the server greeting, and
    /// spawns the reader task.
    ///
    /// # Errors
    ///
    /// Fails if the greeting is missing, malformed, or a `BYE` refusal.
    pub async fn connect(stream: S, handler: impl ResponseHandler) -> Result<Self> {
        let (read, write) = tokio::io::split(stream);
        let mut reader = FramedReader::new(read);
        let shared = Arc::new(Shared::new());

        let unit = reader.read_unit().await?;
        let state = match ServerResponse::parse(&unit)? {
            ServerResponse::Untagged(UntaggedResponse::Status { status, code, text }) => {
                if let Some(ResponseCode::Capability(caps)) = &code {
                    shared.learn(caps);
                }
                match status {
                    Status::Ok => ConnState::NotAuthenticated,
                    Status::PreAuth => ConnState::Authenticated,
                    Status::Bye => return Err(Error::Bye(text)),
                    Status::No | Status::Bad => {
                        return Err(Error::Protocol(format!("greeting status {status}")));
                    }
                }
            }
            other => {
                return Err(Error::Protocol(format!("unexpected greeting: {other:?}")));
            }
        };

        let handler: Arc<dyn ResponseHandler> = Arc::new(handler);
        tokio::spawn(read_loop(reader, Arc::clone(&shared), handler));

        Ok(Self {
            shared,
            writer: Arc::new(Mutex::new(Writer::new(write))),
            tags: TagGenerator::default(),
            state: StdMutex::new(state),
        })
    }

    /// Connection state as tracked from completed commands.
    #[must_use]
    pub fn state(&self) -> ConnState {
        #[allow(clippy::unwrap_used)]
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: ConnState) {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.state.lock().unwrap();
        *guard = state;
    }

    /// Most recently advertised capability set.
    #[must_use]
    pub fn capabilities(&self) -> CapabilitySet {
        self.shared.capabilities()
    }

    /// Starts a command, taking the writer until [`CommandBuilder::end`].
    ///
    /// # Errors
    ///
    /// Fails immediately once the connection has been torn down.
    pub async fn begin(&self, name: &str) -> Result<CommandBuilder<'_, WriteHalf<S>>> {
        if let Some(reason) = self.shared.registry.closed_reason() {
            return Err(Error::Closed(reason));
        }
        let writer = self.writer.lock().await;
        let tag = self.tags.next();
        Ok(CommandBuilder::new(
            Arc::clone(&self.shared),
            writer,
            tag,
            name,
        ))
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Asks the server for its capability listing.
    ///
    /// # Errors
    ///
    /// Propagates refusal or connection failure.
    pub async fn capability(&self) -> Result<Vec<Capability>> {
        let builder = self.begin("CAPABILITY").await?;
        let pending = builder.interest(Interest::Capability).end().await?;
        let completion = pending.wait().await?;
        self.shared.learn(&completion.data.capabilities);
        Ok(completion.data.capabilities)
    }

    /// Authenticates with LOGIN.
    ///
    /// # Errors
    ///
    /// Fails if the server advertises `LOGINDISABLED` or refuses the
    /// credentials.
    pub async fn login(&self, username: &str, password: &str) -> Result<Completion> {
        if self.capabilities().has(&Capability::LoginDisabled) {
            return Err(Error::Auth("server has disabled LOGIN".to_string()));
        }
        let mut builder = self.begin("LOGIN").await?;
        builder.arg_string(username).await?;
        builder.arg_string(password).await?;
        let completion = builder.end().await?.wait().await?;
        self.set_state(ConnState::Authenticated);
        Ok(completion)
    }

    /// Opens a mailbox read-write.
    ///
    /// # Errors
    ///
    /// Propagates refusal or connection failure.
    pub async fn select(&self, mailbox: &str) -> Result<Mailbox> {
        self.open(mailbox, "SELECT").await
    }

    /// Opens a mailbox read-only.
    ///
    /// # Errors
    ///
    /// Propagates refusal or connection failure.
    pub async fn examine(&self, mailbox: &str) -> Result<Mailbox> {
        self.open(mailbox, "EXAMINE").await
    }

    async fn open(&self, mailbox: &str, command: &str) -> Result<Mailbox> {
        let mut builder = self.begin(command).await?;
        builder.arg_string(mailbox).await?;
        let pending = builder.interest(Interest::Select).end().await?;
        let completion = pending.wait().await?;
        self.set_state(ConnState::Selected);
        let data = completion.data;
        Ok(Mailbox {
            exists: data.exists.unwrap_or(0),
            flags: data.flags,
            uid_validity: data.uid_validity,
            uid_next: data.uid_next,
            read_only: matches!(completion.code, Some(ResponseCode::ReadOnly)),
        })
    }

    /// Fetches UID and flags for messages addressed by sequence number.
    ///
    /// # Errors
    ///
    /// Propagates refusal or connection failure.
    pub async fn fetch(&self, set: &SeqSet) -> Result<Vec<FetchData>> {
        let mut builder = self.begin("FETCH").await?;
        builder.arg_numset(set).arg_atom("(UID FLAGS)");
        let pending = builder.interest(Interest::Fetch { uids: None }).end().await?;
        Ok(pending.wait().await?.data.fetches)
    }

    /// Fetches flags for messages addressed by UID. Responses are
    /// correlated to this command by the UID each one carries, so the
    /// call is safe to pipeline with other fetches.
    ///
    /// # Errors
    ///
    /// Propagates refusal or connection failure.
    pub async fn uid_fetch(&self, set: &UidSet) -> Result<Vec<FetchData>> {
        let mut builder = self.begin("UID").await?;
        builder.arg_atom("FETCH").arg_numset(set).arg_atom("(UID FLAGS)");
        let pending = builder
            .interest(Interest::Fetch {
                uids: Some(set.clone()),
            })
            .end()
            .await?;
        Ok(pending.wait().await?.data.fetches)
    }

    /// Changes flags on the addressed messages. `action` is one of
    /// `FLAGS`, `+FLAGS`, `-FLAGS`, optionally with `.SILENT`.
    ///
    /// # Errors
    ///
    /// Propagates refusal or connection failure.
    pub async fn store(&self, set: &SeqSet, action: &str, flags: &[&str]) -> Result<Vec<FetchData>> {
        let mut builder = self.begin("STORE").await?;
        builder.arg_numset(set).arg_atom(action).arg_list(flags);
        let pending = builder.interest(Interest::Fetch { uids: None }).end().await?;
        Ok(pending.wait().await?.data.fetches)
    }

    /// Searches the selected mailbox with a raw search program.
    ///
    /// # Errors
    ///
    /// Propagates refusal or connection failure.
    pub async fn search(&self, query: &str) -> Result<Vec<u32>> {
        let mut builder = self.begin("SEARCH").await?;
        builder.arg_atom(query);
        let pending = builder.interest(Interest::Search).end().await?;
        Ok(pending.wait().await?.data.search)
    }

    /// Expunges deleted messages, returning the expunged positions in
    /// arrival order.
    ///
    /// # Errors
    ///
    /// Propagates refusal or connection failure.
    pub async fn expunge(&self) -> Result<Vec<u32>> {
        let builder = self.begin("EXPUNGE").await?;
        let pending = builder.interest(Interest::Expunge).end().await?;
        Ok(pending.wait().await?.data.expunged)
    }

    /// Appends a message to a mailbox. The message body goes as a
    /// literal; with LITERAL+ negotiated there is no round trip.
    ///
    /// # Errors
    ///
    /// Propagates refusal or connection failure.
    pub async fn append(&self, mailbox: &str, flags: &[&str], message: &[u8]) -> Result<Completion> {
        let mut builder = self.begin("APPEND").await?;
        builder.arg_string(mailbox).await?;
        if !flags.is_empty() {
            builder.arg_list(flags);
        }
        builder.arg_literal(message).await?;
        builder.end().await?.wait().await
    }

    /// Sends NOOP; any pending unilateral data rides back on it.
    ///
    /// # Errors
    ///
    /// Propagates refusal or connection failure.
    pub async fn noop(&self) -> Result<Completion> {
        self.begin("NOOP").await?.end().await?.wait().await
    }

    /// Ends the session. The server replies `BYE` and closes; pending
    /// commands resolve as the connection tears down.
    ///
    /// # Errors
    ///
    /// Propagates connection failure.
    pub async fn logout(&self) -> Result<()> {
        let pending = self.begin("LOGOUT").await?.end().await?;
        self.set_state(ConnState::Logout);
        match pending.wait().await {
            // The BYE that precedes the OK is expected here.
            Ok(_) | Err(Error::Bye(_) | Error::Closed(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Routes every server line: continuations to the continuation queue,
/// tagged completions to the pending registry, untagged data first to
/// whichever pending command claims it and otherwise to the handler.
async fn read_loop<R: AsyncRead + Unpin + Send + 'static>(
    mut reader: FramedReader<R>,
    shared: Arc<Shared>,
    handler: Arc<dyn ResponseHandler>,
) {
    loop {
        let unit = match reader.read_unit().await {
            Ok(unit) => unit,
            Err(err) => {
                shared.registry.close(&err.to_string());
                return;
            }
        };
        let resp = match ServerResponse::parse(&unit) {
            Ok(resp) => resp,
            Err(err) => {
                tracing::error!(error = %err, "malformed server line");
                shared.registry.close(&err.to_string());
                return;
            }
        };
        match resp {
            ServerResponse::Continuation { text } => {
                match shared.registry.pop_continuation() {
                    Some(handle) => handle.fulfill(text),
                    None => tracing::warn!("continuation prompt with nothing waiting"),
                }
            }
            ServerResponse::Tagged {
                tag,
                status,
                code,
                text,
            } => {
                if let Some(ResponseCode::Capability(caps)) = &code {
                    shared.learn(caps);
                }
                if matches!(code, Some(ResponseCode::Alert)) {
                    handler.on_alert(&text);
                }
                if !shared.registry.resolve(&tag, status, code, text) {
                    tracing::warn!(tag = %tag, "completion for unknown tag");
                }
            }
            ServerResponse::Untagged(untagged) => {
                dispatch_untagged(&shared, handler.as_ref(), untagged);
            }
        }
    }
}

fn dispatch_untagged(shared: &Shared, handler: &dyn ResponseHandler, resp: UntaggedResponse) {
    if let UntaggedResponse::Capability(caps) = &resp {
        shared.learn(caps);
    }
    if let UntaggedResponse::Status { status, code, text } = &resp {
        if let Some(ResponseCode::Capability(caps)) = code {
            shared.learn(caps);
        }
        if matches!(code, Some(ResponseCode::Alert)) {
            handler.on_alert(text);
        }
        if *status == Status::Bye {
            handler.on_bye(text);
            return;
        }
    }
    let Some(unclaimed) = shared.registry.offer(resp) else {
        return;
    };
    match unclaimed {
        UntaggedResponse::Exists(n) => handler.on_exists(n),
        UntaggedResponse::Expunge(seq) => handler.on_expunge(seq),
        UntaggedResponse::Fetch(data) => handler.on_fetch(&data),
        UntaggedResponse::Flags(flags) => handler.on_flags(&flags),
        other => handler.on_untagged(&other),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::handler::NoopHandler;

    #[tokio::test]
    async fn greeting_sets_initial_state() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev2] ready\r\n")
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        assert_eq!(client.state(), ConnState::NotAuthenticated);
        assert!(client.capabilities().has(&Capability::Idle));
    }

    #[tokio::test]
    async fn preauth_greeting_skips_authentication() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* PREAUTH welcome back\r\n")
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        assert_eq!(client.state(), ConnState::Authenticated);
    }

    #[tokio::test]
    async fn bye_greeting_is_refused() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* BYE try later\r\n")
            .build();
        let err = Client::connect(stream, NoopHandler).await.unwrap_err();
        assert!(matches!(err, Error::Bye(text) if text == "try later"));
    }

    #[tokio::test]
    async fn capability_round_trip() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"T0000 CAPABILITY\r\n")
            .read(b"* CAPABILITY IMAP4rev1 LITERAL+\r\nT0000 OK done\r\n")
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        let caps = client.capability().await.unwrap();
        assert_eq!(caps, vec![Capability::Imap4Rev1, Capability::LiteralPlus]);
        assert!(client.capabilities().has(&Capability::LiteralPlus));
    }

    #[tokio::test]
    async fn select_collects_mailbox_summary() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"T0000 SELECT INBOX\r\n")
            .read(
                b"* 17 EXISTS\r\n\
                  * FLAGS (\\Answered \\Seen)\r\n\
                  * OK [UIDVALIDITY 3857529045] UIDs valid\r\n\
                  * OK [UIDNEXT 4392] predicted next UID\r\n\
                  T0000 OK [READ-WRITE] SELECT completed\r\n",
            )
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        let mailbox = client.select("INBOX").await.unwrap();
        assert_eq!(mailbox.exists, 17);
        assert_eq!(mailbox.flags, vec!["\\Answered", "\\Seen"]);
        assert_eq!(mailbox.uid_validity, Some(3_857_529_045));
        assert_eq!(mailbox.uid_next, Some(4392));
        assert!(!mailbox.read_only);
        assert_eq!(client.state(), ConnState::Selected);
    }

    #[tokio::test]
    async fn out_of_order_completions_resolve_by_tag() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"T0000 NOOP\r\n")
            .write(b"T0001 NOOP\r\n")
            .read(b"T0001 OK second\r\nT0000 OK first\r\n")
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        let first = client.begin("NOOP").await.unwrap().end().await.unwrap();
        let second = client.begin("NOOP").await.unwrap().end().await.unwrap();
        // Completions arrive in reverse order; each waiter still gets its
        // own outcome.
        let (r1, r2) = tokio::join!(first.wait(), second.wait());
        assert_eq!(r1.unwrap().text, "first");
        assert_eq!(r2.unwrap().text, "second");
    }

    #[tokio::test]
    async fn login_quotes_credentials() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"T0000 LOGIN alice \"secret pass\"\r\n")
            .read(b"T0000 OK logged in\r\n")
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        client.login("alice", "secret pass").await.unwrap();
        assert_eq!(client.state(), ConnState::Authenticated);
    }

    #[tokio::test]
    async fn append_waits_for_literal_go_ahead() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"T0000 APPEND INBOX {5}\r\n")
            .read(b"+ go ahead\r\n")
            .write(b"hello\r\n")
            .read(b"T0000 OK appended\r\n")
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        client.append("INBOX", &[], b"hello").await.unwrap();
    }

    #[tokio::test]
    async fn append_with_literal_plus_skips_round_trip() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 LITERAL+] ready\r\n")
            .write(b"T0000 APPEND INBOX {5+}\r\nhello\r\n")
            .read(b"T0000 OK appended\r\n")
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        client.append("INBOX", &[], b"hello").await.unwrap();
    }

    #[tokio::test]
    async fn no_completion_surfaces_as_error() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"T0000 SELECT missing\r\n")
            .read(b"T0000 NO [TRYCREATE] no such mailbox\r\n")
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        let err = client.select("missing").await.unwrap_err();
        assert!(matches!(err, Error::No(text) if text == "no such mailbox"));
    }

    #[tokio::test]
    async fn connection_loss_fails_pending_commands() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"T0000 NOOP\r\n")
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        let pending = client.begin("NOOP").await.unwrap().end().await.unwrap();
        let err = pending.wait().await.unwrap_err();
        assert!(matches!(err, Error::Closed(_)));
        // Later commands are refused up front.
        assert!(client.begin("NOOP").await.is_err());
    }

    #[tokio::test]
    async fn uid_fetch_correlates_by_uid() {
        let stream = tokio_test::io::Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"T0000 UID FETCH 100:102 (UID FLAGS)\r\n")
            .read(
                b"* 1 FETCH (UID 100 FLAGS (\\Seen))\r\n\
                  * 3 FETCH (UID 102 FLAGS ())\r\n\
                  T0000 OK done\r\n",
            )
            .build();
        let client = Client::connect(stream, NoopHandler).await.unwrap();
        let set: UidSet = "100:102".parse().unwrap();
        let fetched = client.uid_fetch(&set).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].uid, Some(100));
        assert_eq!(fetched[1].uid, Some(102));
    }
}
