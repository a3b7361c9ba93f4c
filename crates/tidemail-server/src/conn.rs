//! Per-connection command loop.
//!
//! One connection is one strictly sequential loop: greeting, then one
//! command at a time, each fully handled (untagged data first, then
//! exactly one tagged completion) before the next line is read. The
//! wire format has no frame-level concurrency (literals must be
//! consumed in order), so sequential handling is the contract, not a
//! shortcut.

use std::io;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};

use tidemail_proto::numset::{NumSet, Range, SetKind};
use tidemail_proto::wire::{Decoder, Encoder};
use tidemail_proto::{ConnState, ResponseCode, SeqSet, Status, Tag, UidSet};

use crate::sasl::SaslStep;
use crate::session::{MessageSet, Session, StoreMode};
use crate::tracker::{IdleListener, SessionTracker, TrackerUpdate};
use crate::{Error, ResponseError, Result};

const BUFFER_SIZE: usize = 8192;

/// Upper bound on a single command line, to bound memory under a
/// hostile peer.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Upper bound on a single literal, same reasoning.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024;

/// Buffered command reader.
///
/// Unlike response framing, command framing is interactive: a
/// synchronizing literal needs a `+` prompt between its header and its
/// payload, so lines and literals are read separately and the
/// connection assembles the unit.
///
/// The partial-line accumulator lives in the reader, not in the read
/// future: the IDLE loop polls `read_line` inside a `select!`, and a
/// line fragment consumed before the other branch wins must survive the
/// cancelled future. Every consumed byte is in `partial` before the
/// next await point, so cancellation loses nothing.
struct CommandReader<R> {
    reader: BufReader<R>,
    partial: Vec<u8>,
}

impl<R: AsyncRead + Unpin> CommandReader<R> {
    fn new(read: R) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, read),
            partial: Vec::new(),
        }
    }

    /// Reads one CRLF-terminated line, inclusive. `None` means the peer
    /// closed the connection cleanly at a line boundary. Cancel-safe: a
    /// partial line picked up before cancellation is resumed by the next
    /// call.
    async fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                if self.partial.is_empty() {
                    return Ok(None);
                }
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-command",
                )));
            }
            // The CRLF may straddle two fills.
            if self.partial.last() == Some(&b'\r') && buf[0] == b'\n' {
                self.partial.push(b'\n');
                self.reader.consume(1);
                return Ok(Some(std::mem::take(&mut self.partial)));
            }
            if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
                self.partial.extend_from_slice(&buf[..pos + 2]);
                self.reader.consume(pos + 2);
                return Ok(Some(std::mem::take(&mut self.partial)));
            }
            let len = buf.len();
            self.partial.extend_from_slice(buf);
            self.reader.consume(len);
            if self.partial.len() > MAX_LINE_LENGTH {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "command line too long",
                )));
            }
        }
    }

    /// Reads exactly `len` raw literal octets.
    async fn read_literal(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).await?;
        Ok(payload)
    }
}

/// Extracts `(length, nonsync)` if the line ends with `{n}` or `{n+}`
/// immediately before its CRLF.
fn literal_header(line: &[u8]) -> Option<(usize, bool)> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let (line, nonsync) = match line.strip_suffix(b"+") {
        Some(rest) => (rest, true),
        None => (line, false),
    };
    let open = line.iter().rposition(|&b| b == b'{')?;
    let len = std::str::from_utf8(&line[open + 1..]).ok()?.parse().ok()?;
    Some((len, nonsync))
}

/// The write half plus its token encoder. Lines are built synchronously
/// and flushed in batches; only continuation prompts flush eagerly,
/// since the peer is blocked on them.
struct Outbound<W> {
    write: W,
    enc: Encoder,
}

impl<W: AsyncWrite + Unpin> Outbound<W> {
    fn new(write: W) -> Self {
        Self {
            write,
            enc: Encoder::new(),
        }
    }

    async fn flush(&mut self) -> Result<()> {
        let bytes = self.enc.take();
        if !bytes.is_empty() {
            self.write.write_all(&bytes).await?;
            self.write.flush().await?;
        }
        Ok(())
    }

    async fn continue_prompt(&mut self, text: &str) -> Result<()> {
        self.enc.raw(b"+");
        if !text.is_empty() {
            self.enc.sp().raw(text.as_bytes());
        }
        self.enc.crlf();
        self.flush().await
    }

    fn status_rest(&mut self, status: Status, code: Option<&ResponseCode>, text: &str) {
        self.enc.atom(&status.to_string());
        if let Some(code) = code {
            self.enc.sp();
            code.encode(&mut self.enc);
        }
        if !text.is_empty() {
            self.enc.sp().raw(text.as_bytes());
        }
        self.enc.crlf();
    }

    fn untagged_status(&mut self, status: Status, code: Option<&ResponseCode>, text: &str) {
        self.enc.raw(b"* ");
        self.status_rest(status, code, text);
    }

    fn tagged(&mut self, tag: &Tag, status: Status, code: Option<&ResponseCode>, text: &str) {
        self.enc.atom(tag.as_str()).sp();
        self.status_rest(status, code, text);
    }

    fn untagged_num(&mut self, n: u32, keyword: &str) {
        self.enc.raw(b"* ").number(n).sp().atom(keyword).crlf();
    }

    fn flags_line(&mut self, flags: &[String]) {
        self.enc.raw(b"* FLAGS ");
        self.enc.list(flags, |e, flag| {
            e.atom(flag);
        });
        self.enc.crlf();
    }

    fn fetch_line(&mut self, seq: u32, uid: u32, flags: &[String]) {
        self.enc
            .raw(b"* ")
            .number(seq)
            .raw(b" FETCH (UID ")
            .number(uid)
            .raw(b" FLAGS ");
        self.enc.list(flags, |e, flag| {
            e.atom(flag);
        });
        self.enc.raw(b")").crlf();
    }

    fn update(&mut self, update: &TrackerUpdate) {
        match update {
            TrackerUpdate::Expunge(seq) => self.untagged_num(*seq, "EXPUNGE"),
            TrackerUpdate::NumMessages(n) => self.untagged_num(*n, "EXISTS"),
            TrackerUpdate::MailboxFlags(flags) => self.flags_line(flags),
            TrackerUpdate::Fetch { seq, uid, flags } => self.fetch_line(*seq, *uid, flags),
        }
    }
}

struct Selected {
    tracker: SessionTracker,
    read_only: bool,
}

/// What goes on the tagged `OK` line of a successful command.
struct CommandOk {
    code: Option<ResponseCode>,
    text: String,
}

impl CommandOk {
    fn done(name: &str) -> Self {
        Self {
            code: None,
            text: format!("{name} completed"),
        }
    }

    fn with_code(mut self, code: ResponseCode) -> Self {
        self.code = Some(code);
        self
    }
}

fn bad_args() -> Error {
    ResponseError::bad("invalid arguments").into()
}

fn read_only_refusal() -> Error {
    ResponseError::no("mailbox is read-only")
        .with_code(ResponseCode::ReadOnly)
        .into()
}

/// Which states a command keyword is accepted in.
fn valid_in(name: &str, state: ConnState) -> bool {
    match name {
        "CAPABILITY" | "NOOP" | "LOGOUT" => true,
        "LOGIN" | "AUTHENTICATE" => state == ConnState::NotAuthenticated,
        "SELECT" | "EXAMINE" | "APPEND" | "IDLE" => {
            matches!(state, ConnState::Authenticated | ConnState::Selected)
        }
        _ => state == ConnState::Selected,
    }
}

/// Consumes a message-number set (`2:4,7,20:*`) token by token. The
/// grammar lives here rather than in the decoder because `*` is an
/// atom special; returns `None` on malformed input without poisoning
/// the decoder.
fn numset_arg<K: SetKind>(dec: &mut Decoder<'_>) -> Option<NumSet<K>> {
    fn endpoint(dec: &mut Decoder<'_>) -> Option<u32> {
        if dec.special(b'*') {
            return Some(0);
        }
        dec.number().filter(|&n| n != 0)
    }
    let mut set = NumSet::new();
    loop {
        let start = endpoint(dec)?;
        let stop = if dec.special(b':') {
            endpoint(dec)?
        } else {
            start
        };
        set.insert(Range::new(start, stop));
        if !dec.special(b',') {
            return Some(set);
        }
    }
}

/// Rewrites a client-view sequence set into authoritative numbers,
/// dropping positions that no longer exist. `*` resolves against the
/// client's current view of the message count.
fn translate_seq_set(tracker: &SessionTracker, set: &SeqSet) -> SeqSet {
    let max = tracker.client_num_messages();
    let mut out = SeqSet::new();
    for range in set.ranges() {
        let start = if range.start == 0 { max } else { range.start };
        let stop = if range.stop == 0 {
            max
        } else {
            range.stop.min(max)
        };
        for n in start..=stop {
            if n > max {
                break;
            }
            if let Some(authoritative) = tracker.decode_seq_num(n) {
                out.insert_num(authoritative);
            }
        }
    }
    out
}

async fn wait_notified(listener: Option<&IdleListener<'_>>) {
    match listener {
        Some(listener) => listener.notified().await,
        None => std::future::pending().await,
    }
}

/// One server-side connection: the transport, the backend session, and
/// the connection's protocol state.
pub struct Connection<S, B> {
    reader: CommandReader<ReadHalf<S>>,
    out: Outbound<WriteHalf<S>>,
    session: B,
    state: ConnState,
    selected: Option<Selected>,
}

impl<S, B> Connection<S, B>
where
    S: AsyncRead + AsyncWrite + Send,
    B: Session,
{
    /// Wraps a connected stream and its backend session.
    pub fn new(stream: S, session: B) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: CommandReader::new(read),
            out: Outbound::new(write),
            session,
            state: ConnState::NotAuthenticated,
            selected: None,
        }
    }

    /// Drives the connection to completion: greeting, then the command
    /// loop until LOGOUT or the peer disconnects.
    ///
    /// # Errors
    ///
    /// Only transport and framing failures surface here; command-level
    /// problems become tagged `NO`/`BAD` completions.
    pub async fn run(mut self) -> Result<()> {
        self.greet().await?;
        loop {
            let Some(unit) = self.read_command().await? else {
                return Ok(());
            };
            self.handle_unit(&unit).await?;
            if self.state == ConnState::Logout {
                return Ok(());
            }
        }
    }

    async fn greet(&mut self) -> Result<()> {
        let caps = ResponseCode::Capability(self.session.capabilities());
        self.out
            .untagged_status(Status::Ok, Some(&caps), "server ready");
        self.out.flush().await
    }

    /// Reads one full command unit: the line plus every literal its
    /// headers announce, prompting with `+` before each synchronizing
    /// literal's payload.
    async fn read_command(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(mut unit) = self.reader.read_line().await? else {
            return Ok(None);
        };
        loop {
            match literal_header(&unit) {
                Some((len, _)) if len > MAX_LITERAL_SIZE => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "literal too large",
                    )));
                }
                Some((len, nonsync)) => {
                    if !nonsync {
                        self.out.continue_prompt("Ready for literal data").await?;
                    }
                    let payload = self.reader.read_literal(len).await?;
                    unit.extend_from_slice(&payload);
                    let Some(rest) = self.reader.read_line().await? else {
                        return Err(Error::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed mid-command",
                        )));
                    };
                    unit.extend_from_slice(&rest);
                }
                None => return Ok(Some(unit)),
            }
        }
    }

    async fn handle_unit(&mut self, unit: &[u8]) -> Result<()> {
        let mut dec = Decoder::new(unit);
        let tag = dec.expect_tag();
        dec.expect_sp();
        let mut name = dec.expect_atom().to_ascii_uppercase();
        if dec.failed() {
            // Not even a tag and keyword; there is nothing to hang the
            // rejection on.
            self.out
                .untagged_status(Status::Bad, None, "malformed command line");
            return self.out.flush().await;
        }
        let uid = name == "UID";
        if uid {
            dec.expect_sp();
            name = dec.expect_atom().to_ascii_uppercase();
        }

        if !valid_in(&name, self.state) {
            self.out
                .tagged(&tag, Status::Bad, None, "command not valid in this state");
            return self.out.flush().await;
        }

        let outcome = self.dispatch(&name, uid, &mut dec).await;
        // A grammar error anywhere on the line overrides whatever the
        // handler made of the decoder's placeholder values.
        let outcome = match dec.finish() {
            Ok(()) => outcome,
            Err(err) => Err(ResponseError::bad(err.to_string()).into()),
        };

        match outcome {
            Ok(ok) => {
                if name != "LOGOUT" {
                    // Expunges must not renumber messages under a command
                    // that addressed them.
                    let allow_expunge = !matches!(name.as_str(), "FETCH" | "STORE");
                    self.poll_updates(allow_expunge);
                }
                self.out
                    .tagged(&tag, Status::Ok, ok.code.as_ref(), &ok.text);
            }
            Err(Error::Response(refusal)) => {
                self.out
                    .tagged(&tag, refusal.status, refusal.code.as_ref(), &refusal.text);
            }
            Err(err @ (Error::Io(_) | Error::Proto(_))) => return Err(err),
            Err(err) => {
                tracing::error!(command = %name, error = %err, "command handler failed");
                self.out.tagged(
                    &tag,
                    Status::No,
                    Some(&ResponseCode::ServerBug),
                    "internal server error",
                );
            }
        }
        self.out.flush().await
    }

    async fn dispatch(
        &mut self,
        name: &str,
        uid: bool,
        dec: &mut Decoder<'_>,
    ) -> Result<CommandOk> {
        if uid && !matches!(name, "FETCH" | "STORE") {
            return Err(ResponseError::bad("UID applies to FETCH and STORE").into());
        }
        match name {
            "CAPABILITY" => self.cmd_capability(dec),
            "NOOP" => {
                dec.expect_crlf();
                Ok(CommandOk::done("NOOP"))
            }
            "LOGIN" => self.cmd_login(dec).await,
            "AUTHENTICATE" => self.cmd_authenticate(dec).await,
            "LOGOUT" => self.cmd_logout(dec),
            "SELECT" => self.cmd_select(dec, false).await,
            "EXAMINE" => self.cmd_select(dec, true).await,
            "CLOSE" => self.cmd_close(dec).await,
            "FETCH" => self.cmd_fetch(dec, uid).await,
            "STORE" => self.cmd_store(dec, uid).await,
            "EXPUNGE" => self.cmd_expunge(dec).await,
            "APPEND" => self.cmd_append(dec).await,
            "IDLE" => self.cmd_idle(dec).await,
            _ => Err(ResponseError::bad("unknown command").into()),
        }
    }

    fn cmd_capability(&mut self, dec: &mut Decoder<'_>) -> Result<CommandOk> {
        dec.expect_crlf();
        self.out.enc.raw(b"* CAPABILITY");
        for cap in self.session.capabilities() {
            self.out.enc.sp().atom(&cap.to_string());
        }
        self.out.enc.crlf();
        Ok(CommandOk::done("CAPABILITY"))
    }

    async fn cmd_login(&mut self, dec: &mut Decoder<'_>) -> Result<CommandOk> {
        dec.expect_sp();
        let username = dec.expect_string();
        dec.expect_sp();
        let password = dec.expect_string();
        dec.expect_crlf();
        if dec.failed() {
            return Err(bad_args());
        }
        self.session.login(&username, &password).await?;
        self.state = ConnState::Authenticated;
        Ok(CommandOk::done("LOGIN")
            .with_code(ResponseCode::Capability(self.session.capabilities())))
    }

    async fn cmd_authenticate(&mut self, dec: &mut Decoder<'_>) -> Result<CommandOk> {
        dec.expect_sp();
        let mechanism = dec.expect_atom().to_ascii_uppercase();
        let initial = if dec.sp() {
            Some(dec.expect_atom().to_string())
        } else {
            None
        };
        dec.expect_crlf();
        if dec.failed() {
            return Err(bad_args());
        }

        let mut engine = self.session.authenticate(&mechanism)?;
        let mut response = match initial.as_deref() {
            // `=` is the explicit empty initial response.
            Some("=") | None => Vec::new(),
            Some(encoded) => BASE64
                .decode(encoded)
                .map_err(|_| ResponseError::bad("initial response is not base64"))?,
        };
        loop {
            match engine.respond(&response)? {
                SaslStep::Done => break,
                SaslStep::Challenge(challenge) => {
                    self.out.continue_prompt(&BASE64.encode(&challenge)).await?;
                    let Some(line) = self.reader.read_line().await? else {
                        return Err(Error::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed mid-exchange",
                        )));
                    };
                    let trimmed = line.strip_suffix(b"\r\n").unwrap_or(&line);
                    if trimmed == b"*" {
                        return Err(ResponseError::bad("authentication exchange aborted").into());
                    }
                    response = BASE64
                        .decode(trimmed)
                        .map_err(|_| ResponseError::bad("response is not base64"))?;
                }
            }
        }
        self.state = ConnState::Authenticated;
        Ok(CommandOk::done("AUTHENTICATE")
            .with_code(ResponseCode::Capability(self.session.capabilities())))
    }

    fn cmd_logout(&mut self, dec: &mut Decoder<'_>) -> Result<CommandOk> {
        dec.expect_crlf();
        self.selected = None;
        self.state = ConnState::Logout;
        self.out.untagged_status(Status::Bye, None, "logging out");
        Ok(CommandOk::done("LOGOUT"))
    }

    async fn cmd_select(&mut self, dec: &mut Decoder<'_>, read_only: bool) -> Result<CommandOk> {
        dec.expect_sp();
        let mailbox = dec.expect_string();
        dec.expect_crlf();
        if dec.failed() {
            return Err(bad_args());
        }
        // Detach from any previously selected mailbox first.
        self.selected = None;
        let opened = self.session.select(&mailbox, read_only).await?;
        let tracker = opened.tracker.attach();
        let read_only = read_only || opened.read_only;

        self.out.flags_line(&opened.flags);
        self.out
            .untagged_num(opened.tracker.num_messages(), "EXISTS");
        self.out.untagged_status(
            Status::Ok,
            Some(&ResponseCode::UidValidity(opened.uid_validity)),
            "UIDs valid",
        );
        self.out.untagged_status(
            Status::Ok,
            Some(&ResponseCode::UidNext(opened.uid_next)),
            "predicted next UID",
        );

        self.selected = Some(Selected { tracker, read_only });
        self.state = ConnState::Selected;
        let code = if read_only {
            ResponseCode::ReadOnly
        } else {
            ResponseCode::ReadWrite
        };
        let name = if read_only { "EXAMINE" } else { "SELECT" };
        Ok(CommandOk::done(name).with_code(code))
    }

    async fn cmd_close(&mut self, dec: &mut Decoder<'_>) -> Result<CommandOk> {
        dec.expect_crlf();
        self.session.close().await?;
        self.selected = None;
        self.state = ConnState::Authenticated;
        Ok(CommandOk::done("CLOSE"))
    }

    fn selected(&self) -> Result<&Selected> {
        self.selected
            .as_ref()
            .ok_or_else(|| ResponseError::bad("no mailbox selected").into())
    }

    /// Parses a set argument and, for sequence sets, converts the
    /// client's numbering to the authoritative one.
    fn parse_set(&self, dec: &mut Decoder<'_>, uid: bool) -> Result<MessageSet> {
        if uid {
            let set: UidSet = numset_arg(dec).ok_or_else(bad_args)?;
            return Ok(MessageSet::Uid(set));
        }
        let set: SeqSet = numset_arg(dec).ok_or_else(bad_args)?;
        let tracker = &self.selected()?.tracker;
        Ok(MessageSet::Seq(translate_seq_set(tracker, &set)))
    }

    async fn cmd_fetch(&mut self, dec: &mut Decoder<'_>, uid: bool) -> Result<CommandOk> {
        dec.expect_sp();
        let set = self.parse_set(dec, uid)?;
        dec.expect_sp();
        // Item list accepted but not interpreted: UID and FLAGS are what
        // this engine reports.
        let _items = dec.expect_text();
        dec.expect_crlf();
        if dec.failed() {
            return Err(bad_args());
        }
        let views = self.session.fetch(&set).await?;
        let Self { out, selected, .. } = self;
        let Some(sel) = selected.as_ref() else {
            return Err(ResponseError::bad("no mailbox selected").into());
        };
        for view in &views {
            // Report positions in this client's numbering; expunges it
            // has not yet seen are still queued.
            if let Some(seq) = sel.tracker.encode_seq_num(view.seq) {
                out.fetch_line(seq, view.uid, &view.flags);
            }
        }
        Ok(CommandOk::done(if uid { "UID FETCH" } else { "FETCH" }))
    }

    async fn cmd_store(&mut self, dec: &mut Decoder<'_>, uid: bool) -> Result<CommandOk> {
        dec.expect_sp();
        let set = self.parse_set(dec, uid)?;
        dec.expect_sp();
        let action = dec.expect_atom().to_ascii_uppercase();
        dec.expect_sp();
        let mut flags = Vec::new();
        if dec.special(b'(') {
            while let Some(flag) = dec.atom() {
                flags.push(flag.to_string());
                if !dec.sp() {
                    break;
                }
            }
            dec.expect_special(b')');
        } else {
            flags.push(dec.expect_atom().to_string());
            while dec.sp() {
                flags.push(dec.expect_atom().to_string());
            }
        }
        dec.expect_crlf();
        if dec.failed() {
            return Err(bad_args());
        }

        if self.selected()?.read_only {
            return Err(read_only_refusal());
        }
        let mode = match action.trim_end_matches(".SILENT") {
            "FLAGS" => StoreMode::Replace,
            "+FLAGS" => StoreMode::Add,
            "-FLAGS" => StoreMode::Remove,
            _ => return Err(ResponseError::bad("unknown STORE action").into()),
        };
        // Resulting flag state comes back through the tracker queue and
        // is written by the end-of-command poll. The .SILENT forms are
        // accepted; with fan-out delivery the untagged FETCH is sent
        // regardless, which the protocol permits.
        self.session.store(&set, mode, &flags).await?;
        Ok(CommandOk::done(if uid { "UID STORE" } else { "STORE" }))
    }

    async fn cmd_expunge(&mut self, dec: &mut Decoder<'_>) -> Result<CommandOk> {
        dec.expect_crlf();
        if self.selected()?.read_only {
            return Err(read_only_refusal());
        }
        // The backend queues each removal on the tracker; this session's
        // untagged EXPUNGE lines come from the end-of-command poll.
        self.session.expunge().await?;
        Ok(CommandOk::done("EXPUNGE"))
    }

    async fn cmd_append(&mut self, dec: &mut Decoder<'_>) -> Result<CommandOk> {
        dec.expect_sp();
        let mailbox = dec.expect_string();
        dec.expect_sp();
        let mut flags = Vec::new();
        if dec.special(b'(') {
            while let Some(flag) = dec.atom() {
                flags.push(flag.to_string());
                if !dec.sp() {
                    break;
                }
            }
            dec.expect_special(b')');
            dec.expect_sp();
        }
        let message = dec.literal().map(<[u8]>::to_vec);
        dec.expect_crlf();
        if dec.failed() {
            return Err(bad_args());
        }
        let Some(message) = message else {
            return Err(ResponseError::bad("APPEND requires a message literal").into());
        };
        self.session.append(&mailbox, &flags, &message).await?;
        Ok(CommandOk::done("APPEND"))
    }

    async fn cmd_idle(&mut self, dec: &mut Decoder<'_>) -> Result<CommandOk> {
        dec.expect_crlf();
        if dec.failed() {
            return Err(bad_args());
        }
        self.out.continue_prompt("idling").await?;

        let Self {
            reader,
            out,
            selected,
            ..
        } = self;
        let listener = match selected.as_ref() {
            Some(sel) => Some(sel.tracker.start_idle()?),
            None => None,
        };
        loop {
            if let Some(sel) = selected.as_ref() {
                for update in sel.tracker.poll(true) {
                    out.update(&update);
                }
                out.flush().await?;
            }
            let line = tokio::select! {
                line = reader.read_line() => Some(line?),
                () = wait_notified(listener.as_ref()) => None,
            };
            let Some(line) = line else {
                continue;
            };
            let Some(line) = line else {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed during IDLE",
                )));
            };
            let word = line.strip_suffix(b"\r\n").unwrap_or(&line);
            if word.eq_ignore_ascii_case(b"DONE") {
                break;
            }
            return Err(ResponseError::bad("expected DONE to end IDLE").into());
        }
        Ok(CommandOk::done("IDLE"))
    }

    /// Drains this session's tracker queue into untagged responses,
    /// holding back expunges when they would renumber messages under the
    /// command that just ran.
    fn poll_updates(&mut self, allow_expunge: bool) {
        let Some(sel) = self.selected.as_ref() else {
            return;
        };
        for update in sel.tracker.poll(allow_expunge) {
            self.out.update(&update);
        }
    }
}
