//! Server response model and line-level parsing.

use tidemail_proto::wire::Decoder;
use tidemail_proto::{Capability, ResponseCode, Status, Tag};

use crate::{Error, Result};

/// Message data carried by a FETCH response.
///
/// The engine models the identifying fields (position, UID, flags); other
/// FETCH items are skipped at the grammar level and left to higher layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchData {
    /// 1-based sequence number the data refers to.
    pub seq: u32,
    /// The message's UID, if the response carried one.
    pub uid: Option<u32>,
    /// Flags set on the message, if the response carried them.
    pub flags: Option<Vec<String>>,
}

/// One parsed line from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerResponse {
    /// Tagged completion: terminal outcome for one pending command.
    Tagged {
        /// Tag echoed from the command.
        tag: Tag,
        /// Completion status keyword.
        status: Status,
        /// Optional bracketed response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// Untagged data line.
    Untagged(UntaggedResponse),
    /// Continuation prompt: the peer may proceed with more data.
    Continuation {
        /// Human-readable prompt text.
        text: String,
    },
}

/// Untagged data dispatched by leading keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UntaggedResponse {
    /// `* OK/NO/BAD/BYE/PREAUTH [code] text`.
    Status {
        /// Status keyword.
        status: Status,
        /// Optional bracketed response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* CAPABILITY ...`.
    Capability(Vec<Capability>),
    /// `* n EXISTS`.
    Exists(u32),
    /// `* n EXPUNGE`.
    Expunge(u32),
    /// `* FLAGS (...)`.
    Flags(Vec<String>),
    /// `* n FETCH (...)`.
    Fetch(FetchData),
    /// `* SEARCH n...`.
    Search(Vec<u32>),
    /// A keyword this engine does not model; kept for the unsolicited
    /// handler as raw text.
    Other(String),
}

impl ServerResponse {
    /// Parses one complete framed unit.
    ///
    /// # Errors
    ///
    /// Grammar errors are fatal to the connection; there is no mid-line
    /// resynchronization.
    pub fn parse(unit: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(unit);

        if dec.special(b'+') {
            let text = if dec.sp() {
                dec.expect_text().to_string()
            } else {
                String::new()
            };
            dec.expect_crlf();
            dec.finish()?;
            return Ok(Self::Continuation { text });
        }

        if dec.special(b'*') {
            dec.expect_sp();
            let untagged = parse_untagged(&mut dec)?;
            dec.finish()?;
            return Ok(Self::Untagged(untagged));
        }

        let tag = dec.expect_tag();
        dec.expect_sp();
        let keyword = dec.expect_atom();
        let Some(status) = Status::parse(keyword) else {
            return Err(Error::Protocol(format!(
                "unknown status keyword {keyword:?}"
            )));
        };
        let (code, text) = code_and_text(&mut dec);
        dec.expect_crlf();
        dec.finish()?;
        Ok(Self::Tagged {
            tag,
            status,
            code,
            text,
        })
    }
}

fn code_and_text(dec: &mut Decoder<'_>) -> (Option<ResponseCode>, String) {
    let mut code = None;
    let mut text = String::new();
    if dec.sp() {
        code = ResponseCode::decode(dec);
        if code.is_some() {
            let _ = dec.sp();
        }
        text = dec.expect_text().to_string();
    }
    (code, text)
}

fn parse_untagged(dec: &mut Decoder<'_>) -> Result<UntaggedResponse> {
    // Message-status lines lead with the number: `* 5 EXPUNGE`.
    if let Some(n) = dec.number() {
        dec.expect_sp();
        let keyword = dec.expect_atom().to_ascii_uppercase();
        let resp = match keyword.as_str() {
            "EXISTS" => UntaggedResponse::Exists(n),
            "EXPUNGE" => UntaggedResponse::Expunge(n),
            "FETCH" => {
                dec.expect_sp();
                UntaggedResponse::Fetch(parse_fetch(dec, n))
            }
            _ => UntaggedResponse::Other(format!("{n} {keyword}")),
        };
        if matches!(resp, UntaggedResponse::Other(_)) {
            let _ = dec.expect_text();
        }
        dec.expect_crlf();
        return Ok(resp);
    }

    let keyword = dec.expect_atom().to_ascii_uppercase();
    if let Some(status) = Status::parse(&keyword) {
        let (code, text) = code_and_text(dec);
        dec.expect_crlf();
        return Ok(UntaggedResponse::Status { status, code, text });
    }
    let resp = match keyword.as_str() {
        "CAPABILITY" => {
            let mut caps = Vec::new();
            while dec.sp() {
                caps.push(Capability::parse(dec.expect_atom()));
            }
            UntaggedResponse::Capability(caps)
        }
        "FLAGS" => {
            dec.expect_sp();
            let mut flags = Vec::new();
            dec.expect_list(|d| flags.push(d.expect_atom().to_string()));
            UntaggedResponse::Flags(flags)
        }
        "SEARCH" => {
            let mut hits = Vec::new();
            while dec.sp() {
                hits.push(dec.expect_number());
            }
            UntaggedResponse::Search(hits)
        }
        _ => {
            let mut raw = keyword;
            if dec.sp() {
                raw.push(' ');
                raw.push_str(dec.expect_text());
            }
            UntaggedResponse::Other(raw)
        }
    };
    dec.expect_crlf();
    Ok(resp)
}

/// Parses the FETCH item list, modeling UID and FLAGS and skipping every
/// other item at the grammar level.
fn parse_fetch(dec: &mut Decoder<'_>, seq: u32) -> FetchData {
    let mut data = FetchData {
        seq,
        ..FetchData::default()
    };
    dec.expect_special(b'(');
    if dec.special(b')') {
        return data;
    }
    loop {
        let key = dec.expect_atom().to_ascii_uppercase();
        // Section syntax: `BODY[...]<...>` lexes as atom + `]` + atom.
        if dec.special(b']') {
            let _ = dec.atom();
        }
        dec.expect_sp();
        match key.as_str() {
            "UID" => data.uid = Some(dec.expect_number()),
            "FLAGS" => {
                let mut flags = Vec::new();
                dec.expect_list(|d| flags.push(d.expect_atom().to_string()));
                data.flags = Some(flags);
            }
            _ => skip_value(dec),
        }
        if dec.failed() || dec.special(b')') {
            return data;
        }
        dec.expect_sp();
        if dec.failed() {
            return data;
        }
    }
}

/// Consumes one field value of any shape: string in any form, number,
/// NIL, or an arbitrarily nested parenthesized list.
fn skip_value(dec: &mut Decoder<'_>) {
    if dec.quoted().is_some() || dec.literal().is_some() {
        return;
    }
    if dec.special(b'(') {
        let mut depth = 1usize;
        while depth > 0 && !dec.failed() {
            if dec.special(b'(') {
                depth += 1;
            } else if dec.special(b')') {
                depth -= 1;
            } else if dec.sp()
                || dec.special(b']')
                || dec.quoted().is_some()
                || dec.literal().is_some()
                || dec.atom().is_some()
            {
                // consumed one token, keep going
            } else {
                dec.expect_special(b')');
            }
        }
        return;
    }
    let _ = dec.expect_atom();
}
