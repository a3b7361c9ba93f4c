//! Bracketed response codes.

use std::fmt;

use crate::wire::{Decoder, Encoder};

use super::Capability;

/// Machine-readable code carried inside `[...]` in a status response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// The human text must be shown to the user.
    Alert,
    /// The server supports these capabilities.
    Capability(Vec<Capability>),
    /// Authentication credentials were rejected.
    AuthenticationFailed,
    /// The mailbox is opened read-only.
    ReadOnly,
    /// The mailbox is opened read-write.
    ReadWrite,
    /// The operation could succeed if the target mailbox were created.
    TryCreate,
    /// Next UID the mailbox will assign.
    UidNext(u32),
    /// UID validity epoch of the mailbox.
    UidValidity(u32),
    /// The failure was an internal server error.
    ServerBug,
    /// The command cannot be retried; the failure is permanent.
    Cannot,
    /// The named mailbox does not exist.
    NonExistent,
    /// A code this implementation does not model, kept verbatim.
    Other(String),
}

impl ResponseCode {
    /// Probes for a bracketed response code at the decoder's position.
    ///
    /// Consumes nothing when the next token is not `[`. A malformed code
    /// body is a grammar error on the decoder.
    pub fn decode(dec: &mut Decoder<'_>) -> Option<Self> {
        if !dec.special(b'[') {
            return None;
        }
        let name = dec.expect_atom().to_ascii_uppercase();
        let code = match name.as_str() {
            "ALERT" => Self::Alert,
            "AUTHENTICATIONFAILED" => Self::AuthenticationFailed,
            "READ-ONLY" => Self::ReadOnly,
            "READ-WRITE" => Self::ReadWrite,
            "TRYCREATE" => Self::TryCreate,
            "SERVERBUG" => Self::ServerBug,
            "CANNOT" => Self::Cannot,
            "NONEXISTENT" => Self::NonExistent,
            "UIDNEXT" => {
                dec.expect_sp();
                Self::UidNext(dec.expect_number())
            }
            "UIDVALIDITY" => {
                dec.expect_sp();
                Self::UidValidity(dec.expect_number())
            }
            "CAPABILITY" => {
                let mut caps = Vec::new();
                while dec.sp() {
                    caps.push(Capability::parse(dec.expect_atom()));
                }
                Self::Capability(caps)
            }
            _ => {
                // Keep unmodeled codes (and any arguments) verbatim.
                let mut raw = name;
                while dec.sp() {
                    raw.push(' ');
                    raw.push_str(dec.expect_atom());
                }
                Self::Other(raw)
            }
        };
        dec.expect_special(b']');
        Some(code)
    }

    /// Appends the bracketed form to an encoder.
    pub fn encode(&self, enc: &mut Encoder) {
        enc.atom("[").atom(&self.to_string()).atom("]");
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alert => f.write_str("ALERT"),
            Self::AuthenticationFailed => f.write_str("AUTHENTICATIONFAILED"),
            Self::ReadOnly => f.write_str("READ-ONLY"),
            Self::ReadWrite => f.write_str("READ-WRITE"),
            Self::TryCreate => f.write_str("TRYCREATE"),
            Self::ServerBug => f.write_str("SERVERBUG"),
            Self::Cannot => f.write_str("CANNOT"),
            Self::NonExistent => f.write_str("NONEXISTENT"),
            Self::UidNext(n) => write!(f, "UIDNEXT {n}"),
            Self::UidValidity(n) => write!(f, "UIDVALIDITY {n}"),
            Self::Capability(caps) => {
                f.write_str("CAPABILITY")?;
                for cap in caps {
                    write!(f, " {cap}")?;
                }
                Ok(())
            }
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn decode(input: &[u8]) -> Option<ResponseCode> {
        let mut dec = Decoder::new(input);
        let code = ResponseCode::decode(&mut dec);
        dec.finish().unwrap();
        code
    }

    #[test]
    fn no_bracket_no_consumption() {
        let mut dec = Decoder::new(b"plain text");
        assert!(ResponseCode::decode(&mut dec).is_none());
        assert_eq!(dec.position(), 0);
    }

    #[test]
    fn bare_codes() {
        assert_eq!(decode(b"[ALERT]"), Some(ResponseCode::Alert));
        assert_eq!(decode(b"[READ-ONLY]"), Some(ResponseCode::ReadOnly));
        assert_eq!(decode(b"[TRYCREATE]"), Some(ResponseCode::TryCreate));
    }

    #[test]
    fn numeric_codes() {
        assert_eq!(decode(b"[UIDNEXT 4392]"), Some(ResponseCode::UidNext(4392)));
        assert_eq!(
            decode(b"[UIDVALIDITY 3857529045]"),
            Some(ResponseCode::UidValidity(3_857_529_045))
        );
    }

    #[test]
    fn capability_code() {
        let code = decode(b"[CAPABILITY IMAP4rev2 IDLE]").unwrap();
        assert_eq!(
            code,
            ResponseCode::Capability(vec![Capability::Imap4Rev2, Capability::Idle])
        );
    }

    #[test]
    fn unknown_code_kept_verbatim() {
        assert_eq!(
            decode(b"[XWIDGETS 3 4]"),
            Some(ResponseCode::Other("XWIDGETS 3 4".to_string()))
        );
    }

    #[test]
    fn display_round_trip() {
        for text in ["ALERT", "UIDNEXT 17", "CAPABILITY IMAP4rev2 IDLE"] {
            let input = format!("[{text}]");
            let code = decode(input.as_bytes()).unwrap();
            assert_eq!(code.to_string(), text);
        }
    }
}
