//! Canonical token writer.

use bytes::{Bytes, BytesMut};

use super::is_atom_char;

/// How a string value must be rendered on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringForm {
    /// Bare atom.
    Atom,
    /// Double-quoted, `\`-escaped.
    Quoted,
    /// Length-prefixed literal.
    Literal,
}

/// Chooses the wire form for a string value.
///
/// CR, LF, NUL, other control characters, and non-ASCII octets force the
/// literal form (they cannot be escaped inside quoting). Spaces, list
/// delimiters, quotes, and wildcards force the quoted form, as does the
/// empty string. Everything else goes out as a bare atom.
#[must_use]
pub fn string_form(s: &[u8]) -> StringForm {
    if s.iter()
        .any(|&b| b < 0x20 || b >= 0x7F || b == b'\\')
    {
        return StringForm::Literal;
    }
    if s.is_empty()
        || s.iter()
            .any(|&b| !is_atom_char(b) || matches!(b, b'[' | b']'))
    {
        return StringForm::Quoted;
    }
    StringForm::Atom
}

/// Appends grammar primitives in their canonical textual form.
///
/// The encoder buffers into [`BytesMut`]; the connection layer decides when
/// buffered bytes hit the wire, in particular around literal payloads where
/// a continuation handshake may have to happen first.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Appends a bare atom.
    pub fn atom(&mut self, s: &str) -> &mut Self {
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    /// Appends a single space.
    pub fn sp(&mut self) -> &mut Self {
        self.buf.extend_from_slice(b" ");
        self
    }

    /// Appends a CRLF pair.
    pub fn crlf(&mut self) -> &mut Self {
        self.buf.extend_from_slice(b"\r\n");
        self
    }

    /// Appends a decimal number.
    pub fn number(&mut self, n: u32) -> &mut Self {
        self.atom(&n.to_string())
    }

    /// Appends a quoted string, escaping `"` and `\`.
    pub fn quoted(&mut self, s: &str) -> &mut Self {
        self.buf.reserve(s.len() + 2);
        self.buf.extend_from_slice(b"\"");
        for &b in s.as_bytes() {
            if b == b'"' || b == b'\\' {
                self.buf.extend_from_slice(b"\\");
            }
            self.buf.extend_from_slice(&[b]);
        }
        self.buf.extend_from_slice(b"\"");
        self
    }

    /// Appends a literal header `{n}` (or `{n+}` for the
    /// non-synchronizing form). The payload octets follow separately,
    /// after any continuation handshake.
    pub fn literal_header(&mut self, len: usize, nonsync: bool) -> &mut Self {
        self.atom(&format!("{{{len}{}}}", if nonsync { "+" } else { "" }));
        self.crlf()
    }

    /// Appends a complete literal, header and payload, with no handshake.
    /// Suitable for server responses and non-synchronizing sends.
    pub fn literal(&mut self, data: &[u8]) -> &mut Self {
        self.literal_header(data.len(), false);
        self.raw(data)
    }

    /// Appends a string in whichever of the three forms its content
    /// requires. A literal is written in full; senders that must pause for
    /// a continuation before the payload use [`string_form`] and
    /// [`Encoder::literal_header`] directly.
    pub fn string(&mut self, s: &str) -> &mut Self {
        match string_form(s.as_bytes()) {
            StringForm::Atom => self.atom(s),
            StringForm::Quoted => self.quoted(s),
            StringForm::Literal => self.literal(s.as_bytes()),
        }
    }

    /// Appends a parenthesized, space-separated list.
    pub fn list<T>(
        &mut self,
        items: impl IntoIterator<Item = T>,
        mut f: impl FnMut(&mut Self, T),
    ) -> &mut Self {
        self.buf.extend_from_slice(b"(");
        let mut first = true;
        for item in items {
            if !first {
                self.sp();
            }
            f(self, item);
            first = false;
        }
        self.buf.extend_from_slice(b")");
        self
    }

    /// Appends raw octets untouched.
    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    /// Returns the buffered bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Takes the buffered bytes, leaving the encoder empty.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn form_choice() {
        assert_eq!(string_form(b"INBOX"), StringForm::Atom);
        assert_eq!(string_form(b""), StringForm::Quoted);
        assert_eq!(string_form(b"two words"), StringForm::Quoted);
        assert_eq!(string_form(b"a(b)"), StringForm::Quoted);
        assert_eq!(string_form(b"say \"hi\""), StringForm::Quoted);
        assert_eq!(string_form(b"line\r\nbreak"), StringForm::Literal);
        assert_eq!(string_form(b"nul\0byte"), StringForm::Literal);
        assert_eq!(string_form("caf\u{e9}".as_bytes()), StringForm::Literal);
    }

    #[test]
    fn command_line() {
        let mut enc = Encoder::new();
        enc.atom("A001").sp().atom("SELECT").sp().string("INBOX").crlf();
        assert_eq!(enc.bytes(), b"A001 SELECT INBOX\r\n");
    }

    #[test]
    fn quoting_escapes() {
        let mut enc = Encoder::new();
        enc.string("say \"hi\"");
        assert_eq!(enc.bytes(), b"\"say \\\"hi\\\"\"");
    }

    #[test]
    fn literal_round_trip() {
        let mut enc = Encoder::new();
        enc.string("line\r\nbreak");
        assert_eq!(enc.bytes(), b"{11}\r\nline\r\nbreak");

        let mut dec = crate::wire::Decoder::new(enc.bytes());
        assert_eq!(dec.literal().unwrap(), b"line\r\nbreak");
    }

    #[test]
    fn nonsync_literal_header() {
        let mut enc = Encoder::new();
        enc.literal_header(5, true);
        assert_eq!(enc.bytes(), b"{5+}\r\n");
    }

    #[test]
    fn parenthesized_list() {
        let mut enc = Encoder::new();
        enc.list(["\\Seen", "\\Deleted"], |e, item| {
            e.atom(item);
        });
        assert_eq!(enc.bytes(), b"(\\Seen \\Deleted)");
    }

    #[test]
    fn take_resets_buffer() {
        let mut enc = Encoder::new();
        enc.atom("x");
        assert_eq!(&enc.take()[..], b"x");
        assert!(enc.bytes().is_empty());
    }
}
