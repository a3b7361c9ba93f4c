//! Sticky-error token decoder.

use std::str;

use crate::error::{Error, Result};
use crate::types::Tag;

use super::is_atom_char;

/// Token decoder over one framed protocol unit.
///
/// Every decode operation has the shape "try to consume token X; on failure
/// consume nothing", so callers can probe for one of several possible next
/// tokens without lookahead. The `expect_*` duals record a **sticky first
/// error**: once any of them fails, all subsequent calls short-circuit and
/// return placeholder values, letting grammar code read as a flat sequence
/// of expects with a single [`Decoder::finish`] check at the end.
#[derive(Debug)]
pub struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
    err: Option<Error>,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over a complete framed unit.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            err: None,
        }
    }

    /// Returns the current byte position.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Returns `true` if a decode error has been recorded.
    #[must_use]
    pub const fn failed(&self) -> bool {
        self.err.is_some()
    }

    /// Returns `true` if every input byte has been consumed.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Terminal check: the first recorded error, if any.
    ///
    /// # Errors
    ///
    /// Returns the first grammar error recorded by any `expect_*` call.
    pub fn finish(self) -> Result<()> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn fail(&mut self, message: impl Into<String>) {
        if self.err.is_none() {
            self.err = Some(Error::Parse {
                position: self.pos,
                message: message.into(),
            });
        }
    }

    /// Consumes a single space.
    pub fn sp(&mut self) -> bool {
        if self.failed() {
            return false;
        }
        if self.peek() == Some(b' ') {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consumes a single space, recording an error if absent.
    pub fn expect_sp(&mut self) {
        if !self.sp() && !self.failed() {
            self.fail("expected SP");
        }
    }

    /// Consumes a CRLF pair.
    pub fn crlf(&mut self) -> bool {
        if self.failed() {
            return false;
        }
        if self.input[self.pos..].starts_with(b"\r\n") {
            self.pos += 2;
            true
        } else {
            false
        }
    }

    /// Consumes a CRLF pair, recording an error if absent.
    pub fn expect_crlf(&mut self) {
        if !self.crlf() && !self.failed() {
            self.fail("expected CRLF");
        }
    }

    /// Consumes the single expected delimiter byte.
    pub fn special(&mut self, b: u8) -> bool {
        if self.failed() {
            return false;
        }
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consumes the delimiter byte, recording an error if absent.
    pub fn expect_special(&mut self, b: u8) {
        if !self.special(b) && !self.failed() {
            self.fail(format!("expected {:?}", char::from(b)));
        }
    }

    /// Consumes a run of atom characters.
    pub fn atom(&mut self) -> Option<&'a str> {
        if self.failed() {
            return None;
        }
        let start = self.pos;
        while self.peek().is_some_and(is_atom_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        // Atom characters are all printable ASCII.
        str::from_utf8(&self.input[start..self.pos]).ok()
    }

    /// Consumes an atom, recording an error if absent.
    pub fn expect_atom(&mut self) -> &'a str {
        match self.atom() {
            Some(s) => s,
            None => {
                self.fail("expected atom");
                ""
            }
        }
    }

    /// Consumes a decimal number.
    pub fn number(&mut self) -> Option<u32> {
        if self.failed() {
            return None;
        }
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        match str::from_utf8(&self.input[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
        {
            Some(n) => Some(n),
            None => {
                self.pos = start;
                self.fail("number out of range");
                None
            }
        }
    }

    /// Consumes a decimal number, recording an error if absent.
    pub fn expect_number(&mut self) -> u32 {
        match self.number() {
            Some(n) => n,
            None => {
                self.fail("expected number");
                0
            }
        }
    }

    /// Consumes a command tag.
    pub fn expect_tag(&mut self) -> Tag {
        Tag::new(self.expect_atom())
    }

    /// Consumes a quoted string, unescaping `\"` and `\\`.
    ///
    /// Malformed quoting (an unterminated string or an invalid escape) is a
    /// hard grammar error, not a probe miss.
    pub fn quoted(&mut self) -> Option<String> {
        if self.failed() || self.peek() != Some(b'"') {
            return None;
        }
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c @ (b'"' | b'\\')) => {
                            out.push(c);
                            self.pos += 1;
                        }
                        _ => {
                            self.fail("invalid escape in quoted string");
                            return None;
                        }
                    }
                }
                Some(b'\r' | b'\n') | None => {
                    self.fail("unterminated quoted string");
                    return None;
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
        match String::from_utf8(out) {
            Ok(s) => Some(s),
            Err(_) => {
                self.fail("invalid UTF-8 in quoted string");
                None
            }
        }
    }

    /// Consumes a literal: header `{n}` CRLF followed by exactly `n` raw
    /// octets. The octets pass through untouched; CR/LF inside them has no
    /// grammatical meaning.
    pub fn literal(&mut self) -> Option<&'a [u8]> {
        if self.failed() || self.peek() != Some(b'{') {
            return None;
        }
        self.pos += 1;
        let Some(len) = self.number() else {
            self.fail("expected literal length");
            return None;
        };
        // Non-synchronizing form {n+}; the wait, if any, happened upstream.
        let _ = self.special(b'+');
        self.expect_special(b'}');
        self.expect_crlf();
        if self.failed() {
            return None;
        }
        let len = len as usize;
        if self.input.len() - self.pos < len {
            self.fail("literal extends past end of input");
            return None;
        }
        let data = &self.input[self.pos..self.pos + len];
        self.pos += len;
        Some(data)
    }

    /// Consumes a string in any of its three forms: atom, quoted, literal.
    pub fn string(&mut self) -> Option<String> {
        if let Some(s) = self.quoted() {
            return Some(s);
        }
        if self.peek() == Some(b'{') {
            let data = self.literal()?;
            return match str::from_utf8(data) {
                Ok(s) => Some(s.to_string()),
                Err(_) => {
                    self.fail("invalid UTF-8 in literal");
                    None
                }
            };
        }
        self.atom().map(str::to_string)
    }

    /// Consumes a string, recording an error if absent.
    pub fn expect_string(&mut self) -> String {
        match self.string() {
            Some(s) => s,
            None => {
                self.fail("expected string");
                String::new()
            }
        }
    }

    /// Consumes `NIL` or a string.
    pub fn expect_nstring(&mut self) -> Option<String> {
        let before = self.pos;
        if let Some(atom) = self.atom() {
            if atom.eq_ignore_ascii_case("NIL") {
                return None;
            }
            self.pos = before;
        }
        Some(self.expect_string())
    }

    /// Consumes a parenthesized, space-separated list, invoking `f` once
    /// per field. The list may be empty (`()`).
    pub fn expect_list(&mut self, mut f: impl FnMut(&mut Self)) {
        self.expect_special(b'(');
        if self.special(b')') {
            return;
        }
        loop {
            f(self);
            if self.failed() || self.special(b')') {
                return;
            }
            self.expect_sp();
            if self.failed() {
                return;
            }
        }
    }

    /// Consumes the remaining human-readable text up to (not including)
    /// the terminating CRLF.
    pub fn expect_text(&mut self) -> &'a str {
        if self.failed() {
            return "";
        }
        let rest = &self.input[self.pos..];
        let end = rest
            .windows(2)
            .position(|w| w == b"\r\n")
            .unwrap_or(rest.len());
        let text = &rest[..end];
        match str::from_utf8(text) {
            Ok(s) => {
                self.pos += end;
                s
            }
            Err(_) => {
                self.fail("invalid UTF-8 in text");
                ""
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn probes_consume_nothing_on_failure() {
        let mut dec = Decoder::new(b"ATOM rest");
        assert!(!dec.sp());
        assert!(!dec.crlf());
        assert!(!dec.special(b'('));
        assert!(dec.number().is_none());
        assert!(dec.quoted().is_none());
        assert!(dec.literal().is_none());
        assert_eq!(dec.position(), 0);
        assert_eq!(dec.atom(), Some("ATOM"));
    }

    #[test]
    fn flat_expect_chain_with_single_check() {
        let mut dec = Decoder::new(b"A001 OK done\r\n");
        let tag = dec.expect_tag();
        dec.expect_sp();
        let status = dec.expect_atom();
        dec.expect_sp();
        let text = dec.expect_text();
        dec.expect_crlf();
        assert_eq!(tag.as_str(), "A001");
        assert_eq!(status, "OK");
        assert_eq!(text, "done");
        dec.finish().unwrap();
    }

    #[test]
    fn sticky_error_short_circuits_later_calls() {
        let mut dec = Decoder::new(b"oops");
        dec.expect_number();
        let pos = dec.position();
        // Everything after the first failure is inert.
        dec.expect_sp();
        dec.expect_crlf();
        assert_eq!(dec.expect_atom(), "");
        assert_eq!(dec.position(), pos);
        let err = dec.finish().unwrap_err();
        assert!(err.to_string().contains("expected number"));
    }

    #[test]
    fn quoted_string_unescapes() {
        let mut dec = Decoder::new(b"\"say \\\"hi\\\" \\\\ ok\"");
        assert_eq!(dec.quoted().unwrap(), "say \"hi\" \\ ok");
        assert!(dec.is_eof());
    }

    #[test]
    fn unterminated_quoted_string_is_fatal() {
        let mut dec = Decoder::new(b"\"half");
        assert!(dec.quoted().is_none());
        assert!(dec.failed());
    }

    #[test]
    fn literal_is_byte_exact_across_crlf() {
        // 11 octets, CR/LF inside carry no meaning.
        let mut dec = Decoder::new(b"{11}\r\nhello\r\nbye rest");
        let data = dec.literal().unwrap();
        assert_eq!(data.len(), 11);
        assert_eq!(data, b"hello\r\nbye ");
        assert!(dec.sp() || dec.atom() == Some("rest"));
    }

    #[test]
    fn literal_nonsync_form() {
        let mut dec = Decoder::new(b"{3+}\r\nabc");
        assert_eq!(dec.literal().unwrap(), b"abc");
        assert!(dec.is_eof());
    }

    #[test]
    fn truncated_literal_is_fatal() {
        let mut dec = Decoder::new(b"{10}\r\nshort");
        assert!(dec.literal().is_none());
        assert!(dec.failed());
    }

    #[test]
    fn list_of_fields() {
        let mut dec = Decoder::new(b"(\\Seen \\Flagged draft)");
        let mut flags = Vec::new();
        dec.expect_list(|d| {
            flags.push(d.expect_atom().to_string());
        });
        dec.finish().unwrap();
        assert_eq!(flags, ["\\Seen", "\\Flagged", "draft"]);
    }

    #[test]
    fn empty_list() {
        let mut dec = Decoder::new(b"()");
        let mut n = 0;
        dec.expect_list(|_| n += 1);
        dec.finish().unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn nested_lists() {
        let mut dec = Decoder::new(b"(a (b c) d)");
        let mut leaves = Vec::new();
        fn walk(d: &mut Decoder<'_>, leaves: &mut Vec<String>) {
            if let Some(atom) = d.atom() {
                leaves.push(atom.to_string());
            } else {
                d.expect_list(|d| walk(d, leaves));
            }
        }
        dec.expect_list(|d| walk(d, &mut leaves));
        dec.finish().unwrap();
        assert_eq!(leaves, ["a", "b", "c", "d"]);
    }

    #[test]
    fn nstring_nil() {
        let mut dec = Decoder::new(b"NIL x");
        assert_eq!(dec.expect_nstring(), None);
        let mut dec = Decoder::new(b"\"v\"");
        assert_eq!(dec.expect_nstring(), Some("v".to_string()));
    }

    #[test]
    fn string_in_all_three_forms() {
        assert_eq!(Decoder::new(b"bare").string(), Some("bare".into()));
        assert_eq!(Decoder::new(b"\"two words\"").string(), Some("two words".into()));
        assert_eq!(Decoder::new(b"{4}\r\nfour").string(), Some("four".into()));
    }
}
