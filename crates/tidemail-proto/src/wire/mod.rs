//! Wire-level grammar codec.
//!
//! Reader/writer pair for the IMAP token grammar: atoms, quoted strings,
//! length-prefixed literals, parenthesized lists, and bracketed response
//! codes. The codec has no knowledge of command semantics; it operates on
//! a fully framed unit (one line plus any embedded literals) assembled by
//! the connection layer.

mod decoder;
mod encoder;

pub use decoder::Decoder;
pub use encoder::{Encoder, StringForm, string_form};

/// Returns `true` if the byte may appear in an atom.
///
/// Atom specials are `( ) { % * " \ ]`, space, and control characters.
/// `\` is admitted anyway so that flags like `\Seen` lex as one token.
#[must_use]
pub const fn is_atom_char(b: u8) -> bool {
    !matches!(b, b'(' | b')' | b'{' | b' ' | b'%' | b'*' | b'"' | b']') && b > 0x1F && b < 0x7F
}
