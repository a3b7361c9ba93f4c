//! # tidemail-proto
//!
//! Sans-I/O building blocks for the IMAP protocol, shared by the
//! `tidemail-client` and `tidemail-server` crates:
//!
//! - [`wire`]: the token grammar codec — a sticky-error [`wire::Decoder`]
//!   whose probe operations consume nothing on failure, and an
//!   [`wire::Encoder`] that renders each primitive in canonical form
//!   (picking atom, quoted, or literal shape for strings by content)
//! - [`numset`]: the message-number-set algebra ([`SeqSet`] / [`UidSet`]),
//!   ordered merged ranges with the `*` "largest known" marker
//! - [`continuation`]: the single-resolution handshake primitive used for
//!   literal uploads, SASL rounds, and IDLE acknowledgement
//! - [`types`]: tags, statuses, response codes, capabilities, and the
//!   connection state enum
//!
//! Nothing in this crate performs I/O; connection layers feed the decoder
//! one fully framed unit (a line plus its embedded literals) at a time and
//! flush the encoder's buffer whenever their own pacing rules allow.

pub mod continuation;
mod error;
pub mod numset;
pub mod types;
pub mod wire;

pub use continuation::{ContinuationHandle, ContinuationRequest, continuation};
pub use error::{Error, Result};
pub use numset::{NumSet, Range, SeqKind, SeqSet, SetKind, UidKind, UidSet};
pub use types::{Capability, CapabilitySet, ConnState, ResponseCode, Status, Tag};
pub use wire::{Decoder, Encoder, StringForm, string_form};
