//! Core IMAP protocol types.

mod capability;
mod response_code;
mod status;
mod tag;

pub use capability::{Capability, CapabilitySet};
pub use response_code::ResponseCode;
pub use status::{ConnState, Status};
pub use tag::Tag;
