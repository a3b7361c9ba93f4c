//! Completion statuses and connection states.

use std::fmt;

/// Status keyword of a status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed for an operational reason.
    No,
    /// Command was malformed or invalid in the current state.
    Bad,
    /// Greeting: connection starts already authenticated.
    PreAuth,
    /// The connection is being closed.
    Bye,
}

impl Status {
    /// Parses a status keyword, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("OK") {
            Some(Self::Ok)
        } else if s.eq_ignore_ascii_case("NO") {
            Some(Self::No)
        } else if s.eq_ignore_ascii_case("BAD") {
            Some(Self::Bad)
        } else if s.eq_ignore_ascii_case("PREAUTH") {
            Some(Self::PreAuth)
        } else if s.eq_ignore_ascii_case("BYE") {
            Some(Self::Bye)
        } else {
            None
        }
    }

    /// Returns `true` for a successful status.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok | Self::PreAuth)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::No => "NO",
            Self::Bad => "BAD",
            Self::PreAuth => "PREAUTH",
            Self::Bye => "BYE",
        })
    }
}

/// Connection lifecycle state.
///
/// Each command keyword is valid in a fixed subset of these states; a
/// command received outside its valid states is rejected without ever
/// reaching the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Greeting sent, no credentials presented yet.
    NotAuthenticated,
    /// Authenticated but no mailbox selected.
    Authenticated,
    /// A mailbox is selected.
    Selected,
    /// LOGOUT received or BYE sent; the connection is winding down.
    Logout,
}
