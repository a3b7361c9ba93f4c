//! Capability keywords and negotiated capability sets.

use std::collections::HashSet;
use std::fmt;

/// A capability keyword from a CAPABILITY listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `IMAP4rev1`
    Imap4Rev1,
    /// `IMAP4rev2`
    Imap4Rev2,
    /// IDLE command.
    Idle,
    /// MOVE command.
    Move,
    /// UNSELECT command.
    Unselect,
    /// ENABLE command.
    Enable,
    /// SASL initial response in AUTHENTICATE.
    SaslIr,
    /// Extended SEARCH result syntax.
    ESearch,
    /// Non-synchronizing literals.
    LiteralPlus,
    /// Non-synchronizing literals up to 4096 octets.
    LiteralMinus,
    /// LOGIN command disabled.
    LoginDisabled,
    /// A SASL mechanism offered for AUTHENTICATE.
    Auth(String),
    /// A keyword this implementation does not model.
    Other(String),
}

impl Capability {
    /// Parses a capability keyword, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let upper = s.to_ascii_uppercase();
        match upper.as_str() {
            "IMAP4REV1" => Self::Imap4Rev1,
            "IMAP4REV2" => Self::Imap4Rev2,
            "IDLE" => Self::Idle,
            "MOVE" => Self::Move,
            "UNSELECT" => Self::Unselect,
            "ENABLE" => Self::Enable,
            "SASL-IR" => Self::SaslIr,
            "ESEARCH" => Self::ESearch,
            "LITERAL+" => Self::LiteralPlus,
            "LITERAL-" => Self::LiteralMinus,
            "LOGINDISABLED" => Self::LoginDisabled,
            _ if upper.starts_with("AUTH=") => Self::Auth(upper[5..].to_string()),
            _ => Self::Other(upper),
        }
    }

    /// Capabilities folded into this keyword's availability.
    ///
    /// `IMAP4rev2` subsumes a family that servers need not list
    /// explicitly; lookup must treat those as implied.
    fn implies(&self) -> &'static [Self] {
        match self {
            Self::Imap4Rev2 => &[
                Self::Idle,
                Self::Move,
                Self::Unselect,
                Self::Enable,
                Self::SaslIr,
                Self::ESearch,
                Self::LiteralMinus,
            ],
            _ => &[],
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Imap4Rev1 => f.write_str("IMAP4rev1"),
            Self::Imap4Rev2 => f.write_str("IMAP4rev2"),
            Self::Idle => f.write_str("IDLE"),
            Self::Move => f.write_str("MOVE"),
            Self::Unselect => f.write_str("UNSELECT"),
            Self::Enable => f.write_str("ENABLE"),
            Self::SaslIr => f.write_str("SASL-IR"),
            Self::ESearch => f.write_str("ESEARCH"),
            Self::LiteralPlus => f.write_str("LITERAL+"),
            Self::LiteralMinus => f.write_str("LITERAL-"),
            Self::LoginDisabled => f.write_str("LOGINDISABLED"),
            Self::Auth(mech) => write!(f, "AUTH={mech}"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// The set of capabilities advertised on a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    caps: HashSet<Capability>,
}

impl CapabilitySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the set with a freshly advertised listing.
    pub fn replace(&mut self, caps: impl IntoIterator<Item = Capability>) {
        self.caps = caps.into_iter().collect();
    }

    /// Adds a single capability.
    pub fn add(&mut self, cap: Capability) {
        self.caps.insert(cap);
    }

    /// Returns `true` if the capability is listed or implied by a listed
    /// broader capability.
    #[must_use]
    pub fn has(&self, cap: &Capability) -> bool {
        if self.caps.contains(cap) {
            return true;
        }
        self.caps
            .iter()
            .any(|listed| listed.implies().contains(cap))
    }

    /// Returns `true` if non-synchronizing literals may be sent without
    /// the continuation wait.
    ///
    /// LITERAL- only covers small literals; the caller passes the payload
    /// size so the distinction stays in one place.
    #[must_use]
    pub fn nonsync_literals(&self, len: usize) -> bool {
        if self.has(&Capability::LiteralPlus) {
            return true;
        }
        self.has(&Capability::LiteralMinus) && len <= 4096
    }

    /// Iterates over the explicitly listed capabilities.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.caps.iter()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self {
            caps: iter.into_iter().collect(),
        }
    }
}
