//! Message number sets.
//!
//! IMAP identifies groups of messages compactly as comma-joined ranges
//! (`2:4,7,20:*`). The same algebra serves two distinct element meanings:
//! 1-based sequence positions and stable UIDs. Rather than aliasing one
//! representation as two types, [`NumSet`] is generic over a marker kind,
//! with [`SeqSet`] and [`UidSet`] as the two public specializations.
//!
//! The value `0` is reserved as the `*` sentinel meaning "the largest
//! number in use"; it never appears as a concrete message number.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use crate::error::{Error, Result};

mod sealed {
    pub trait Sealed {}
}

/// Marker trait for number-set element kinds.
pub trait SetKind: sealed::Sealed + 'static {
    /// Human-readable kind name used in error messages.
    const NAME: &'static str;
}

/// Marker kind for message sequence numbers.
#[derive(Debug, Clone, Copy)]
pub enum SeqKind {}

/// Marker kind for unique identifiers.
#[derive(Debug, Clone, Copy)]
pub enum UidKind {}

impl sealed::Sealed for SeqKind {}
impl sealed::Sealed for UidKind {}

impl SetKind for SeqKind {
    const NAME: &'static str = "sequence number";
}

impl SetKind for UidKind {
    const NAME: &'static str = "UID";
}

/// A set of message sequence numbers.
pub type SeqSet = NumSet<SeqKind>;

/// A set of message UIDs.
pub type UidSet = NumSet<UidKind>;

/// Maps a range endpoint onto a total order where `*` (encoded as 0)
/// sorts after every concrete number.
const fn order(v: u32) -> u64 {
    if v == 0 {
        u32::MAX as u64 + 1
    } else {
        v as u64
    }
}

/// An inclusive range of message numbers.
///
/// `stop == 0` encodes an open-ended range (`n:*`); `start == 0` only
/// occurs in the lone `*` range. A single number is `start == stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// First number in the range.
    pub start: u32,
    /// Last number in the range, or `0` for "the largest known number".
    pub stop: u32,
}

impl Range {
    /// Creates a range covering `start` through `stop`.
    ///
    /// Endpoints given in descending order are swapped. `0` means `*`.
    #[must_use]
    pub fn new(start: u32, stop: u32) -> Self {
        if order(start) <= order(stop) {
            Self { start, stop }
        } else {
            Self {
                start: stop,
                stop: start,
            }
        }
    }

    /// Creates a range holding the single number `n`.
    #[must_use]
    pub const fn single(n: u32) -> Self {
        Self { start: n, stop: n }
    }

    /// Returns `true` if this range extends to the largest known number.
    #[must_use]
    pub const fn is_open(self) -> bool {
        self.stop == 0
    }

    /// Returns `true` if `id` falls within this range.
    ///
    /// `0` (the `*` sentinel) is contained only by an open-ended range.
    #[must_use]
    pub fn contains(self, id: u32) -> bool {
        order(self.start) <= order(id) && order(id) <= order(self.stop)
    }

    /// Returns the union of two ranges if they overlap or touch.
    ///
    /// Fails (returns `None`) only when the ranges neither overlap nor
    /// are adjacent, so the union would not be a single range.
    #[must_use]
    pub fn merge(self, other: Self) -> Option<Self> {
        let (a, b) = if order(self.start) <= order(other.start) {
            (self, other)
        } else {
            (other, self)
        };
        if order(a.stop) + 1 < order(b.start) {
            return None;
        }
        let stop = if order(a.stop) >= order(b.stop) {
            a.stop
        } else {
            b.stop
        };
        Some(Self {
            start: a.start,
            stop,
        })
    }

    fn parse(text: &str) -> Result<Self> {
        let err = || Error::NumberSet(text.to_string());
        let endpoint = |s: &str| -> Result<u32> {
            if s == "*" {
                return Ok(0);
            }
            // A literal 0 is never a valid endpoint; it is reserved for `*`.
            match s.parse::<u32>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(err()),
            }
        };
        match text.split_once(':') {
            None => Ok(Self::single(endpoint(text)?)),
            Some((a, b)) => Ok(Self::new(endpoint(a)?, endpoint(b)?)),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.start, self.stop) {
            (0, _) => write!(f, "*"),
            (n, m) if n == m => write!(f, "{n}"),
            (n, 0) => write!(f, "{n}:*"),
            (n, m) => write!(f, "{n}:{m}"),
        }
    }
}

/// An ordered set of non-overlapping, non-adjacent message-number ranges.
///
/// Adjacent and overlapping ranges are merged on insertion, so the set is
/// always in canonical form: sorted ascending by start, with at most one
/// trailing open-ended range.
pub struct NumSet<K> {
    ranges: Vec<Range>,
    _kind: PhantomData<K>,
}

impl<K: SetKind> NumSet<K> {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ranges: Vec::new(),
            _kind: PhantomData,
        }
    }

    /// Creates a set holding the single number `n`.
    #[must_use]
    pub fn single(n: u32) -> Self {
        let mut set = Self::new();
        set.insert(Range::single(n));
        set
    }

    /// Creates a set covering `start` through `stop`.
    #[must_use]
    pub fn range(start: u32, stop: u32) -> Self {
        let mut set = Self::new();
        set.insert(Range::new(start, stop));
        set
    }

    /// Creates the set `1:*` covering every message.
    #[must_use]
    pub fn all() -> Self {
        Self::range(1, 0)
    }

    /// Returns `true` if the set holds no ranges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the ranges in canonical order.
    #[must_use]
    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    /// Inserts a range, maintaining the sorted/merged invariant.
    pub fn insert(&mut self, range: Range) {
        let range = Range::new(range.start, range.stop);
        let mut i = self
            .ranges
            .partition_point(|r| order(r.start) < order(range.start));
        self.ranges.insert(i, range);
        // Merge left once, then right as far as ranges keep touching.
        if i > 0 {
            if let Some(merged) = self.ranges[i - 1].merge(self.ranges[i]) {
                self.ranges[i - 1] = merged;
                self.ranges.remove(i);
                i -= 1;
            }
        }
        while i + 1 < self.ranges.len() {
            match self.ranges[i].merge(self.ranges[i + 1]) {
                Some(merged) => {
                    self.ranges[i] = merged;
                    self.ranges.remove(i + 1);
                }
                None => break,
            }
        }
    }

    /// Inserts the single number `n`.
    pub fn insert_num(&mut self, n: u32) {
        self.insert(Range::single(n));
    }

    /// Returns `true` if `id` is in the set.
    ///
    /// `0` (the `*` sentinel) is contained only when the trailing range is
    /// itself open-ended.
    #[must_use]
    pub fn contains(&self, id: u32) -> bool {
        let i = self
            .ranges
            .partition_point(|r| order(r.start) <= order(id));
        i > 0 && self.ranges[i - 1].contains(id)
    }

    /// Expands the set to its concrete numbers.
    ///
    /// Returns `None` if any range is open-ended: the largest known number
    /// is not representable without external context.
    #[must_use]
    pub fn nums(&self) -> Option<Vec<u32>> {
        let mut out = Vec::new();
        for r in &self.ranges {
            if r.start == 0 || r.stop == 0 {
                return None;
            }
            out.extend(r.start..=r.stop);
        }
        Some(out)
    }
}

impl<K> Clone for NumSet<K> {
    fn clone(&self) -> Self {
        Self {
            ranges: self.ranges.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K> fmt::Debug for NumSet<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NumSet").field(&self.ranges).finish()
    }
}

impl<K> PartialEq for NumSet<K> {
    fn eq(&self, other: &Self) -> bool {
        self.ranges == other.ranges
    }
}

impl<K> Eq for NumSet<K> {}

impl<K: SetKind> Default for NumSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SetKind> FromIterator<Range> for NumSet<K> {
    fn from_iter<I: IntoIterator<Item = Range>>(iter: I) -> Self {
        let mut set = Self::new();
        for r in iter {
            set.insert(r);
        }
        set
    }
}

impl<K: SetKind> FromStr for NumSet<K> {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::NumberSet(s.to_string()));
        }
        s.split(',').map(Range::parse).collect::<Result<Self>>()
    }
}

impl<K> fmt::Display for NumSet<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for r in &self.ranges {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{r}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn parse(s: &str) -> SeqSet {
        s.parse().unwrap()
    }

    #[test]
    fn parse_single() {
        let set = parse("42");
        assert_eq!(set.ranges(), &[Range::single(42)]);
        assert_eq!(set.to_string(), "42");
    }

    #[test]
    fn parse_range() {
        assert_eq!(parse("2:4").to_string(), "2:4");
        assert_eq!(parse("2:4").ranges(), &[Range::new(2, 4)]);
    }

    #[test]
    fn parse_swaps_descending_endpoints() {
        assert_eq!(parse("4:2"), parse("2:4"));
        // `*` sorts after every concrete number, so `*:5` is `5:*`.
        assert_eq!(parse("*:5").to_string(), "5:*");
    }

    #[test]
    fn parse_rejects_zero_endpoint() {
        assert!("0".parse::<SeqSet>().is_err());
        assert!("0:5".parse::<SeqSet>().is_err());
        assert!("".parse::<SeqSet>().is_err());
        assert!("1:".parse::<SeqSet>().is_err());
        assert!("a:b".parse::<SeqSet>().is_err());
    }

    #[test]
    fn parse_star_forms() {
        assert_eq!(parse("*").to_string(), "*");
        assert_eq!(parse("23:*").to_string(), "23:*");
        assert_eq!(parse("1,3:5,99:*").to_string(), "1,3:5,99:*");
    }

    #[test]
    fn all_covers_every_message() {
        let set = SeqSet::all();
        assert_eq!(set.to_string(), "1:*");
        assert!(set.contains(1));
        assert!(set.contains(u32::MAX));
        assert!(set.contains(0));
        assert_eq!(set, parse("1:*"));
    }

    #[test]
    fn insert_merges_adjacent_and_overlapping() {
        let mut set = SeqSet::new();
        set.insert(Range::new(5, 7));
        set.insert(Range::new(1, 2));
        set.insert(Range::single(3));
        assert_eq!(set.to_string(), "1:3,5:7");
        set.insert(Range::single(4));
        assert_eq!(set.to_string(), "1:7");
    }

    #[test]
    fn insert_merges_across_many_ranges() {
        let mut set = SeqSet::new();
        for n in [1, 3, 5, 7, 9] {
            set.insert_num(n);
        }
        assert_eq!(set.to_string(), "1,3,5,7,9");
        set.insert(Range::new(2, 8));
        assert_eq!(set.to_string(), "1:9");
    }

    #[test]
    fn insert_open_range_swallows_tail() {
        let mut set = SeqSet::new();
        set.insert(Range::new(10, 20));
        set.insert(Range::new(15, 0));
        assert_eq!(set.to_string(), "10:*");
    }

    #[test]
    fn contains_star_only_with_open_tail() {
        assert!(parse("5:*").contains(0));
        assert!(parse("*").contains(0));
        assert!(!parse("1:100").contains(0));
        assert!(!parse("1,2,3").contains(0));
    }

    #[test]
    fn contains_concrete() {
        let set = parse("2:4,7,20:*");
        for n in [2, 3, 4, 7, 20, 21, 5000] {
            assert!(set.contains(n), "{n}");
        }
        for n in [1, 5, 6, 8, 19] {
            assert!(!set.contains(n), "{n}");
        }
    }

    #[test]
    fn merge_ranges() {
        assert_eq!(
            Range::new(1, 3).merge(Range::new(4, 6)),
            Some(Range::new(1, 6))
        );
        assert_eq!(
            Range::new(1, 5).merge(Range::new(3, 8)),
            Some(Range::new(1, 8))
        );
        assert_eq!(Range::new(1, 3).merge(Range::new(5, 6)), None);
        // The open-ended tail covers everything at or after its start.
        assert_eq!(
            Range::new(5, 0).merge(Range::new(7, 9)),
            Some(Range::new(5, 0))
        );
    }

    #[test]
    fn nums_fails_for_open_sets() {
        assert!(parse("1:*").nums().is_none());
        assert!(parse("*").nums().is_none());
        assert_eq!(parse("1:3,5").nums(), Some(vec![1, 2, 3, 5]));
    }

    #[test]
    fn seq_and_uid_sets_are_distinct_types() {
        let seqs: SeqSet = "1:3".parse().unwrap();
        let uids: UidSet = "1:3".parse().unwrap();
        // Same algebra, different element meaning.
        assert_eq!(seqs.to_string(), uids.to_string());
    }

    fn arb_endpoint() -> impl Strategy<Value = u32> {
        prop_oneof![1u32..10_000, Just(0u32)]
    }

    proptest! {
        #[test]
        fn display_parse_round_trips(ranges in prop::collection::vec((arb_endpoint(), arb_endpoint()), 1..8)) {
            let set: SeqSet = ranges
                .into_iter()
                .map(|(a, b)| Range::new(a, b))
                .collect();
            let text = set.to_string();
            let reparsed: SeqSet = text.parse().unwrap();
            prop_assert_eq!(set, reparsed);
        }

        #[test]
        fn contains_agrees_with_brute_force(ranges in prop::collection::vec((1u32..200, 1u32..200), 1..6)) {
            let set: SeqSet = ranges
                .iter()
                .map(|&(a, b)| Range::new(a, b))
                .collect();
            for id in 1u32..220 {
                let expect = ranges
                    .iter()
                    .map(|&(a, b)| Range::new(a, b))
                    .any(|r| r.contains(id));
                prop_assert_eq!(set.contains(id), expect, "id {}", id);
            }
        }

        #[test]
        fn range_count_matches_merged_groups(nums in prop::collection::btree_set(1u32..60, 1..20)) {
            let set: SeqSet = nums.iter().map(|&n| Range::single(n)).collect();
            let mut groups = 0u32;
            let mut prev = None;
            for &n in &nums {
                if prev != Some(n - 1) {
                    groups += 1;
                }
                prev = Some(n);
            }
            prop_assert_eq!(set.ranges().len() as u32, groups);
        }
    }
}
