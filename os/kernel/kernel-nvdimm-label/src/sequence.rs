//! # Index Sequence Numbers
//!
//! Namespace indices carry a 2-bit sequence number cycling `1 → 2 → 3 → 1`.
//! Zero marks an index that has never been written. With three live values
//! any two distinct sequence numbers are ordered: exactly one of them is the
//! successor of the other, and that one is newer.

use crate::consts::SEQUENCE_MASK;
use core::fmt;

/// A valid (non-zero) index sequence number.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Sequence(u32);

impl Sequence {
    /// Sequence written to the first index of a freshly formatted area's
    /// successor chain.
    pub const FIRST: Self = Self(1);

    /// Interpret the meaningful bits of an on-media sequence field.
    ///
    /// Returns `None` for the reserved value zero.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw & SEQUENCE_MASK {
            0 => None,
            v => Some(Self(v)),
        }
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The next value in the `1 → 2 → 3 → 1` cycle.
    #[must_use]
    pub const fn successor(self) -> Self {
        match self.0 {
            1 => Self(2),
            2 => Self(3),
            _ => Self(1),
        }
    }

    /// Whether `self` was written immediately after `other`.
    #[must_use]
    pub const fn is_successor_of(self, other: Self) -> bool {
        other.successor().0 == self.0
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pick the authoritative index copy.
///
/// - one valid copy: that copy;
/// - two valid copies: the one whose sequence succeeds the other's; equal
///   sequences (only seen after corruption) resolve to copy `0`;
/// - no valid copy: `None`, the label area is unformatted.
///
/// A copy whose sequence bits are zero counts as invalid even if `valid` is set.
#[must_use]
pub fn select_active(valid0: bool, valid1: bool, seq0: u32, seq1: u32) -> Option<usize> {
    let s0 = if valid0 { Sequence::from_raw(seq0) } else { None };
    let s1 = if valid1 { Sequence::from_raw(seq1) } else { None };
    match (s0, s1) {
        (None, None) => None,
        (Some(_), None) => Some(0),
        (None, Some(_)) => Some(1),
        (Some(a), Some(b)) => {
            if b.is_successor_of(a) {
                Some(1)
            } else {
                Some(0)
            }
        }
    }
}
