//! # strata-types: Core types for `Strata`
//!
//! This crate contains the shared identifier types used across the
//! `Strata` log engine:
//! - Logical positions ([`Offset`])
//! - Temporal values ([`Timestamp`])
//!
//! Both are thin `u64` newtypes so they stay `Copy` and cost nothing to
//! pass around; arithmetic that can underflow goes through checked
//! variants.

use std::{
    fmt::{Debug, Display},
    ops::{Add, AddAssign, Sub},
};

use serde::{Deserialize, Serialize};

// ============================================================================
// Offset - logical position of a record in a partition
// ============================================================================

/// Absolute logical position of a record within a partition.
///
/// Offsets are zero-indexed and assigned sequentially by the log layer.
/// Each segment covers a contiguous offset range starting at its base
/// offset; structures that store offsets relative to a base use
/// [`Offset::checked_sub`] to compute the distance.
///
/// Uses `u64` internally; offsets are never negative by definition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Offset(u64);

impl Offset {
    pub const ZERO: Offset = Offset(0);

    pub fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// Returns the offset as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the offset as a `usize` for indexing.
    ///
    /// # Panics
    ///
    /// Panics on 32-bit platforms if the offset exceeds `usize::MAX`.
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    /// Distance from `base` to this offset, or `None` when this offset
    /// precedes `base`.
    pub fn checked_sub(self, base: Offset) -> Option<u64> {
        self.0.checked_sub(base.0)
    }
}

impl Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Offset {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Add<u64> for Offset {
    type Output = Self;
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign for Offset {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Offset {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl From<u64> for Offset {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Offset> for u64 {
    fn from(offset: Offset) -> Self {
        offset.0
    }
}

// ============================================================================
// Timestamp - milliseconds since the Unix epoch
// ============================================================================

/// A record timestamp in milliseconds since the Unix epoch.
///
/// [`Timestamp::ZERO`] doubles as the "no timestamp yet" sentinel for
/// structures that track a running maximum, mirroring how an empty
/// time index reports its last entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the epoch.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Timestamp> for u64 {
    fn from(timestamp: Timestamp) -> Self {
        timestamp.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_arithmetic() {
        let base = Offset::new(50);
        assert_eq!(base + Offset::new(5), Offset::new(55));
        assert_eq!(base + 5, Offset::new(55));
        assert_eq!(Offset::new(55) - base, Offset::new(5));
    }

    #[test]
    fn offset_checked_sub() {
        assert_eq!(Offset::new(55).checked_sub(Offset::new(50)), Some(5));
        assert_eq!(Offset::new(50).checked_sub(Offset::new(50)), Some(0));
        assert_eq!(Offset::new(49).checked_sub(Offset::new(50)), None);
    }

    #[test]
    fn offset_ordering() {
        assert!(Offset::new(1) < Offset::new(2));
        assert_eq!(Offset::ZERO, Offset::new(0));
    }

    #[test]
    fn timestamp_roundtrips_through_serde() {
        let ts = Timestamp::new(1_700_000_000_000);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "1700000000000");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn offset_display() {
        assert_eq!(Offset::new(42).to_string(), "42");
        assert_eq!(Timestamp::new(42).to_string(), "42");
    }
}
