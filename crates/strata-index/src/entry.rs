//! Fixed-size index entries and their on-disk codec.
//!
//! Every index variant stores a flat array of fixed-width entries. The
//! [`IndexEntry`] trait is the capability set the region manager, search
//! engine, and lifecycle controller are generic over: an entry contributes
//! its byte width, a slot decoder, and the two components a search can
//! compare on.
//!
//! All fields are stored big-endian so index files are byte-identical
//! across platforms.

use strata_types::{Offset, Timestamp};

/// Capability set shared by every index entry layout.
pub trait IndexEntry: Copy {
    /// Bytes occupied by one entry on disk.
    const ENTRY_BYTES: usize;

    /// Decodes the entry stored at `slot`, resolving relative offsets
    /// against `base_offset`.
    fn decode(buf: &[u8], slot: usize, base_offset: Offset) -> Self;

    /// Encodes this entry into `slot`, storing offsets relative to
    /// `base_offset`.
    ///
    /// Callers validate the relative range before encoding; debug builds
    /// assert it.
    fn encode(&self, buf: &mut [u8], slot: usize, base_offset: Offset);

    /// Component compared by KEY-mode searches.
    fn key(&self) -> u64;

    /// Component compared by VALUE-mode searches.
    fn value(&self) -> u64;
}

// ============================================================================
// OffsetPosition - 8-byte offset index entry
// ============================================================================

/// An (absolute offset, file position) pair from an offset index slot.
///
/// On disk: `[relative_offset: u32 BE][position: u32 BE]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetPosition {
    /// Absolute offset of the indexed record.
    pub offset: Offset,
    /// Byte position of that record in the paired segment file.
    pub position: u32,
}

impl IndexEntry for OffsetPosition {
    const ENTRY_BYTES: usize = 8;

    fn decode(buf: &[u8], slot: usize, base_offset: Offset) -> Self {
        let at = slot * Self::ENTRY_BYTES;
        let relative = read_u32_be(buf, at);
        let position = read_u32_be(buf, at + 4);
        Self {
            offset: base_offset + u64::from(relative),
            position,
        }
    }

    fn encode(&self, buf: &mut [u8], slot: usize, base_offset: Offset) {
        let relative = self
            .offset
            .checked_sub(base_offset)
            .expect("offset precedes base offset");
        debug_assert!(
            relative <= u64::from(u32::MAX),
            "relative offset {relative} does not fit in 32 bits"
        );
        let at = slot * Self::ENTRY_BYTES;
        buf[at..at + 4].copy_from_slice(&(relative as u32).to_be_bytes());
        buf[at + 4..at + 8].copy_from_slice(&self.position.to_be_bytes());
    }

    fn key(&self) -> u64 {
        self.offset.as_u64()
    }

    fn value(&self) -> u64 {
        u64::from(self.position)
    }
}

// ============================================================================
// TimestampOffset - 12-byte time index entry
// ============================================================================

/// A (timestamp, absolute offset) pair from a time index slot.
///
/// On disk: `[timestamp: u64 BE][relative_offset: u32 BE]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampOffset {
    /// Timestamp of the indexed record.
    pub timestamp: Timestamp,
    /// Absolute offset of the first record at or after that timestamp.
    pub offset: Offset,
}

impl IndexEntry for TimestampOffset {
    const ENTRY_BYTES: usize = 12;

    fn decode(buf: &[u8], slot: usize, base_offset: Offset) -> Self {
        let at = slot * Self::ENTRY_BYTES;
        let timestamp = read_u64_be(buf, at);
        let relative = read_u32_be(buf, at + 8);
        Self {
            timestamp: Timestamp::new(timestamp),
            offset: base_offset + u64::from(relative),
        }
    }

    fn encode(&self, buf: &mut [u8], slot: usize, base_offset: Offset) {
        let relative = self
            .offset
            .checked_sub(base_offset)
            .expect("offset precedes base offset");
        debug_assert!(
            relative <= u64::from(u32::MAX),
            "relative offset {relative} does not fit in 32 bits"
        );
        let at = slot * Self::ENTRY_BYTES;
        buf[at..at + 8].copy_from_slice(&self.timestamp.as_u64().to_be_bytes());
        buf[at + 8..at + 12].copy_from_slice(&(relative as u32).to_be_bytes());
    }

    fn key(&self) -> u64 {
        self.timestamp.as_u64()
    }

    fn value(&self) -> u64 {
        self.offset.as_u64()
    }
}

fn read_u32_be(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes(
        buf[at..at + 4]
            .try_into()
            .expect("slice is exactly 4 bytes"),
    )
}

fn read_u64_be(buf: &[u8], at: usize) -> u64 {
    u64::from_be_bytes(
        buf[at..at + 8]
            .try_into()
            .expect("slice is exactly 8 bytes"),
    )
}
