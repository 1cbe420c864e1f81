//! Sparse timestamp → offset index for a single log segment.
//!
//! The [`TimeIndex`] is the sibling of [`crate::OffsetIndex`] over the
//! same machinery: fixed 12-byte entries `[timestamp: u64 BE]
//! [relative_offset: u32 BE]`, the same pre-allocated mapped file, the
//! same search engine in the other key direction. A lookup answers "what
//! is the first offset at or after this timestamp", which the log layer
//! uses for time-based fetches and retention.
//!
//! Unlike the offset index, appends are conditional: the log layer calls
//! [`TimeIndex::maybe_append`] for every batch, and the entry is recorded
//! only when its timestamp advances past the last indexed one. Offsets
//! must still be strictly increasing.

use std::path::{Path, PathBuf};

use strata_types::{Offset, Timestamp};

use crate::config::IndexConfig;
use crate::entry::TimestampOffset;
use crate::error::IndexError;
use crate::index::IndexCore;
use crate::search::{SearchMode, largest_lower_bound_slot};

/// Sparse, memory-mapped time index of one log segment.
#[derive(Debug)]
pub struct TimeIndex {
    core: IndexCore<TimestampOffset>,
}

impl TimeIndex {
    /// Opens the time index backed by `path`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Io`] when the file cannot be opened, sized,
    /// or mapped.
    pub fn open(
        path: impl AsRef<Path>,
        base_offset: Offset,
        config: &IndexConfig,
        writable: bool,
    ) -> Result<Self, IndexError> {
        Ok(Self {
            core: IndexCore::open(path.as_ref(), base_offset, config, writable)?,
        })
    }

    /// Records `(timestamp, offset)` when `timestamp` is strictly newer
    /// than the last indexed entry.
    ///
    /// Returns whether an entry was written; an older-or-equal timestamp
    /// is skipped, keeping the index strictly increasing in both
    /// components.
    ///
    /// # Errors
    ///
    /// - [`IndexError::IndexFull`] at capacity.
    /// - [`IndexError::InvalidOffset`] when `offset` is not greater than
    ///   the last indexed offset.
    /// - [`IndexError::OffsetOverflow`] when `offset` does not fit the
    ///   32-bit relative range.
    ///
    /// # Panics
    ///
    /// Panics on a sealed index.
    pub fn maybe_append(
        &self,
        timestamp: Timestamp,
        offset: Offset,
    ) -> Result<bool, IndexError> {
        let mut state = self.core.lock_writable()?;

        if state.entry_count() >= state.max_entries() {
            return Err(IndexError::IndexFull {
                path: state.path(),
                entries: state.entry_count(),
            });
        }
        if let Some(last) = state.last_entry() {
            if offset <= last.offset {
                return Err(IndexError::InvalidOffset {
                    offset,
                    last: last.offset,
                });
            }
            if timestamp <= last.timestamp {
                return Ok(false);
            }
        }
        let base = self.core.base_offset();
        let in_range = offset
            .checked_sub(base)
            .is_some_and(|relative| relative <= u64::from(u32::MAX));
        if !in_range {
            return Err(IndexError::OffsetOverflow { offset, base });
        }

        self.core
            .push(&mut state, TimestampOffset { timestamp, offset });
        Ok(true)
    }

    /// Finds the entry with the greatest timestamp at or below `target`.
    ///
    /// Before the first entry (or on an empty index) this returns
    /// `(Timestamp::ZERO, base_offset)`: the caller scans the segment
    /// from its first record.
    pub fn lookup(&self, target: Timestamp) -> Result<TimestampOffset, IndexError> {
        let base = self.core.base_offset();
        self.core.read(|view| {
            match largest_lower_bound_slot::<TimestampOffset>(
                view,
                target.as_u64(),
                SearchMode::Key,
            ) {
                None => TimestampOffset {
                    timestamp: Timestamp::ZERO,
                    offset: base,
                },
                Some(slot) => view.entry(slot),
            }
        })
    }

    /// Returns the entry at slot `n`.
    ///
    /// # Panics
    ///
    /// Panics when `n` is at or past the live entry count.
    pub fn entry(&self, n: usize) -> Result<TimestampOffset, IndexError> {
        self.core.read(|view| {
            assert!(
                n < view.entry_count(),
                "slot {n} out of range ({} live entries)",
                view.entry_count()
            );
            view.entry(n)
        })
    }

    /// Removes all entries.
    ///
    /// # Panics
    ///
    /// Panics on a sealed index.
    pub fn truncate(&self) -> Result<(), IndexError> {
        self.core.truncate_all()
    }

    /// Removes entries whose **offset** is at or above `offset`.
    ///
    /// Truncation follows the log's offset-based contract even here, so
    /// the search runs in VALUE mode against the offset component.
    ///
    /// # Panics
    ///
    /// Panics on a sealed index.
    pub fn truncate_to(&self, offset: Offset) -> Result<(), IndexError> {
        self.core
            .truncate_to_target(offset.as_u64(), SearchMode::Value)
    }

    /// Trims the file to exactly the live prefix and remaps it
    /// read-only. No-op when already sealed.
    pub fn make_read_only(&self) -> Result<(), IndexError> {
        self.core.make_read_only()
    }

    /// Re-expands a writable index to a new maximum size (recovery path).
    ///
    /// # Panics
    ///
    /// Panics on a sealed index, or when the new size cannot hold the
    /// live prefix.
    pub fn resize(&self, new_max_bytes: u64) -> Result<(), IndexError> {
        self.core.resize(new_max_bytes)
    }

    /// Forces dirty pages to disk. Best-effort; failures are logged.
    pub fn flush(&self) -> Result<(), IndexError> {
        self.core.flush()
    }

    /// Verifies structural invariants: entry-aligned file length and a
    /// strictly increasing live prefix.
    pub fn sanity_check(&self) -> Result<(), IndexError> {
        self.core.sanity_check()
    }

    /// Unmaps and releases the file handle. Idempotent; also runs on
    /// drop.
    pub fn close(&self) {
        self.core.close();
    }

    /// Closes the index and removes the backing file (retention path).
    pub fn delete_if_exists(&self) -> Result<bool, IndexError> {
        self.core.delete_if_exists()
    }

    /// Renames the backing file (segment rename during compaction).
    pub fn rename_to(&self, new_path: impl AsRef<Path>) -> Result<(), IndexError> {
        self.core.rename_to(new_path.as_ref())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Absolute offset of the first record in the paired segment.
    pub fn base_offset(&self) -> Offset {
        self.core.base_offset()
    }

    /// Number of live entries.
    pub fn entries(&self) -> usize {
        self.core.entries()
    }

    /// Capacity in entries, fixed by the pre-allocated file length.
    pub fn max_entries(&self) -> usize {
        self.core.max_entries()
    }

    /// Whether another append would fail with `IndexFull`.
    pub fn is_full(&self) -> bool {
        self.core.is_full()
    }

    /// Whether appends and truncation are currently permitted.
    pub fn is_writable(&self) -> bool {
        self.core.is_writable()
    }

    /// Timestamp of the last entry, or [`Timestamp::ZERO`] when empty.
    pub fn last_timestamp(&self) -> Timestamp {
        self.core
            .last_entry()
            .map_or(Timestamp::ZERO, |entry| entry.timestamp)
    }

    /// Offset of the last entry, or the base offset when empty.
    pub fn last_offset(&self) -> Offset {
        self.core
            .last_entry()
            .map_or(self.core.base_offset(), |entry| entry.offset)
    }

    /// Path of the backing file.
    pub fn path(&self) -> PathBuf {
        self.core.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_writable(dir: &Path, base: u64) -> TimeIndex {
        let path = dir.join(format!("{base:020}.timeindex"));
        TimeIndex::open(path, Offset::new(base), &IndexConfig::default(), true).unwrap()
    }

    fn entry(timestamp: u64, offset: u64) -> TimestampOffset {
        TimestampOffset {
            timestamp: Timestamp::new(timestamp),
            offset: Offset::new(offset),
        }
    }

    #[test]
    fn empty_index_lookup_returns_base_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 50);

        assert_eq!(index.lookup(Timestamp::new(1_000)).unwrap(), entry(0, 50));
        assert_eq!(index.last_timestamp(), Timestamp::ZERO);
        assert_eq!(index.last_offset(), Offset::new(50));
    }

    #[test]
    fn lookup_finds_nearest_lower_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 50);
        assert!(index.maybe_append(Timestamp::new(1_000), Offset::new(55)).unwrap());
        assert!(index.maybe_append(Timestamp::new(2_000), Offset::new(70)).unwrap());
        assert!(index.maybe_append(Timestamp::new(3_000), Offset::new(95)).unwrap());

        assert_eq!(index.lookup(Timestamp::new(2_500)).unwrap(), entry(2_000, 70));
        assert_eq!(index.lookup(Timestamp::new(3_000)).unwrap(), entry(3_000, 95));
        assert_eq!(index.lookup(Timestamp::new(999)).unwrap(), entry(0, 50));
        assert_eq!(index.lookup(Timestamp::new(9_999)).unwrap(), entry(3_000, 95));
    }

    #[test]
    fn stale_timestamp_is_skipped_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 50);
        assert!(index.maybe_append(Timestamp::new(2_000), Offset::new(55)).unwrap());

        // Offset advances but the clock went backwards: skip.
        assert!(!index.maybe_append(Timestamp::new(1_500), Offset::new(70)).unwrap());
        assert_eq!(index.entries(), 1);

        // Offset regression is still an error.
        let err = index
            .maybe_append(Timestamp::new(3_000), Offset::new(55))
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidOffset { .. }));
    }

    #[test]
    fn truncate_to_cuts_by_offset_component() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 50);
        assert!(index.maybe_append(Timestamp::new(1_000), Offset::new(55)).unwrap());
        assert!(index.maybe_append(Timestamp::new(2_000), Offset::new(70)).unwrap());
        assert!(index.maybe_append(Timestamp::new(3_000), Offset::new(95)).unwrap());

        // Exact hit on the offset 70 entry drops it.
        index.truncate_to(Offset::new(70)).unwrap();
        assert_eq!(index.entries(), 1);
        assert_eq!(index.last_timestamp(), Timestamp::new(1_000));
        assert_eq!(index.last_offset(), Offset::new(55));

        // Appends resume after truncation.
        assert!(index.maybe_append(Timestamp::new(1_500), Offset::new(60)).unwrap());
        assert_eq!(index.lookup(Timestamp::new(1_700)).unwrap(), entry(1_500, 60));
    }

    #[test]
    fn seal_round_trip_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00000000000000000050.timeindex");
        {
            let index =
                TimeIndex::open(&path, Offset::new(50), &IndexConfig::default(), true).unwrap();
            assert!(index.maybe_append(Timestamp::new(1_000), Offset::new(55)).unwrap());
            assert!(index.maybe_append(Timestamp::new(2_000), Offset::new(70)).unwrap());
            index.make_read_only().unwrap();
            index.close();
        }

        // Two 12-byte entries.
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 24);

        let reopened =
            TimeIndex::open(&path, Offset::new(50), &IndexConfig::default(), false).unwrap();
        assert_eq!(reopened.entries(), 2);
        assert_eq!(reopened.lookup(Timestamp::new(1_999)).unwrap(), entry(1_000, 55));
        assert_eq!(reopened.last_timestamp(), Timestamp::new(2_000));
    }

    #[test]
    fn overflowing_relative_offset_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 0);

        let err = index
            .maybe_append(Timestamp::new(1_000), Offset::new(1 << 32))
            .unwrap_err();
        assert!(matches!(err, IndexError::OffsetOverflow { .. }));
        assert_eq!(index.entries(), 0);
    }

    #[test]
    fn capacity_counts_twelve_byte_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00000000000000000000.timeindex");
        // 30 bytes rounds down to two 12-byte slots.
        let config = IndexConfig::with_max_index_bytes(30);
        let index = TimeIndex::open(&path, Offset::ZERO, &config, true).unwrap();

        assert_eq!(index.max_entries(), 2);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 24);

        assert!(index.maybe_append(Timestamp::new(1), Offset::new(1)).unwrap());
        assert!(index.maybe_append(Timestamp::new(2), Offset::new(2)).unwrap());
        let err = index
            .maybe_append(Timestamp::new(3), Offset::new(3))
            .unwrap_err();
        assert!(matches!(err, IndexError::IndexFull { .. }));
    }
}
