//! Sparse offset → file-position index for a single log segment.
//!
//! The [`OffsetIndex`] maps absolute record offsets to byte positions in
//! the paired segment file, so a fetch starting at a given offset can
//! seek close to its target instead of scanning the segment from byte 0.
//! The index is *sparse*: the log layer appends one entry every few
//! kilobytes of records, and a lookup returns the nearest entry at or
//! below the target.
//!
//! # File Format
//!
//! The index lives alongside its segment, named after the segment's base
//! offset:
//!
//! ```text
//! 00000000000000000050.log    <- segment records
//! 00000000000000000050.index  <- this structure
//! ```
//!
//! The file is pre-allocated to the configured maximum and filled with
//! fixed 8-byte entries; there is no header, footer, or checksum:
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │  Offset  │  Size  │  Description               │
//! ├────────────────────────────────────────────────┤
//! │  8*N     │  4     │  Relative offset (u32 BE)  │
//! │  8*N+4   │  4     │  Byte position (u32 BE)    │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! Offsets are stored relative to the base offset so they fit 32 bits;
//! an append past that range fails with
//! [`IndexError::OffsetOverflow`] and the log layer rolls the segment.
//!
//! # Lifecycle
//!
//! Writable while its segment is active, sealed (trimmed to the live
//! prefix and remapped read-only) when the segment rolls, deleted when
//! retention drops the segment. Slots past the live prefix of a writable
//! file are indeterminate and ignored on reopen; the live count is
//! re-inferred from the longest strictly-increasing prefix.

use std::path::{Path, PathBuf};

use strata_types::Offset;

use crate::config::IndexConfig;
use crate::entry::OffsetPosition;
use crate::error::IndexError;
use crate::index::IndexCore;
use crate::search::{SearchMode, largest_lower_bound_slot, smallest_upper_bound_slot};

/// Sparse, memory-mapped offset index of one log segment.
///
/// One writer (the segment's owner) appends; any number of readers look
/// up concurrently. See the module docs for the locking discipline.
#[derive(Debug)]
pub struct OffsetIndex {
    core: IndexCore<OffsetPosition>,
}

impl OffsetIndex {
    /// Opens the index backed by `path`.
    ///
    /// A missing file is created and pre-allocated when `writable`;
    /// opening read-only expects a sealed file. The live entry count is
    /// inferred from the file contents.
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

    /// Finds the entry with the greatest offset at or below `target`.
    ///
    /// Before the first entry (or on an empty index) this returns
    /// `(base_offset, 0)`: the caller scans the segment from byte 0.
    pub fn lookup(&self, target: Offset) -> Result<OffsetPosition, IndexError> {
        let base = self.core.base_offset();
        self.core.read(|view| {
            match largest_lower_bound_slot::<OffsetPosition>(view, target.as_u64(), SearchMode::Key)
            {
                None => OffsetPosition {
                    offset: base,
                    position: 0,
                },
                Some(slot) => view.entry(slot),
            }
        })
    }

    /// Finds the first entry whose position is at or past
    /// `start.position + fetch_size`.
    ///
    /// The log layer uses this to cap a fetch so it ends on a record
    /// boundary guaranteed to lie past the requested byte range. Returns
    /// `None` when no indexed position is that far out.
    pub fn fetch_upper_bound_offset(
        &self,
        start: OffsetPosition,
        fetch_size: u32,
    ) -> Result<Option<OffsetPosition>, IndexError> {
        let target = u64::from(start.position) + u64::from(fetch_size);
        self.core.read(|view| {
            smallest_upper_bound_slot::<OffsetPosition>(view, target, SearchMode::Value)
                .map(|slot| view.entry(slot))
        })
    }

    /// Appends an entry mapping `offset` to `position`.
    ///
    /// # Errors
    ///
    /// - [`IndexError::IndexFull`] at capacity (the log layer rolls).
    /// - [`IndexError::InvalidOffset`] when `offset` is not greater than
    ///   the last appended offset.
    /// - [`IndexError::OffsetOverflow`] when `offset` does not fit the
    ///   32-bit relative range (the log layer rolls).
    ///
    /// # Panics
    ///
    /// Panics on a sealed index; appending there is a caller bug.
    pub fn append(&self, offset: Offset, position: u32) -> Result<(), IndexError> {
        let mut state = self.core.lock_writable()?;

        if state.entry_count() >= state.max_entries() {
            return Err(IndexError::IndexFull {
                path: state.path(),
                entries: state.entry_count(),
            });
        }
        if let Some(last) = state.last_entry()
            && offset <= last.offset
        {
            return Err(IndexError::InvalidOffset {
                offset,
                last: last.offset,
            });
        }
        let base = self.core.base_offset();
        let in_range = offset
            .checked_sub(base)
            .is_some_and(|relative| relative <= u64::from(u32::MAX));
        if !in_range {
            return Err(IndexError::OffsetOverflow {
                offset,
                base,
            });
        }

        self.core.push(&mut state, OffsetPosition { offset, position });
        Ok(())
    }

    /// Returns the entry at slot `n`.
    ///
    /// # Panics
    ///
    /// Panics when `n` is at or past the live entry count.
    pub fn entry(&self, n: usize) -> Result<OffsetPosition, IndexError> {
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

    /// Removes entries with absolute offset at or above `offset`.
    ///
    /// Idempotent: repeating the call leaves the same state.
    ///
    /// # Panics
    ///
    /// Panics on a sealed index.
    pub fn truncate_to(&self, offset: Offset) -> Result<(), IndexError> {
        self.core.truncate_to_target(offset.as_u64(), SearchMode::Key)
    }

    /// Trims the file to exactly the live prefix and remaps it
    /// read-only. Lookups from then on skip the lock. No-op when already
    /// sealed.
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
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Corrupt`] naming the defect; the host
    /// recovery path deletes the index and rebuilds it from the segment.
    pub fn sanity_check(&self) -> Result<(), IndexError> {
        self.core.sanity_check()
    }

    /// Unmaps and releases the file handle. Idempotent; also runs on
    /// drop.
    pub fn close(&self) {
        self.core.close();
    }

    /// Closes the index and removes the backing file (retention path).
    ///
    /// Returns whether a file was actually removed.
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
    use test_case::test_case;

    use super::*;
    use crate::error::CorruptKind;

    fn open_writable(dir: &Path, base: u64) -> OffsetIndex {
        let path = dir.join(format!("{base:020}.index"));
        OffsetIndex::open(path, Offset::new(base), &IndexConfig::default(), true).unwrap()
    }

    fn entry(offset: u64, position: u32) -> OffsetPosition {
        OffsetPosition {
            offset: Offset::new(offset),
            position,
        }
    }

    #[test]
    fn empty_index_lookup_returns_base_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 50);

        assert_eq!(index.lookup(Offset::new(100)).unwrap(), entry(50, 0));
        assert_eq!(
            index
                .fetch_upper_bound_offset(entry(50, 0), 1024)
                .unwrap(),
            None
        );
        assert_eq!(index.entries(), 0);
        assert_eq!(index.last_offset(), Offset::new(50));
    }

    #[test]
    fn single_append_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 50);
        index.append(Offset::new(55), 128).unwrap();

        assert_eq!(index.lookup(Offset::new(55)).unwrap(), entry(55, 128));
        assert_eq!(index.lookup(Offset::new(60)).unwrap(), entry(55, 128));
        assert_eq!(index.lookup(Offset::new(54)).unwrap(), entry(50, 0));
    }

    fn append_three(index: &OffsetIndex) {
        index.append(Offset::new(55), 0).unwrap();
        index.append(Offset::new(70), 4096).unwrap();
        index.append(Offset::new(95), 8192).unwrap();
    }

    #[test]
    fn monotonic_growth_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 50);
        append_three(&index);

        assert_eq!(index.lookup(Offset::new(80)).unwrap(), entry(70, 4096));
        assert_eq!(index.lookup(Offset::new(95)).unwrap(), entry(95, 8192));
        assert_eq!(index.lookup(Offset::new(200)).unwrap(), entry(95, 8192));
    }

    #[test]
    fn non_increasing_append_is_rejected_and_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 50);
        append_three(&index);

        let err = index.append(Offset::new(70), 12_000).unwrap_err();
        assert!(matches!(err, IndexError::InvalidOffset { .. }));
        assert_eq!(index.entries(), 3);
        assert_eq!(index.last_offset(), Offset::new(95));
        assert_eq!(index.lookup(Offset::new(200)).unwrap(), entry(95, 8192));
    }

    #[test]
    fn truncate_to_exact_hit_drops_the_match() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 50);
        append_three(&index);

        index.truncate_to(Offset::new(70)).unwrap();
        assert_eq!(index.entries(), 1);
        assert_eq!(index.last_offset(), Offset::new(55));
        assert_eq!(index.lookup(Offset::new(90)).unwrap(), entry(55, 0));
    }

    #[test]
    fn truncate_to_between_entries_keeps_strictly_lower() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 50);
        append_three(&index);

        index.truncate_to(Offset::new(80)).unwrap();
        assert_eq!(index.entries(), 2);
        assert_eq!(index.last_offset(), Offset::new(70));
    }

    #[test_case(50, 0 ; "below every entry")]
    #[test_case(55, 0 ; "exact hit on the first entry")]
    #[test_case(200, 3 ; "above every entry keeps all")]
    fn truncate_to_entry_counts(target: u64, remaining: usize) {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 50);
        append_three(&index);

        index.truncate_to(Offset::new(target)).unwrap();
        assert_eq!(index.entries(), remaining);
    }

    #[test]
    fn truncate_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 50);
        append_three(&index);

        index.truncate().unwrap();
        assert_eq!(index.entries(), 0);
        assert_eq!(index.last_offset(), Offset::new(50));
        assert_eq!(index.lookup(Offset::new(95)).unwrap(), entry(50, 0));

        // The slots are reusable after truncation.
        index.append(Offset::new(60), 64).unwrap();
        assert_eq!(index.lookup(Offset::new(61)).unwrap(), entry(60, 64));
    }

    #[test]
    fn seal_round_trip_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00000000000000000050.index");
        {
            let index = OffsetIndex::open(
                &path,
                Offset::new(50),
                &IndexConfig::default(),
                true,
            )
            .unwrap();
            append_three(&index);
            index.make_read_only().unwrap();
            index.close();
        }

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 24);

        let reopened = OffsetIndex::open(
            &path,
            Offset::new(50),
            &IndexConfig::default(),
            false,
        )
        .unwrap();
        assert_eq!(reopened.entries(), 3);
        assert!(!reopened.is_writable());
        assert_eq!(reopened.lookup(Offset::new(72)).unwrap(), entry(70, 4096));
        assert_eq!(reopened.entry(0).unwrap(), entry(55, 0));
        assert_eq!(reopened.entry(2).unwrap(), entry(95, 8192));
    }

    #[test]
    fn overflowing_relative_offset_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 0);

        let err = index.append(Offset::new(1 << 32), 0).unwrap_err();
        assert!(matches!(err, IndexError::OffsetOverflow { .. }));
        assert_eq!(index.entries(), 0);

        // The largest representable relative offset still fits.
        index.append(Offset::new(u64::from(u32::MAX)), 1).unwrap();
    }

    #[test]
    fn offset_below_base_is_an_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 50);

        let err = index.append(Offset::new(49), 0).unwrap_err();
        assert!(matches!(err, IndexError::OffsetOverflow { .. }));
    }

    #[test]
    fn misaligned_file_fails_sanity_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00000000000000000000.index");
        std::fs::write(&path, vec![0u8; 13]).unwrap();

        let index =
            OffsetIndex::open(&path, Offset::ZERO, &IndexConfig::default(), false).unwrap();
        let err = index.sanity_check().unwrap_err();
        assert!(matches!(
            err,
            IndexError::Corrupt {
                kind: CorruptKind::MisalignedLength {
                    length: 13,
                    entry_bytes: 8
                },
                ..
            }
        ));
    }

    #[test]
    fn full_index_rejects_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00000000000000000000.index");
        // Room for exactly two entries.
        let config = IndexConfig::with_max_index_bytes(16);
        let index = OffsetIndex::open(&path, Offset::ZERO, &config, true).unwrap();

        index.append(Offset::new(1), 10).unwrap();
        index.append(Offset::new(2), 20).unwrap();
        assert!(index.is_full());

        let err = index.append(Offset::new(3), 30).unwrap_err();
        assert!(matches!(err, IndexError::IndexFull { entries: 2, .. }));
    }

    #[test]
    fn resize_reopens_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00000000000000000000.index");
        let config = IndexConfig::with_max_index_bytes(16);
        let index = OffsetIndex::open(&path, Offset::ZERO, &config, true).unwrap();

        index.append(Offset::new(1), 10).unwrap();
        index.append(Offset::new(2), 20).unwrap();
        assert!(index.is_full());

        index.resize(64).unwrap();
        assert_eq!(index.max_entries(), 8);
        index.append(Offset::new(3), 30).unwrap();
        assert_eq!(index.lookup(Offset::new(3)).unwrap(), entry(3, 30));
    }

    #[test]
    fn reopen_writable_recovers_live_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00000000000000000050.index");
        {
            let index = OffsetIndex::open(
                &path,
                Offset::new(50),
                &IndexConfig::default(),
                true,
            )
            .unwrap();
            append_three(&index);
            // Dropped without sealing, as after a crash of the writer.
        }

        let reopened = OffsetIndex::open(
            &path,
            Offset::new(50),
            &IndexConfig::default(),
            true,
        )
        .unwrap();
        assert_eq!(reopened.entries(), 3);
        assert_eq!(reopened.last_offset(), Offset::new(95));
        reopened.append(Offset::new(96), 9000).unwrap();
        assert_eq!(reopened.entries(), 4);
    }

    #[test]
    fn closed_index_fails_every_operation() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 50);
        index.append(Offset::new(55), 0).unwrap();
        index.close();
        index.close(); // idempotent

        assert!(matches!(
            index.lookup(Offset::new(55)),
            Err(IndexError::Closed)
        ));
        assert!(matches!(
            index.append(Offset::new(60), 1),
            Err(IndexError::Closed)
        ));
        assert!(matches!(index.flush(), Err(IndexError::Closed)));
        assert!(matches!(index.sanity_check(), Err(IndexError::Closed)));
        assert!(matches!(
            index.truncate_to(Offset::new(55)),
            Err(IndexError::Closed)
        ));
    }

    #[test]
    fn delete_if_exists_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 50);
        let path = index.path();
        assert!(path.exists());

        assert!(index.delete_if_exists().unwrap());
        assert!(!path.exists());
        assert!(!index.delete_if_exists().unwrap());
    }

    #[test]
    fn rename_moves_the_backing_file() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_writable(dir.path(), 50);
        index.append(Offset::new(55), 128).unwrap();

        let new_path = dir.path().join("00000000000000000050.index.deleted");
        index.rename_to(&new_path).unwrap();
        assert_eq!(index.path(), new_path);
        assert!(new_path.exists());
        assert_eq!(index.lookup(Offset::new(55)).unwrap(), entry(55, 128));
    }

    #[test]
    fn sealed_empty_index_truncates_to_zero_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00000000000000000050.index");
        let index =
            OffsetIndex::open(&path, Offset::new(50), &IndexConfig::default(), true).unwrap();
        index.make_read_only().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        assert_eq!(index.lookup(Offset::new(60)).unwrap(), entry(50, 0));

        let reopened =
            OffsetIndex::open(&path, Offset::new(50), &IndexConfig::default(), false).unwrap();
        assert_eq!(reopened.entries(), 0);
    }

    #[test]
    fn one_writer_many_readers_observe_consistent_entries() {
        let dir = tempfile::tempdir().unwrap();
        let index = std::sync::Arc::new(open_writable(dir.path(), 0));
        let total: u64 = 2_000;

        std::thread::scope(|scope| {
            let writer = std::sync::Arc::clone(&index);
            scope.spawn(move || {
                for i in 1..=total {
                    // Position is a pure function of the offset, so any
                    // torn or misplaced entry is detectable below.
                    writer.append(Offset::new(i), (i * 100) as u32).unwrap();
                }
            });

            for _ in 0..4 {
                let reader = std::sync::Arc::clone(&index);
                scope.spawn(move || {
                    for target in (1..=total).rev() {
                        let found = reader.lookup(Offset::new(target)).unwrap();
                        let offset = found.offset.as_u64();
                        assert!(offset <= target);
                        if offset == 0 {
                            assert_eq!(found.position, 0);
                        } else {
                            assert_eq!(u64::from(found.position), offset * 100);
                        }
                    }
                });
            }
        });

        assert_eq!(index.entries(), total as usize);
    }
}
