//! Shared lifecycle controller for the fixed-entry index variants.
//!
//! [`IndexCore`] composes the mapped region, the entry codec, and the
//! search engine, and enforces the locking and mutability discipline:
//!
//! - A single mutex guards the region, the live entry count, and the last
//!   appended entry while the index is writable. Writers and readers both
//!   go through it; a reader searches a [`SearchView`] snapshot taken
//!   under the lock, so the live prefix cannot move mid-search.
//! - Sealing trims the file to the live prefix, remaps it shared
//!   read-only, and publishes the immutable view through a write-once
//!   cell. From then on readers search without taking the lock at all.
//! - Closing releases the mapping and file handle; every subsequent
//!   operation fails with [`IndexError::Closed`]. Close is idempotent and
//!   also runs on drop.
//!
//! The variant wrappers ([`crate::OffsetIndex`], [`crate::TimeIndex`])
//! own the append semantics; everything else lives here.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use memmap2::Mmap;
use strata_types::Offset;

use crate::config::IndexConfig;
use crate::entry::IndexEntry;
use crate::error::{CorruptKind, IndexError};
use crate::region::MappedRegion;
use crate::search::{SearchMode, SearchView, largest_lower_bound_slot};

/// Mutable bookkeeping guarded by the index lock.
#[derive(Debug)]
pub(crate) struct CoreState<E> {
    region: MappedRegion,
    entry_count: usize,
    max_entries: usize,
    last_entry: Option<E>,
    writable: bool,
    closed: bool,
    /// File length observed at open when it was not entry-aligned.
    misaligned_len: Option<u64>,
}

impl<E: IndexEntry> CoreState<E> {
    pub(crate) fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub(crate) fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub(crate) fn last_entry(&self) -> Option<E> {
        self.last_entry
    }

    pub(crate) fn path(&self) -> PathBuf {
        self.region.path().to_owned()
    }
}

/// Immutable view published when the index seals.
#[derive(Debug)]
struct SealedView {
    /// `None` for a sealed empty index (a zero-length file has no
    /// mapping).
    map: Option<Arc<Mmap>>,
    entry_count: usize,
}

/// Region + codec + search, composed under one lock.
#[derive(Debug)]
pub(crate) struct IndexCore<E: IndexEntry> {
    base_offset: Offset,
    warm_slots: usize,
    state: Mutex<CoreState<E>>,
    sealed: OnceLock<SealedView>,
    closed: AtomicBool,
}

impl<E: IndexEntry + std::fmt::Debug> IndexCore<E> {
    /// Opens an index file, inferring the live entry count from its
    /// contents.
    pub(crate) fn open(
        path: &Path,
        base_offset: Offset,
        config: &IndexConfig,
        writable: bool,
    ) -> Result<Self, IndexError> {
        let entry_bytes = E::ENTRY_BYTES as u64;
        let region = MappedRegion::open(path, config.max_index_bytes, entry_bytes, writable)?;

        let misaligned_len = (region.len() % entry_bytes != 0).then_some(region.len());
        let max_entries = (region.len() / entry_bytes) as usize;
        let entry_count = infer_entry_count::<E>(region.buf(), max_entries);
        let last_entry =
            entry_count
                .checked_sub(1)
                .map(|slot| E::decode(region.buf(), slot, base_offset));
        let warm_slots = (config.warm_bytes / E::ENTRY_BYTES).max(1);

        tracing::debug!(
            path = %path.display(),
            base_offset = %base_offset,
            entries = entry_count,
            max_entries,
            writable,
            "opened index"
        );

        let core = Self {
            base_offset,
            warm_slots,
            state: Mutex::new(CoreState {
                region,
                entry_count,
                max_entries,
                last_entry,
                writable,
                closed: false,
                misaligned_len,
            }),
            sealed: OnceLock::new(),
            closed: AtomicBool::new(false),
        };

        if !writable {
            // A read-only open is sealed from the start: publish the
            // lock-free view immediately.
            let map = core
                .state
                .lock()
                .expect("index lock poisoned")
                .region
                .read_only_map();
            core.sealed
                .set(SealedView { map, entry_count })
                .expect("sealed view published once");
        }

        Ok(core)
    }

    pub(crate) fn base_offset(&self) -> Offset {
        self.base_offset
    }

    /// Acquires the index lock, failing if the index is closed.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, CoreState<E>>, IndexError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IndexError::Closed);
        }
        let state = self.state.lock().expect("index lock poisoned");
        if state.closed {
            return Err(IndexError::Closed);
        }
        Ok(state)
    }

    /// Acquires the lock for a mutation.
    ///
    /// # Panics
    ///
    /// Panics when the index is sealed: the host log layer owns the
    /// single-writer discipline, so mutating a read-only index is a
    /// caller bug rather than a runtime condition.
    pub(crate) fn lock_writable(&self) -> Result<MutexGuard<'_, CoreState<E>>, IndexError> {
        let state = self.lock()?;
        assert!(state.writable, "mutation on a read-only index");
        Ok(state)
    }

    /// Runs `f` over a consistent snapshot of the live prefix.
    ///
    /// Sealed indexes are searched without locking through the published
    /// immutable view; writable indexes hold the lock for the duration so
    /// the prefix cannot move underneath the search.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&SearchView<'_>) -> R) -> Result<R, IndexError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IndexError::Closed);
        }
        if let Some(sealed) = self.sealed.get() {
            let buf = sealed.map.as_deref().map_or(&[][..], |mmap| &mmap[..]);
            let view = SearchView::new(buf, sealed.entry_count, self.warm_slots, self.base_offset);
            return Ok(f(&view));
        }
        let state = self.lock()?;
        let view = self.view(&state);
        Ok(f(&view))
    }

    /// Snapshot of the live prefix under the lock.
    pub(crate) fn view<'a>(&self, state: &'a CoreState<E>) -> SearchView<'a> {
        SearchView::new(
            state.region.buf(),
            state.entry_count,
            self.warm_slots,
            self.base_offset,
        )
    }

    /// Writes a validated entry at the next slot and advances the
    /// bookkeeping. The caller has checked ordering, capacity, and range.
    pub(crate) fn push(&self, state: &mut CoreState<E>, entry: E) {
        let slot = state.entry_count;
        entry.encode(state.region.buf_mut(), slot, self.base_offset);
        state.entry_count += 1;
        state.last_entry = Some(entry);

        // The write cursor is derived from the entry count; it must stay
        // inside the mapping.
        debug_assert!(
            state.entry_count * E::ENTRY_BYTES <= state.region.len() as usize,
            "write cursor past the mapped region"
        );
    }

    /// Removes every entry.
    pub(crate) fn truncate_all(&self) -> Result<(), IndexError> {
        let mut state = self.lock_writable()?;
        self.cut_tail(&mut state, 0);
        tracing::debug!(path = %state.region.path().display(), "truncated index");
        Ok(())
    }

    /// Removes entries from the one matching `target` (exact hit on the
    /// compared component) or the first one above it.
    pub(crate) fn truncate_to_target(
        &self,
        target: u64,
        mode: SearchMode,
    ) -> Result<(), IndexError> {
        let mut state = self.lock_writable()?;
        let view = self.view(&state);
        let cut = match largest_lower_bound_slot::<E>(&view, target, mode) {
            // Every entry is at or above the target.
            None => 0,
            // Exact hit: the matching entry goes too.
            Some(slot) if view.component::<E>(slot, mode) == target => slot,
            // Keep everything strictly below the target.
            Some(slot) => slot + 1,
        };
        self.cut_tail(&mut state, cut);
        tracing::debug!(
            path = %state.region.path().display(),
            target,
            entries = state.entry_count,
            "truncated index to target"
        );
        Ok(())
    }

    /// Drops entries from `cut` onward and rebuilds the tail bookkeeping.
    ///
    /// Truncated bytes are not zeroed; the live prefix fully defines the
    /// index.
    fn cut_tail(&self, state: &mut CoreState<E>, cut: usize) {
        debug_assert!(cut <= state.entry_count, "cut past the live prefix");
        state.entry_count = cut;
        state.last_entry = cut
            .checked_sub(1)
            .map(|slot| E::decode(state.region.buf(), slot, self.base_offset));
    }

    /// Trims the file to the live prefix, remaps it read-only, and
    /// publishes the lock-free view. No-op on an already sealed index.
    pub(crate) fn make_read_only(&self) -> Result<(), IndexError> {
        let mut state = self.lock()?;
        if !state.writable {
            return Ok(());
        }
        let live_len = (state.entry_count * E::ENTRY_BYTES) as u64;
        let map = state.region.seal(live_len)?;
        state.writable = false;
        self.sealed
            .set(SealedView {
                map,
                entry_count: state.entry_count,
            })
            .expect("sealed view published once");
        tracing::debug!(
            path = %state.region.path().display(),
            entries = state.entry_count,
            bytes = live_len,
            "sealed index"
        );
        Ok(())
    }

    /// Re-expands a writable index to a new maximum size.
    ///
    /// Used by recovery to reactivate a previously trimmed index before
    /// further appends.
    ///
    /// # Panics
    ///
    /// Panics on a read-only index, or when the new size cannot hold the
    /// live prefix.
    pub(crate) fn resize(&self, new_max_bytes: u64) -> Result<(), IndexError> {
        let entry_bytes = E::ENTRY_BYTES as u64;
        assert!(
            new_max_bytes >= entry_bytes,
            "max index size {new_max_bytes} cannot hold a single {entry_bytes}-byte entry"
        );
        let mut state = self.lock_writable()?;
        let new_len = new_max_bytes - new_max_bytes % entry_bytes;
        assert!(
            new_len >= (state.entry_count as u64) * entry_bytes,
            "resize below the live prefix"
        );
        state.region.resize(new_len)?;
        state.max_entries = (new_len / entry_bytes) as usize;
        tracing::debug!(
            path = %state.region.path().display(),
            bytes = new_len,
            max_entries = state.max_entries,
            "resized index"
        );
        Ok(())
    }

    /// Forces dirty pages to disk. Best-effort; a failed flush is logged,
    /// not fatal.
    pub(crate) fn flush(&self) -> Result<(), IndexError> {
        let state = self.lock()?;
        state.region.flush();
        Ok(())
    }

    /// Verifies the structural invariants of the live prefix.
    pub(crate) fn sanity_check(&self) -> Result<(), IndexError> {
        let state = self.lock()?;

        if let Some(length) = state.misaligned_len {
            return Err(IndexError::Corrupt {
                path: state.path(),
                kind: CorruptKind::MisalignedLength {
                    length,
                    entry_bytes: E::ENTRY_BYTES,
                },
            });
        }

        // Re-scan the live prefix: keys must be strictly increasing.
        let mut prev: Option<u64> = None;
        for slot in 0..state.entry_count {
            let key = E::decode(state.region.buf(), slot, self.base_offset).key();
            if prev.is_some_and(|p| key <= p) {
                return Err(IndexError::Corrupt {
                    path: state.path(),
                    kind: CorruptKind::NonMonotonic { slot },
                });
            }
            prev = Some(key);
        }

        Ok(())
    }

    /// Unmaps and releases the file handle. Idempotent; also runs on
    /// drop.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock().expect("index lock poisoned");
        state.closed = true;
        state.region.close();
    }

    /// Closes the index and removes the backing file.
    ///
    /// Returns whether a file was actually removed; a second call finds
    /// nothing to remove.
    pub(crate) fn delete_if_exists(&self) -> Result<bool, IndexError> {
        self.closed.store(true, Ordering::Release);
        let mut state = self.state.lock().expect("index lock poisoned");
        state.closed = true;
        let removed = state.region.delete()?;
        tracing::debug!(
            path = %state.region.path().display(),
            removed,
            "deleted index file"
        );
        Ok(removed)
    }

    /// Renames the backing file.
    pub(crate) fn rename_to(&self, new_path: &Path) -> Result<(), IndexError> {
        let mut state = self.lock()?;
        state.region.rename_to(new_path)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lock-taking accessors
    // ------------------------------------------------------------------

    pub(crate) fn entries(&self) -> usize {
        self.state.lock().expect("index lock poisoned").entry_count
    }

    pub(crate) fn max_entries(&self) -> usize {
        self.state.lock().expect("index lock poisoned").max_entries
    }

    pub(crate) fn is_full(&self) -> bool {
        let state = self.state.lock().expect("index lock poisoned");
        state.entry_count >= state.max_entries
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.state.lock().expect("index lock poisoned").writable
    }

    pub(crate) fn last_entry(&self) -> Option<E> {
        self.state.lock().expect("index lock poisoned").last_entry
    }

    pub(crate) fn path(&self) -> PathBuf {
        self.state.lock().expect("index lock poisoned").path()
    }
}

impl<E: IndexEntry> Drop for IndexCore<E> {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let mut state = self.state.lock().expect("index lock poisoned");
            state.closed = true;
            state.region.close();
        }
    }
}

/// Longest strictly-increasing prefix of live entries.
///
/// Pre-allocated slots read back as zeroes, so an all-zero entry
/// terminates the scan. A zero-key entry at slot 0 is live only when its
/// value component is non-zero, which distinguishes a real first entry
/// from the pre-allocation sentinel.
fn infer_entry_count<E: IndexEntry>(buf: &[u8], max_entries: usize) -> usize {
    let mut prev_key: Option<u64> = None;
    for slot in 0..max_entries {
        // Decode against a zero base: inference compares raw stored keys.
        let entry = E::decode(buf, slot, Offset::ZERO);
        let live = match prev_key {
            Some(prev) => entry.key() > prev,
            None => entry.key() > 0 || entry.value() > 0,
        };
        if !live {
            return slot;
        }
        prev_key = Some(entry.key());
    }
    max_entries
}
