//! Binary search over the live prefix of a mapped index region.
//!
//! Searches run against a [`SearchView`], an immutable snapshot of the
//! mapping and entry count taken under the index lock (or from a sealed
//! mapping), so a concurrent append can never move the prefix underneath
//! a search.
//!
//! The steady-state fetch workload targets the newest entries, so both
//! query shapes probe a *warm* tail of the index first and only fall back
//! to the *cold* head when the target precedes it. The split changes the
//! page access pattern, never the result.

use strata_types::Offset;

use crate::entry::IndexEntry;

/// Which entry component a search compares against the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchMode {
    /// Compare the key component (offset or timestamp).
    Key,
    /// Compare the value component (position or offset).
    Value,
}

/// Immutable snapshot of the live prefix of an index mapping.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchView<'a> {
    buf: &'a [u8],
    entry_count: usize,
    warm_slots: usize,
    base_offset: Offset,
}

impl<'a> SearchView<'a> {
    pub(crate) fn new(
        buf: &'a [u8],
        entry_count: usize,
        warm_slots: usize,
        base_offset: Offset,
    ) -> Self {
        debug_assert!(warm_slots > 0, "warm region must hold at least one slot");
        Self {
            buf,
            entry_count,
            warm_slots,
            base_offset,
        }
    }

    pub(crate) fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Decodes the entry at `slot`.
    pub(crate) fn entry<E: IndexEntry>(&self, slot: usize) -> E {
        debug_assert!(
            slot < self.entry_count,
            "slot {slot} out of range ({} live entries)",
            self.entry_count
        );
        E::decode(self.buf, slot, self.base_offset)
    }

    /// The compared component of the entry at `slot`.
    pub(crate) fn component<E: IndexEntry>(&self, slot: usize, mode: SearchMode) -> u64 {
        let entry = self.entry::<E>(slot);
        match mode {
            SearchMode::Key => entry.key(),
            SearchMode::Value => entry.value(),
        }
    }

    /// First slot of the warm tail.
    fn first_warm_slot(&self) -> usize {
        self.entry_count.saturating_sub(self.warm_slots)
    }
}

/// Returns the greatest slot whose compared component is `<= target`, or
/// `None` when every live entry is above the target (or the index is
/// empty).
pub(crate) fn largest_lower_bound_slot<E: IndexEntry>(
    view: &SearchView<'_>,
    target: u64,
    mode: SearchMode,
) -> Option<usize> {
    if view.entry_count() == 0 {
        return None;
    }
    let last = view.entry_count() - 1;
    let first_warm = view.first_warm_slot();

    // Warm tail: covers every target at or past the first warm key.
    if view.component::<E>(first_warm, mode) <= target {
        return Some(floor_slot::<E>(view, target, mode, first_warm, last));
    }
    // Target precedes the whole index.
    if view.component::<E>(0, mode) > target {
        return None;
    }
    // Cold head: component(0) <= target < component(first_warm).
    Some(floor_slot::<E>(view, target, mode, 0, first_warm - 1))
}

/// Returns the least slot whose compared component is `>= target`, or
/// `None` when every live entry is below the target (or the index is
/// empty).
pub(crate) fn smallest_upper_bound_slot<E: IndexEntry>(
    view: &SearchView<'_>,
    target: u64,
    mode: SearchMode,
) -> Option<usize> {
    if view.entry_count() == 0 {
        return None;
    }
    let last = view.entry_count() - 1;
    if view.component::<E>(last, mode) < target {
        return None;
    }
    let first_warm = view.first_warm_slot();

    // The least qualifying slot lies in the warm tail only when every cold
    // slot is below the target.
    if first_warm > 0 && view.component::<E>(first_warm - 1, mode) >= target {
        return Some(ceil_slot::<E>(view, target, mode, 0, first_warm - 1));
    }
    Some(ceil_slot::<E>(view, target, mode, first_warm, last))
}

/// Greatest slot in `[lo, hi]` whose component is `<= target`.
///
/// Requires `component(lo) <= target`; the loop keeps that invariant on
/// `lo` while shrinking the range from above.
fn floor_slot<E: IndexEntry>(
    view: &SearchView<'_>,
    target: u64,
    mode: SearchMode,
    mut lo: usize,
    mut hi: usize,
) -> usize {
    debug_assert!(view.component::<E>(lo, mode) <= target);
    while lo < hi {
        let mid = hi - (hi - lo) / 2;
        if view.component::<E>(mid, mode) <= target {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

/// Least slot in `[lo, hi]` whose component is `>= target`.
///
/// Requires `component(hi) >= target`.
fn ceil_slot<E: IndexEntry>(
    view: &SearchView<'_>,
    target: u64,
    mode: SearchMode,
    mut lo: usize,
    mut hi: usize,
) -> usize {
    debug_assert!(view.component::<E>(hi, mode) >= target);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if view.component::<E>(mid, mode) >= target {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}
