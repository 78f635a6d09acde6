//! # Namespace DPA Allocator
//!
//! Grows and shrinks one namespace's footprint inside one DIMM's mapping
//! window. Two placement policies apply:
//!
//! - **PMEM** extents are contiguous and anchored at the top of the mapping:
//!   `[end - size, end)`. Growing re-anchors the single extent to the new
//!   total, shrinking moves its start up.
//! - **BLK** extents fragment freely. Growing fills gaps next to the
//!   namespace's existing extents before claiming new ones, shrinking trims
//!   from the highest extent down.
//!
//! Region-wide orchestration (one call per mapping) lives in the bus.

use crate::{DpaTracker, LabelId, NamespaceKind, NvdimmError};
use core::ops::Range;
use log::debug;

/// Release `n` bytes of `label_id` inside `window`, highest extent first.
///
/// # Errors
/// [`NvdimmError::Underrun`] if `label_id` owns fewer than `n` bytes there.
pub fn shrink(
    tracker: &mut DpaTracker,
    label_id: LabelId,
    window: &Range<u64>,
    n: u64,
) -> Result<(), NvdimmError> {
    let mut remaining = n;
    while remaining > 0 {
        let Some(top) = tracker.find(label_id, window).last().copied() else {
            return Err(NvdimmError::Underrun { remaining });
        };
        let Some(res) = tracker.get(top).copied() else {
            return Err(NvdimmError::NoDevice);
        };
        if res.len <= remaining {
            tracker.remove(top);
            remaining -= res.len;
            debug!("{label_id}: released [{:#x}, {:#x})", res.start, res.end());
            continue;
        }
        match label_id.kind {
            NamespaceKind::Pmem => tracker.adjust(top, res.start + remaining, res.len - remaining)?,
            NamespaceKind::Blk => tracker.adjust(top, res.start, res.len - remaining)?,
        }
        debug!(
            "{label_id}: trimmed {remaining:#x} bytes from [{:#x}, {:#x})",
            res.start,
            res.end()
        );
        remaining = 0;
    }
    Ok(())
}

/// Set the PMEM extent of `label_id` to `[window.end - total, window.end)`.
///
/// # Errors
/// - [`NvdimmError::NoSpace`] if `total` exceeds the window.
/// - [`NvdimmError::Busy`] if the new extent would overlap another
///   allocation.
/// - [`NvdimmError::Invalid`] if `label_id` owns more than one extent here.
pub fn grow_pmem(
    tracker: &mut DpaTracker,
    label_id: LabelId,
    window: &Range<u64>,
    total: u64,
) -> Result<(), NvdimmError> {
    let size = window.end - window.start;
    if total > size {
        return Err(NvdimmError::NoSpace {
            requested: total,
            available: size,
        });
    }
    let start = window.end - total;
    match tracker.find(label_id, window).as_slice() {
        [] => {
            tracker.grant(label_id, start, total)?;
        }
        [id] => tracker.adjust(*id, start, total)?,
        _ => return Err(NvdimmError::Invalid("PMEM namespace is not contiguous")),
    }
    debug!("{label_id}: anchored [{start:#x}, {:#x})", window.end);
    Ok(())
}

/// Claim `n` more bytes for BLK namespace `label_id` inside `window`.
///
/// Candidates, in priority order, re-evaluated after every grant:
/// 1. the gap directly below one of the namespace's extents (grow up);
/// 2. the gap directly above one of them (grow down);
/// 3. the lowest gap that fits the remainder, else the lowest gap, taken
///    partially.
///
/// # Errors
/// [`NvdimmError::Underrun`] if the window runs out of space. Grants made
/// before the failure stay in `tracker`.
pub fn scan_allocate(
    tracker: &mut DpaTracker,
    label_id: LabelId,
    window: &Range<u64>,
    n: u64,
) -> Result<(), NvdimmError> {
    let mut remaining = n;
    'scan: while remaining > 0 {
        let owned = tracker.find(label_id, window);

        for &id in &owned {
            let Some(res) = tracker.get(id).copied() else {
                continue;
            };
            let floor = tracker.prev_boundary(res.start).max(window.start);
            if floor < res.start {
                let take = (res.start - floor).min(remaining);
                tracker.adjust(id, res.start - take, res.len + take)?;
                remaining -= take;
                continue 'scan;
            }
        }

        for &id in &owned {
            let Some(res) = tracker.get(id).copied() else {
                continue;
            };
            let ceiling = tracker.next_boundary(res.end()).min(window.end);
            if res.end() < ceiling {
                let take = (ceiling - res.end()).min(remaining);
                tracker.adjust(id, res.start, res.len + take)?;
                remaining -= take;
                continue 'scan;
            }
        }

        let gaps = tracker.gaps(window);
        let fitting = gaps.iter().find(|gap| gap.end - gap.start >= remaining);
        let Some(gap) = fitting.or_else(|| gaps.first()) else {
            return Err(NvdimmError::Underrun { remaining });
        };
        let take = (gap.end - gap.start).min(remaining);
        tracker.grant(label_id, gap.start, take)?;
        remaining -= take;
    }

    tracker.merge_adjacent(label_id);
    debug!("{label_id}: granted {n:#x} bytes");
    Ok(())
}

/// Free space a PMEM namespace in `window` could grow into: the gap directly
/// below the top-anchored PMEM extent, or below the window end if there is
/// none.
#[must_use]
pub fn pmem_available(tracker: &DpaTracker, window: &Range<u64>) -> u64 {
    let top = tracker
        .iter()
        .filter(|(_, res)| res.end() == window.end && res.start >= window.start)
        .find(|(_, res)| res.label_id.kind == NamespaceKind::Pmem)
        .map_or(window.end, |(_, res)| res.start);
    top - tracker.prev_boundary(top).max(window.start)
}

/// Sum of free gaps inside `window`.
#[must_use]
pub fn blk_available(tracker: &DpaTracker, window: &Range<u64>) -> u64 {
    tracker.gaps(window).iter().map(|gap| gap.end - gap.start).sum()
}
