//! # DPA Range Tracker
//!
//! Per-DIMM set of allocated DIMM physical address ranges, each tagged with
//! the [`LabelId`] of its owner. Resources live in an arena and are handed
//! out as [`ResourceId`]s that stay valid until the resource is removed; a
//! separate start-ordered list makes neighbor lookups a linear scan.
//!
//! ## Invariants
//! - No two resources overlap, whatever their owner.
//! - No resource is empty.
//! - `order` lists every live resource exactly once, sorted by `start`.

use crate::{LabelId, NvdimmError};
use alloc::vec::Vec;
use core::ops::Range;

/// Arena handle of a [`DpaResource`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ResourceId(usize);

/// An allocated DPA range.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DpaResource {
    pub start: u64,
    pub len: u64,
    pub label_id: LabelId,
    /// Bounds changed since the owning label was last written.
    pub adjusted: bool,
}

impl DpaResource {
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start + self.len
    }

    const fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start < end && start < self.end()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DpaTracker {
    arena: Vec<Option<DpaResource>>,
    vacant: Vec<usize>,
    order: Vec<ResourceId>,
}

impl DpaTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            arena: Vec::new(),
            vacant: Vec::new(),
            order: Vec::new(),
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: ResourceId) -> Option<&DpaResource> {
        self.arena.get(id.0).and_then(Option::as_ref)
    }

    /// Resources in ascending `start` order.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, &DpaResource)> {
        self.order
            .iter()
            .filter_map(|&id| self.get(id).map(|res| (id, res)))
    }

    /// Claim `[start, start + len)` for `label_id`.
    ///
    /// # Errors
    /// - [`NvdimmError::Invalid`] for an empty or wrapping range.
    /// - [`NvdimmError::Busy`] if the range overlaps any existing resource.
    pub fn insert(
        &mut self,
        label_id: LabelId,
        start: u64,
        len: u64,
    ) -> Result<ResourceId, NvdimmError> {
        let end = Self::check_range(start, len)?;
        if self.iter().any(|(_, res)| res.overlaps(start, end)) {
            return Err(NvdimmError::Busy("DPA range overlaps an existing allocation"));
        }

        let res = DpaResource {
            start,
            len,
            label_id,
            adjusted: false,
        };
        let id = if let Some(slot) = self.vacant.pop() {
            self.arena[slot] = Some(res);
            ResourceId(slot)
        } else {
            self.arena.push(Some(res));
            ResourceId(self.arena.len() - 1)
        };
        self.link(id, start);
        Ok(id)
    }

    /// [`insert`](Self::insert) a fresh allocation no label describes yet,
    /// marked adjusted.
    ///
    /// # Errors
    /// As [`insert`](Self::insert).
    pub fn grant(
        &mut self,
        label_id: LabelId,
        start: u64,
        len: u64,
    ) -> Result<ResourceId, NvdimmError> {
        let id = self.insert(label_id, start, len)?;
        if let Some(res) = self.arena[id.0].as_mut() {
            res.adjusted = true;
        }
        Ok(id)
    }

    /// Move `id` to `[start, start + len)` and mark it adjusted.
    ///
    /// # Errors
    /// - [`NvdimmError::NoDevice`] for a stale handle.
    /// - [`NvdimmError::Invalid`] for an empty or wrapping range.
    /// - [`NvdimmError::Busy`] if the new bounds overlap another resource.
    pub fn adjust(&mut self, id: ResourceId, start: u64, len: u64) -> Result<(), NvdimmError> {
        if self.get(id).is_none() {
            return Err(NvdimmError::NoDevice);
        }
        let end = Self::check_range(start, len)?;
        if self
            .iter()
            .any(|(other, res)| other != id && res.overlaps(start, end))
        {
            return Err(NvdimmError::Busy("DPA range overlaps an existing allocation"));
        }

        self.unlink(id);
        if let Some(res) = self.arena[id.0].as_mut() {
            res.start = start;
            res.len = len;
            res.adjusted = true;
        }
        self.link(id, start);
        Ok(())
    }

    pub fn remove(&mut self, id: ResourceId) -> Option<DpaResource> {
        let res = self.arena.get_mut(id.0)?.take()?;
        self.unlink(id);
        self.vacant.push(id.0);
        Some(res)
    }

    /// Coalesce zero-gap neighbors owned by `label_id`. Returns the number of
    /// resources absorbed.
    pub fn merge_adjacent(&mut self, label_id: LabelId) -> usize {
        let mut merged = 0;
        let mut i = 0;
        while i + 1 < self.order.len() {
            let (a, b) = (self.order[i], self.order[i + 1]);
            let (Some(left), Some(right)) = (self.get(a).copied(), self.get(b).copied()) else {
                i += 1;
                continue;
            };
            if left.label_id == label_id
                && right.label_id == label_id
                && left.end() == right.start
            {
                self.remove(b);
                if let Some(res) = self.arena[a.0].as_mut() {
                    res.len += right.len;
                    res.adjusted = true;
                }
                merged += 1;
            } else {
                i += 1;
            }
        }
        merged
    }

    /// Resources of `label_id` intersecting `window`, in start order.
    #[must_use]
    pub fn find(&self, label_id: LabelId, window: &Range<u64>) -> Vec<ResourceId> {
        self.iter()
            .filter(|(_, res)| res.label_id == label_id && res.overlaps(window.start, window.end))
            .map(|(id, _)| id)
            .collect()
    }

    /// Total bytes owned by `label_id` on this DIMM.
    #[must_use]
    pub fn allocated(&self, label_id: LabelId) -> u64 {
        self.iter()
            .filter(|(_, res)| res.label_id == label_id)
            .map(|(_, res)| res.len)
            .sum()
    }

    /// Bytes owned by `label_id` inside `window`.
    #[must_use]
    pub fn allocated_within(&self, label_id: LabelId, window: &Range<u64>) -> u64 {
        self.iter()
            .filter(|(_, res)| res.label_id == label_id)
            .map(|(_, res)| {
                res.end()
                    .min(window.end)
                    .saturating_sub(res.start.max(window.start))
            })
            .sum()
    }

    /// Unallocated ranges inside `window`, lowest first.
    #[must_use]
    pub fn gaps(&self, window: &Range<u64>) -> Vec<Range<u64>> {
        let mut gaps = Vec::new();
        let mut cursor = window.start;
        for (_, res) in self.iter() {
            if res.end() <= cursor {
                continue;
            }
            if res.start >= window.end {
                break;
            }
            if res.start > cursor {
                gaps.push(cursor..res.start);
            }
            cursor = res.end();
        }
        if cursor < window.end {
            gaps.push(cursor..window.end);
        }
        gaps
    }

    /// Highest allocated address at or below `at`, `0` if none.
    #[must_use]
    pub fn prev_boundary(&self, at: u64) -> u64 {
        self.iter()
            .filter(|(_, res)| res.start < at)
            .map(|(_, res)| res.end().min(at))
            .max()
            .unwrap_or(0)
    }

    /// Lowest allocated address at or above `at`, `u64::MAX` if none.
    #[must_use]
    pub fn next_boundary(&self, at: u64) -> u64 {
        self.iter()
            .filter(|(_, res)| res.end() > at)
            .map(|(_, res)| res.start.max(at))
            .min()
            .unwrap_or(u64::MAX)
    }

    /// Clear the adjusted mark of every resource owned by `label_id`.
    pub fn clear_adjusted(&mut self, label_id: LabelId) {
        for res in self.arena.iter_mut().flatten() {
            if res.label_id == label_id {
                res.adjusted = false;
            }
        }
    }

    fn check_range(start: u64, len: u64) -> Result<u64, NvdimmError> {
        if len == 0 {
            return Err(NvdimmError::Invalid("empty DPA range"));
        }
        start
            .checked_add(len)
            .ok_or(NvdimmError::Invalid("DPA range wraps"))
    }

    fn link(&mut self, id: ResourceId, start: u64) {
        let pos = self
            .order
            .partition_point(|&other| self.get(other).is_some_and(|res| res.start < start));
        self.order.insert(pos, id);
    }

    fn unlink(&mut self, id: ResourceId) {
        self.order.retain(|&other| other != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_nvdimm_label::Uuid;

    fn blk(n: u128) -> LabelId {
        LabelId::blk(Uuid::from_u128(n))
    }

    fn spans(t: &DpaTracker) -> Vec<(u64, u64)> {
        t.iter().map(|(_, r)| (r.start, r.len)).collect()
    }

    #[test]
    fn overlapping_inserts_fail() {
        let mut t = DpaTracker::new();
        t.insert(blk(1), 0x1000, 0x1000).unwrap();
        assert_eq!(
            t.insert(blk(2), 0x1800, 0x1000),
            Err(NvdimmError::Busy("DPA range overlaps an existing allocation"))
        );
        assert!(t.insert(blk(2), 0x2000, 0x1000).is_ok());
        assert!(matches!(
            t.insert(blk(2), 0x3000, 0),
            Err(NvdimmError::Invalid(_))
        ));
    }

    #[test]
    fn kept_in_start_order() {
        let mut t = DpaTracker::new();
        t.insert(blk(1), 0x3000, 0x100).unwrap();
        let mid = t.insert(blk(1), 0x2000, 0x100).unwrap();
        t.insert(blk(2), 0x1000, 0x100).unwrap();
        assert_eq!(spans(&t), vec![(0x1000, 0x100), (0x2000, 0x100), (0x3000, 0x100)]);

        t.adjust(mid, 0x4000, 0x200).unwrap();
        assert_eq!(spans(&t), vec![(0x1000, 0x100), (0x3000, 0x100), (0x4000, 0x200)]);
        assert!(t.get(mid).unwrap().adjusted);
    }

    #[test]
    fn only_grants_start_adjusted() {
        let mut t = DpaTracker::new();
        let loaded = t.insert(blk(1), 0, 0x1000).unwrap();
        let granted = t.grant(blk(1), 0x2000, 0x1000).unwrap();
        assert!(!t.get(loaded).unwrap().adjusted);
        assert!(t.get(granted).unwrap().adjusted);
        t.clear_adjusted(blk(1));
        assert!(t.iter().all(|(_, r)| !r.adjusted));
    }

    #[test]
    fn adjust_refuses_new_overlap() {
        let mut t = DpaTracker::new();
        let a = t.insert(blk(1), 0, 0x1000).unwrap();
        t.insert(blk(2), 0x1000, 0x1000).unwrap();
        assert!(matches!(t.adjust(a, 0, 0x1001), Err(NvdimmError::Busy(_))));
        assert_eq!(t.get(a).unwrap().len, 0x1000);
    }

    #[test]
    fn zero_gap_neighbors_merge() {
        let mut t = DpaTracker::new();
        t.insert(blk(1), 0x1000, 0x1000).unwrap();
        t.insert(blk(1), 0x2000, 0x1000).unwrap();
        t.insert(blk(2), 0x3000, 0x1000).unwrap();
        assert_eq!(t.merge_adjacent(blk(1)), 1);
        assert_eq!(spans(&t), vec![(0x1000, 0x2000), (0x3000, 0x1000)]);
        assert_eq!(t.merge_adjacent(blk(1)), 0);
    }

    #[test]
    fn removed_handles_are_recycled() {
        let mut t = DpaTracker::new();
        let a = t.insert(blk(1), 0, 0x10).unwrap();
        assert_eq!(t.remove(a).map(|r| r.len), Some(0x10));
        assert!(t.remove(a).is_none());
        assert!(t.get(a).is_none());
        let b = t.insert(blk(1), 0x20, 0x10).unwrap();
        assert_eq!(a, b);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn gaps_and_boundaries() {
        let mut t = DpaTracker::new();
        t.insert(blk(1), 0x1000, 0x1000).unwrap();
        t.insert(blk(2), 0x4000, 0x1000).unwrap();
        assert_eq!(
            t.gaps(&(0..0x6000)),
            vec![0..0x1000, 0x2000..0x4000, 0x5000..0x6000]
        );
        assert_eq!(t.gaps(&(0x1800..0x4800)), vec![0x2000..0x4000]);
        assert_eq!(t.prev_boundary(0x4000), 0x2000);
        assert_eq!(t.prev_boundary(0x1800), 0x1800);
        assert_eq!(t.next_boundary(0x2000), 0x4000);
        assert_eq!(t.next_boundary(0x5000), u64::MAX);
    }

    #[test]
    fn allocation_totals() {
        let mut t = DpaTracker::new();
        t.insert(blk(1), 0x1000, 0x1000).unwrap();
        t.insert(blk(1), 0x8000, 0x1000).unwrap();
        assert_eq!(t.allocated(blk(1)), 0x2000);
        assert_eq!(t.allocated_within(blk(1), &(0..0x4000)), 0x1000);
        assert_eq!(t.allocated_within(blk(1), &(0x1800..0x8800)), 0x1000);
        assert_eq!(t.find(blk(1), &(0x4000..0x10000)).len(), 1);
        assert_eq!(t.allocated(blk(2)), 0);
    }
}
