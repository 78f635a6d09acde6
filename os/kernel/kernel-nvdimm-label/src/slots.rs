use alloc::vec;
use alloc::vec::Vec;

/// Free-slot bitmap of a namespace index.
///
/// Bit `n` (byte `n / 8`, bit `n % 8`) describes label slot `n`:
/// `1` = free, `0` = in use. Bits at or beyond `nslot` are padding and never
/// handed out.
///
/// The bitmap is only ever mutated on the staging index copy; the copy that is
/// currently authoritative on media is left untouched until the staging copy
/// is committed.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FreeSlotMap {
    bits: Vec<u8>,
    nslot: u32,
}

impl FreeSlotMap {
    /// A bitmap with every one of `nslot` slots free.
    #[must_use]
    pub fn all_free(nslot: u32) -> Self {
        let mut bits = vec![0u8; nslot.div_ceil(8) as usize];
        for slot in 0..nslot {
            bits[(slot / 8) as usize] |= 1 << (slot % 8);
        }
        Self { bits, nslot }
    }

    /// Adopt an on-media bitmap verbatim (padding bits included).
    ///
    /// `bytes` is truncated or zero-extended to `ceil(nslot / 8)` bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8], nslot: u32) -> Self {
        let len = nslot.div_ceil(8) as usize;
        let mut bits = vec![0u8; len];
        let n = len.min(bytes.len());
        bits[..n].copy_from_slice(&bytes[..n]);
        Self { bits, nslot }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    #[must_use]
    pub const fn nslot(&self) -> u32 {
        self.nslot
    }

    /// Whether `slot` is free. Out-of-range slots report `false`.
    #[must_use]
    pub fn is_free(&self, slot: u32) -> bool {
        slot < self.nslot && self.bits[(slot / 8) as usize] & (1 << (slot % 8)) != 0
    }

    /// Claim the lowest free slot.
    pub fn alloc_slot(&mut self) -> Option<u32> {
        for (i, byte) in (0u32..).zip(self.bits.iter_mut()) {
            if *byte == 0 {
                continue;
            }
            let slot = i * 8 + byte.trailing_zeros();
            if slot >= self.nslot {
                return None;
            }
            *byte &= !(1 << (slot % 8));
            return Some(slot);
        }
        None
    }

    /// Release `slot`.
    ///
    /// Returns `true` if the slot was in use, `false` if it was already free
    /// (a double free) or out of range.
    pub fn free_slot(&mut self, slot: u32) -> bool {
        if slot >= self.nslot {
            return false;
        }
        let byte = &mut self.bits[(slot / 8) as usize];
        let mask = 1 << (slot % 8);
        let was_used = *byte & mask == 0;
        *byte |= mask;
        was_used
    }

    /// Number of free slots.
    #[must_use]
    pub fn count_free(&self) -> u32 {
        (0..self.nslot).fold(0, |free, s| free + u32::from(self.is_free(s)))
    }

    /// Slots currently in use, in ascending order.
    pub fn used_slots(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.nslot).filter(|&s| !self.is_free(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_after_nslot_allocations() {
        let mut map = FreeSlotMap::all_free(13);
        for expected in 0..13 {
            assert_eq!(map.alloc_slot(), Some(expected));
        }
        assert_eq!(map.alloc_slot(), None);
        assert_eq!(map.count_free(), 0);
    }

    #[test]
    fn padding_bits_are_never_allocated() {
        // Corrupt padding: every bit set, including those past nslot.
        let mut map = FreeSlotMap::from_bytes(&[0x00, 0xFF], 10);
        assert_eq!(map.alloc_slot(), Some(8));
        assert_eq!(map.alloc_slot(), Some(9));
        assert_eq!(map.alloc_slot(), None);
    }

    #[test]
    fn free_reports_double_free() {
        let mut map = FreeSlotMap::all_free(8);
        assert!(!map.free_slot(3), "never-allocated slot is already free");
        let slot = map.alloc_slot().unwrap();
        assert!(map.free_slot(slot));
        assert!(!map.free_slot(slot));
        assert!(!map.free_slot(8));
    }

    #[test]
    fn freed_slot_is_reused_first() {
        let mut map = FreeSlotMap::all_free(16);
        let a = map.alloc_slot().unwrap();
        let b = map.alloc_slot().unwrap();
        let _c = map.alloc_slot().unwrap();
        map.free_slot(b);
        assert_eq!(map.alloc_slot(), Some(b));
        map.free_slot(a);
        assert_eq!(map.count_free(), 14);
        assert_eq!(map.used_slots().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn large_maps_number_slots_exactly() {
        let mut map = FreeSlotMap::all_free(1016);
        for expected in 0..1000 {
            assert_eq!(map.alloc_slot(), Some(expected));
        }
        assert_eq!(map.count_free(), 16);
        assert!(map.free_slot(517));
        assert_eq!(map.count_free(), 17);
        assert_eq!(map.alloc_slot(), Some(517));
        assert_eq!(map.alloc_slot(), Some(1000));
    }

    #[test]
    fn bytes_round_trip() {
        let mut map = FreeSlotMap::all_free(20);
        map.alloc_slot();
        map.alloc_slot();
        let copy = FreeSlotMap::from_bytes(map.as_bytes(), 20);
        assert_eq!(copy, map);
        assert_eq!(copy.as_bytes(), &[0xFC, 0xFF, 0x0F]);
    }
}
