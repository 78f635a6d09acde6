use crate::LabelFormatError;
use crate::consts::{INDEX_ALIGN, INDEX_HEADER_SIZE, LABEL_SIZE, MIN_SLOTS, SLOT_DIVISOR};

/// Align `value` upwards to `align` (must be a power of two).
#[inline]
#[must_use]
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + (align - 1)) & !(align - 1)
}

/// Placement of the index pair and label slots inside one DIMM's label area.
///
/// ```text
/// [0, index_size)                  index #0
/// [index_size, 2 * index_size)     index #1
/// [2 * index_size + k * 128, ..)   label slot k, k < nslot
/// ```
///
/// # Invariants
/// - `nslot >= MIN_SLOTS`
/// - `2 * index_size + nslot * LABEL_SIZE <= config_size`
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LabelAreaGeometry {
    config_size: u64,
    nslot: u32,
    index_size: u64,
}

impl LabelAreaGeometry {
    /// Derive the geometry of a label area of `config_size` bytes.
    ///
    /// `nslot` is `config_size / 129`; when the two padded indices do not fit
    /// beside that many labels, the slot count shrinks to what does fit.
    ///
    /// # Errors
    /// [`LabelFormatError::AreaTooSmall`] if the area cannot hold two indices
    /// and at least [`MIN_SLOTS`] labels.
    pub fn new(config_size: u64) -> Result<Self, LabelFormatError> {
        let too_small = LabelFormatError::AreaTooSmall { config_size };
        let mut nslot = u32::try_from(config_size / SLOT_DIVISOR).map_err(|_| too_small)?;
        let mut index_size = Self::index_size_for(nslot);
        if 2 * index_size + u64::from(nslot) * LABEL_SIZE as u64 > config_size {
            // Small areas: the index pair is padded beyond one byte per slot.
            let room = config_size.saturating_sub(2 * index_size) / LABEL_SIZE as u64;
            nslot = u32::try_from(room).map_err(|_| too_small)?;
            index_size = Self::index_size_for(nslot);
        }
        if nslot < MIN_SLOTS {
            return Err(too_small);
        }
        Ok(Self {
            config_size,
            nslot,
            index_size,
        })
    }

    /// Padded size of one index block describing `nslot` slots.
    #[must_use]
    pub const fn index_size_for(nslot: u32) -> u64 {
        align_up(
            INDEX_HEADER_SIZE as u64 + (nslot as u64).div_ceil(8),
            INDEX_ALIGN,
        )
    }

    #[must_use]
    pub const fn config_size(&self) -> u64 {
        self.config_size
    }

    #[must_use]
    pub const fn nslot(&self) -> u32 {
        self.nslot
    }

    #[must_use]
    pub const fn index_size(&self) -> u64 {
        self.index_size
    }

    /// Bytes of free-slot bitmap following the index header.
    #[must_use]
    pub const fn bitmap_len(&self) -> usize {
        self.nslot.div_ceil(8) as usize
    }

    /// Byte offset of index copy `which` (0 or 1).
    #[must_use]
    pub const fn index_offset(&self, which: usize) -> u64 {
        which as u64 * self.index_size
    }

    /// Byte offset of the first label slot.
    #[must_use]
    pub const fn label_offset(&self) -> u64 {
        2 * self.index_size
    }

    /// Byte offset of label slot `slot`.
    #[must_use]
    pub const fn slot_offset(&self, slot: u32) -> u64 {
        self.label_offset() + slot as u64 * LABEL_SIZE as u64
    }
}
