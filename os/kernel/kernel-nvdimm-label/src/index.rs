//! # Namespace Index Codec
//!
//! ```text
//! off  size  field
//!   0    16  signature "NAMESPACE_INDEX\0"
//!  16     4  flags
//!  20     4  sequence (low 2 bits)
//!  24     8  myoff
//!  32     8  otheroff
//!  40     8  mysize
//!  48     8  labeloff
//!  56     4  nslot
//!  60     2  major
//!  62     2  minor
//!  64     8  checksum (Fletcher-64 over mysize bytes, this field zeroed)
//!  72     -  free bitmap, ceil(nslot / 8) bytes, zero padding up to mysize
//! ```
//!
//! All fields are little-endian.

use crate::bytes::{
    read_bytes, read_u16_le, read_u32_le, read_u64_le, write_u16_le, write_u32_le, write_u64_le,
};
use crate::consts::{INDEX_HEADER_SIZE, INDEX_MAJOR, INDEX_MINOR, INDEX_SIGNATURE, LABEL_SIZE};
use crate::fletcher::fletcher64_words;
use crate::{FreeSlotMap, LabelAreaGeometry, LabelFormatError, Sequence};
use alloc::vec;
use alloc::vec::Vec;
use bitfield_struct::bitfield;

const OFF_FLAGS: usize = 16;
const OFF_SEQ: usize = 20;
const OFF_MYOFF: usize = 24;
const OFF_OTHEROFF: usize = 32;
const OFF_MYSIZE: usize = 40;
const OFF_LABELOFF: usize = 48;
const OFF_NSLOT: usize = 56;
const OFF_MAJOR: usize = 60;
const OFF_MINOR: usize = 62;
const OFF_CHECKSUM: usize = 64;
const OFF_FREE: usize = INDEX_HEADER_SIZE;

/// 32-bit word positions covered by the checksum field.
const CHECKSUM_WORDS: [usize; 2] = [OFF_CHECKSUM / 4, OFF_CHECKSUM / 4 + 1];

/// Namespace index `flags` word.
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct IndexFlags {
    /// Bit 0 (INIT): written by the initial format of the label area.
    pub init: bool,

    /// Bits 1..=31: Reserved.
    #[bits(31)]
    __: u32,
}

/// A decoded namespace index block.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NamespaceIndex {
    pub flags: IndexFlags,
    /// Raw on-media sequence field; see [`Sequence`].
    pub sequence: u32,
    pub myoff: u64,
    pub otheroff: u64,
    pub mysize: u64,
    pub labeloff: u64,
    pub nslot: u32,
    pub major: u16,
    pub minor: u16,
    pub checksum: u64,
    pub free: FreeSlotMap,
}

impl NamespaceIndex {
    /// A fresh index for copy `which` with every slot free.
    ///
    /// The checksum is left zero; call [`update_checksum`](Self::update_checksum)
    /// before encoding it for media.
    #[must_use]
    pub fn new(geometry: &LabelAreaGeometry, which: usize, sequence: Sequence) -> Self {
        let mut index = Self {
            flags: IndexFlags::new(),
            sequence: sequence.get(),
            myoff: 0,
            otheroff: 0,
            mysize: 0,
            labeloff: 0,
            nslot: 0,
            major: INDEX_MAJOR,
            minor: INDEX_MINOR,
            checksum: 0,
            free: FreeSlotMap::all_free(geometry.nslot()),
        };
        index.relocate(geometry, which);
        index
    }

    /// Rewrite the self-describing offsets so this index belongs to copy `which`.
    ///
    /// The free-slot bitmap is kept as is; it matches `geometry` only for
    /// indices built by [`new`](Self::new) or accepted by
    /// [`validate`](Self::validate).
    pub fn relocate(&mut self, geometry: &LabelAreaGeometry, which: usize) {
        self.myoff = geometry.index_offset(which);
        self.otheroff = geometry.index_offset(1 - which);
        self.mysize = geometry.index_size();
        self.labeloff = geometry.label_offset();
        self.nslot = geometry.nslot();
    }

    /// The sequence number, or `None` if the field is zero.
    #[must_use]
    pub const fn sequence(&self) -> Option<Sequence> {
        Sequence::from_raw(self.sequence)
    }

    /// Decode and structurally check an index block.
    ///
    /// Verifies signature, version, that `mysize` covers the header and
    /// bitmap and lies within `bytes`, and the checksum. Placement against a
    /// concrete label area is checked by [`validate`](Self::validate).
    ///
    /// # Errors
    /// The first [`LabelFormatError`] encountered.
    pub fn decode(bytes: &[u8]) -> Result<Self, LabelFormatError> {
        if bytes.len() < INDEX_HEADER_SIZE {
            return Err(LabelFormatError::TooShort {
                needed: INDEX_HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        if read_bytes::<16>(bytes, 0)? != INDEX_SIGNATURE {
            return Err(LabelFormatError::BadSignature);
        }

        let major = read_u16_le(bytes, OFF_MAJOR)?;
        let minor = read_u16_le(bytes, OFF_MINOR)?;
        if major != INDEX_MAJOR || minor != INDEX_MINOR {
            return Err(LabelFormatError::BadVersion { major, minor });
        }

        let nslot = read_u32_le(bytes, OFF_NSLOT)?;
        let mysize = read_u64_le(bytes, OFF_MYSIZE)?;
        let bitmap_len = nslot.div_ceil(8) as usize;
        let min = (INDEX_HEADER_SIZE + bitmap_len) as u64;
        let max = bytes.len() as u64;
        if mysize < min || mysize > max {
            return Err(LabelFormatError::BadSize { mysize, min, max });
        }

        let covered = &bytes[..mysize as usize];
        let stored = read_u64_le(bytes, OFF_CHECKSUM)?;
        let computed = checksum_of(covered);
        if stored != computed {
            return Err(LabelFormatError::BadChecksum { stored, computed });
        }

        Ok(Self {
            flags: IndexFlags::from_bits(read_u32_le(bytes, OFF_FLAGS)?),
            sequence: read_u32_le(bytes, OFF_SEQ)?,
            myoff: read_u64_le(bytes, OFF_MYOFF)?,
            otheroff: read_u64_le(bytes, OFF_OTHEROFF)?,
            mysize,
            labeloff: read_u64_le(bytes, OFF_LABELOFF)?,
            nslot,
            major,
            minor,
            checksum: stored,
            free: FreeSlotMap::from_bytes(&covered[OFF_FREE..OFF_FREE + bitmap_len], nslot),
        })
    }

    /// Check that this index describes copy `which` of a label area with the
    /// given geometry.
    ///
    /// # Errors
    /// The first [`LabelFormatError`] encountered.
    pub fn validate(
        &self,
        geometry: &LabelAreaGeometry,
        which: usize,
    ) -> Result<(), LabelFormatError> {
        if self.sequence().is_none() {
            return Err(LabelFormatError::BadSequence(self.sequence));
        }
        check_field("myoff", geometry.index_offset(which), self.myoff)?;
        check_field("otheroff", geometry.index_offset(1 - which), self.otheroff)?;
        check_field("labeloff", geometry.label_offset(), self.labeloff)?;

        let min = (INDEX_HEADER_SIZE + self.nslot.div_ceil(8) as usize) as u64;
        let max = geometry.index_size();
        if self.mysize < min || self.mysize > max {
            return Err(LabelFormatError::BadSize {
                mysize: self.mysize,
                min,
                max,
            });
        }

        let needed = u64::from(self.nslot) * LABEL_SIZE as u64 + 2 * geometry.index_size();
        if needed > geometry.config_size() {
            return Err(LabelFormatError::SlotOverflow {
                nslot: self.nslot,
                config_size: geometry.config_size(),
            });
        }
        check_field("nslot", u64::from(geometry.nslot()), u64::from(self.nslot))
    }

    /// [`decode`](Self::decode) followed by [`validate`](Self::validate).
    ///
    /// # Errors
    /// The first [`LabelFormatError`] encountered.
    pub fn parse(
        bytes: &[u8],
        geometry: &LabelAreaGeometry,
        which: usize,
    ) -> Result<Self, LabelFormatError> {
        let index = Self::decode(bytes)?;
        index.validate(geometry, which)?;
        Ok(index)
    }

    /// Serialize to exactly `mysize` bytes, using the stored checksum field.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let bitmap = self.free.as_bytes();
        let len = (self.mysize as usize).max(INDEX_HEADER_SIZE + bitmap.len());
        let mut buf = vec![0u8; len];
        buf[..16].copy_from_slice(&INDEX_SIGNATURE);
        write_u32_le(&mut buf, OFF_FLAGS, self.flags.into_bits());
        write_u32_le(&mut buf, OFF_SEQ, self.sequence);
        write_u64_le(&mut buf, OFF_MYOFF, self.myoff);
        write_u64_le(&mut buf, OFF_OTHEROFF, self.otheroff);
        write_u64_le(&mut buf, OFF_MYSIZE, self.mysize);
        write_u64_le(&mut buf, OFF_LABELOFF, self.labeloff);
        write_u32_le(&mut buf, OFF_NSLOT, self.nslot);
        write_u16_le(&mut buf, OFF_MAJOR, self.major);
        write_u16_le(&mut buf, OFF_MINOR, self.minor);
        write_u64_le(&mut buf, OFF_CHECKSUM, self.checksum);
        buf[OFF_FREE..OFF_FREE + bitmap.len()].copy_from_slice(bitmap);
        buf
    }

    /// Recompute the checksum over the encoded form.
    pub fn update_checksum(&mut self) {
        self.checksum = checksum_of(&self.encode());
    }
}

fn checksum_of(covered: &[u8]) -> u64 {
    fletcher64_words(covered, |word| CHECKSUM_WORDS.contains(&word))
}

fn check_field(field: &'static str, expected: u64, found: u64) -> Result<(), LabelFormatError> {
    if expected == found {
        Ok(())
    } else {
        Err(LabelFormatError::BadOffset {
            field,
            expected,
            found,
        })
    }
}
