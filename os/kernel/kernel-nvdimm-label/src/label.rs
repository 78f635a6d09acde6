//! # Namespace Label Codec
//!
//! ```text
//! off  size  field
//!   0    16  uuid
//!  16    64  name (NUL padded)
//!  80     4  flags
//!  84     2  nlabel
//!  86     2  position
//!  88     8  isetcookie
//!  96     8  dpa
//! 104     8  rawsize
//! 112     4  slot
//! 116     8  lbasize
//! 124     4  reserved, zero
//! ```

use crate::LabelFormatError;
use crate::bytes::{
    read_bytes, read_u16_le, read_u32_le, read_u64_le, write_u16_le, write_u32_le, write_u64_le,
};
use crate::consts::{LABEL_NAME_LEN, LABEL_SIZE};
use bitfield_struct::bitfield;
use uuid::Uuid;

const OFF_UUID: usize = 0;
const OFF_NAME: usize = 16;
const OFF_FLAGS: usize = 80;
const OFF_NLABEL: usize = 84;
const OFF_POSITION: usize = 86;
const OFF_ISETCOOKIE: usize = 88;
const OFF_DPA: usize = 96;
const OFF_RAWSIZE: usize = 104;
const OFF_SLOT: usize = 112;
const OFF_LBASIZE: usize = 116;

/// Namespace label `flags` word.
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct LabelFlags {
    /// Bit 0 (LOCAL): the label describes a BLK (DIMM-local) extent.
    pub local: bool,
    /// Bit 1 (READ_ONLY).
    pub read_only: bool,
    /// Bit 2 (BTT): the namespace carries a block translation table.
    pub btt: bool,
    /// Bit 3 (UPDATING): a multi-DIMM update of this label set is in flight.
    pub updating: bool,

    /// Bits 4..=31: Reserved.
    #[bits(28)]
    __: u32,
}

/// One DIMM's contribution to a namespace.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NamespaceLabel {
    pub uuid: Uuid,
    /// Raw name bytes, NUL padded. See [`name_str`](Self::name_str).
    pub name: [u8; LABEL_NAME_LEN],
    pub flags: LabelFlags,
    /// Number of labels composing the namespace.
    pub nlabel: u16,
    /// Interleave position (PMEM) or extent ordinal (BLK).
    pub position: u16,
    /// Interleave-set identity; zero for BLK labels.
    pub isetcookie: u64,
    pub dpa: u64,
    pub rawsize: u64,
    /// Slot this label was written to.
    pub slot: u32,
    /// Sector size; BLK only.
    pub lbasize: u64,
}

impl Default for NamespaceLabel {
    fn default() -> Self {
        Self {
            uuid: Uuid::nil(),
            name: [0; LABEL_NAME_LEN],
            flags: LabelFlags::new(),
            nlabel: 0,
            position: 0,
            isetcookie: 0,
            dpa: 0,
            rawsize: 0,
            slot: 0,
            lbasize: 0,
        }
    }
}

impl NamespaceLabel {
    /// Decode a label record.
    ///
    /// # Errors
    /// [`LabelFormatError::TooShort`] if `bytes` holds less than one label.
    pub fn decode(bytes: &[u8]) -> Result<Self, LabelFormatError> {
        if bytes.len() < LABEL_SIZE {
            return Err(LabelFormatError::TooShort {
                needed: LABEL_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            uuid: Uuid::from_bytes(read_bytes::<16>(bytes, OFF_UUID)?),
            name: read_bytes::<LABEL_NAME_LEN>(bytes, OFF_NAME)?,
            flags: LabelFlags::from_bits(read_u32_le(bytes, OFF_FLAGS)?),
            nlabel: read_u16_le(bytes, OFF_NLABEL)?,
            position: read_u16_le(bytes, OFF_POSITION)?,
            isetcookie: read_u64_le(bytes, OFF_ISETCOOKIE)?,
            dpa: read_u64_le(bytes, OFF_DPA)?,
            rawsize: read_u64_le(bytes, OFF_RAWSIZE)?,
            slot: read_u32_le(bytes, OFF_SLOT)?,
            lbasize: read_u64_le(bytes, OFF_LBASIZE)?,
        })
    }

    /// Decode the label stored in `slot`, rejecting stale records whose
    /// self-recorded slot differs.
    ///
    /// # Errors
    /// [`LabelFormatError::SlotMismatch`] or a decode error.
    pub fn decode_slot(bytes: &[u8], slot: u32) -> Result<Self, LabelFormatError> {
        let label = Self::decode(bytes)?;
        if label.slot != slot {
            return Err(LabelFormatError::SlotMismatch {
                expected: slot,
                found: label.slot,
            });
        }
        Ok(label)
    }

    #[must_use]
    pub fn encode(&self) -> [u8; LABEL_SIZE] {
        let mut buf = [0u8; LABEL_SIZE];
        buf[OFF_UUID..OFF_UUID + 16].copy_from_slice(self.uuid.as_bytes());
        buf[OFF_NAME..OFF_NAME + LABEL_NAME_LEN].copy_from_slice(&self.name);
        write_u32_le(&mut buf, OFF_FLAGS, self.flags.into_bits());
        write_u16_le(&mut buf, OFF_NLABEL, self.nlabel);
        write_u16_le(&mut buf, OFF_POSITION, self.position);
        write_u64_le(&mut buf, OFF_ISETCOOKIE, self.isetcookie);
        write_u64_le(&mut buf, OFF_DPA, self.dpa);
        write_u64_le(&mut buf, OFF_RAWSIZE, self.rawsize);
        write_u32_le(&mut buf, OFF_SLOT, self.slot);
        write_u64_le(&mut buf, OFF_LBASIZE, self.lbasize);
        buf
    }

    /// The name up to the first NUL; invalid UTF-8 yields the longest valid
    /// prefix.
    #[must_use]
    pub fn name_str(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(LABEL_NAME_LEN);
        match core::str::from_utf8(&self.name[..len]) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&self.name[..e.valid_up_to()]).unwrap_or_default(),
        }
    }

    /// Store `name`, truncated on a character boundary to fit the field.
    pub fn set_name(&mut self, name: &str) {
        let mut len = name.len().min(LABEL_NAME_LEN);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        self.name = [0; LABEL_NAME_LEN];
        self.name[..len].copy_from_slice(&name.as_bytes()[..len]);
    }

    /// Whether this is a BLK (LOCAL) label.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.flags.local()
    }

    /// Exclusive end of the described extent.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.dpa.saturating_add(self.rawsize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NamespaceLabel {
        let mut label = NamespaceLabel {
            uuid: Uuid::from_u128(0x1234_5678_9abc_def0_0fed_cba9_8765_4321),
            flags: LabelFlags::new().with_updating(true),
            nlabel: 2,
            position: 1,
            isetcookie: 0xdead_beef_cafe_f00d,
            dpa: 0x0020_0000,
            rawsize: 0x0020_0000,
            slot: 7,
            ..NamespaceLabel::default()
        };
        label.set_name("pmem0");
        label
    }

    #[test]
    fn round_trip() {
        let label = sample();
        let bytes = label.encode();
        assert_eq!(NamespaceLabel::decode(&bytes).unwrap(), label);
        assert_eq!(NamespaceLabel::decode_slot(&bytes, 7).unwrap(), label);
    }

    #[test]
    fn layout_is_bit_exact() {
        let bytes = sample().encode();
        assert_eq!(bytes[0], 0x12);
        assert_eq!(&bytes[16..21], b"pmem0");
        assert_eq!(bytes[21], 0);
        assert_eq!(read_u32_le(&bytes, 80).unwrap(), 0b1000);
        assert_eq!(read_u16_le(&bytes, 84).unwrap(), 2);
        assert_eq!(read_u16_le(&bytes, 86).unwrap(), 1);
        assert_eq!(read_u64_le(&bytes, 88).unwrap(), 0xdead_beef_cafe_f00d);
        assert_eq!(read_u64_le(&bytes, 96).unwrap(), 0x0020_0000);
        assert_eq!(read_u32_le(&bytes, 112).unwrap(), 7);
        assert!(bytes[124..].iter().all(|&b| b == 0));
    }

    #[test]
    fn stale_slot_is_rejected() {
        let bytes = sample().encode();
        assert_eq!(
            NamespaceLabel::decode_slot(&bytes, 3),
            Err(LabelFormatError::SlotMismatch {
                expected: 3,
                found: 7
            })
        );
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(matches!(
            NamespaceLabel::decode(&[0u8; 100]),
            Err(LabelFormatError::TooShort { needed: 128, .. })
        ));
    }

    #[test]
    fn long_names_are_truncated_on_char_boundary() {
        let mut label = NamespaceLabel::default();
        let long = "é".repeat(40);
        label.set_name(&long);
        assert_eq!(label.name_str().len(), 64);
        assert_eq!(label.name_str(), "é".repeat(32));

        label.set_name(&"x".repeat(63));
        label.set_name("a");
        assert_eq!(label.name_str(), "a");
    }

    #[test]
    fn flags_map_to_documented_bits() {
        let flags = LabelFlags::new().with_local(true).with_btt(true);
        assert_eq!(flags.into_bits(), 0b101);
        assert!(LabelFlags::from_bits(0b10).read_only());
    }
}
