//! # On-Media Constants

/// Signature at the start of every namespace index block.
pub const INDEX_SIGNATURE: [u8; 16] = *b"NAMESPACE_INDEX\0";

/// Size of the fixed namespace index header; the free bitmap follows it.
pub const INDEX_HEADER_SIZE: usize = 72;

/// Namespace indices are padded to a multiple of this many bytes.
pub const INDEX_ALIGN: u64 = 256;

/// Size of one label slot.
pub const LABEL_SIZE: usize = 128;

/// Bytes reserved for the namespace name inside a label.
pub const LABEL_NAME_LEN: usize = 64;

/// Index format major version.
pub const INDEX_MAJOR: u16 = 1;

/// Index format minor version.
pub const INDEX_MINOR: u16 = 1;

/// Divisor turning `config_size` into a slot count.
///
/// One label plus one byte of worst-case index overhead per label.
pub const SLOT_DIVISOR: u64 = LABEL_SIZE as u64 + 1;

/// Only the low two bits of an index sequence number are meaningful.
pub const SEQUENCE_MASK: u32 = 0b11;

/// A label area hosting fewer slots than this is rejected.
pub const MIN_SLOTS: u32 = 2;

const _: () = {
    assert!(INDEX_ALIGN.is_power_of_two());
    assert!(INDEX_HEADER_SIZE.is_multiple_of(8));
    assert!((INDEX_HEADER_SIZE as u64) < INDEX_ALIGN);
    assert!(LABEL_SIZE.is_multiple_of(8));
    assert!(LABEL_NAME_LEN < LABEL_SIZE);
};
