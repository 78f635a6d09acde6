/// Reasons an on-media structure is rejected.
///
/// None of these are fatal to the caller: a rejected index copy is simply
/// treated as invalid, and a label area with no valid copy reads as empty.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LabelFormatError {
    #[error("buffer too short: need {needed} bytes, have {actual}")]
    TooShort { needed: usize, actual: usize },
    #[error("bad namespace index signature")]
    BadSignature,
    #[error("unsupported namespace index version {major}.{minor}")]
    BadVersion { major: u16, minor: u16 },
    #[error("checksum mismatch: stored {stored:#018x}, computed {computed:#018x}")]
    BadChecksum { stored: u64, computed: u64 },
    #[error("invalid sequence number {0:#x}")]
    BadSequence(u32),
    #[error("field `{field}` is {found:#x}, expected {expected:#x}")]
    BadOffset {
        field: &'static str,
        expected: u64,
        found: u64,
    },
    #[error("index size {mysize:#x} outside [{min:#x}, {max:#x}]")]
    BadSize { mysize: u64, min: u64, max: u64 },
    #[error("{nslot} label slots do not fit a {config_size:#x} byte label area")]
    SlotOverflow { nslot: u32, config_size: u64 },
    #[error("label area of {config_size:#x} bytes is too small")]
    AreaTooSmall { config_size: u64 },
    #[error("label claims slot {found}, stored in slot {expected}")]
    SlotMismatch { expected: u32, found: u32 },
}
