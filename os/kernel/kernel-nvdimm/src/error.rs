use crate::DimmId;
use alloc::boxed::Box;
use kernel_nvdimm_label::LabelFormatError;

const EIO: i32 = 5;
const ENXIO: i32 = 6;
const EBUSY: i32 = 16;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const ENOSPC: i32 = 28;

/// Failure of the byte-range transport to a DIMM's label area.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LabelIoError {
    #[error("access of {len} bytes at {offset:#x} exceeds label area of {size:#x} bytes")]
    OutOfRange { offset: u64, len: usize, size: u64 },
    /// Device-reported failure carrying a positive errno value.
    #[error("device error {0}")]
    Device(i32),
}

impl LabelIoError {
    #[must_use]
    pub const fn errno(&self) -> i32 {
        match self {
            Self::OutOfRange { .. } => -EIO,
            Self::Device(code) if *code > 0 => -*code,
            Self::Device(_) => -EIO,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum NvdimmError {
    #[error("requested {requested:#x} bytes, {available:#x} available")]
    NoSpace { requested: u64, available: u64 },
    #[error("busy: {0}")]
    Busy(&'static str),
    #[error("invalid: {0}")]
    Invalid(&'static str),
    #[error("no such device")]
    NoDevice,
    #[error("allocation underrun, {remaining:#x} bytes left unallocated")]
    Underrun { remaining: u64 },
    #[error("label area of {0} is not formatted")]
    Unformatted(DimmId),
    #[error(transparent)]
    Io(#[from] LabelIoError),
    #[error(transparent)]
    Format(#[from] LabelFormatError),
    /// A multi-DIMM update failed after earlier DIMMs were already changed.
    /// Those changes are kept.
    #[error("update failed on {dimm} after earlier DIMMs were changed: {source}")]
    Partial {
        dimm: DimmId,
        #[source]
        source: Box<NvdimmError>,
    },
}

impl NvdimmError {
    /// The negative errno value a kernel caller would return.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::NoSpace { .. } => -ENOSPC,
            Self::Busy(_) => -EBUSY,
            Self::Invalid(_) | Self::Format(_) => -EINVAL,
            Self::NoDevice => -ENODEV,
            Self::Underrun { .. } | Self::Unformatted(_) => -ENXIO,
            Self::Io(e) => e.errno(),
            Self::Partial { source, .. } => source.errno(),
        }
    }

    /// Whether this is the "nothing found" outcome rather than a failure.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NoDevice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(
            NvdimmError::NoSpace {
                requested: 1,
                available: 0
            }
            .errno(),
            -28
        );
        assert_eq!(NvdimmError::Busy("x").errno(), -16);
        assert_eq!(NvdimmError::Invalid("x").errno(), -22);
        assert_eq!(NvdimmError::NoDevice.errno(), -19);
        assert_eq!(NvdimmError::Underrun { remaining: 8 }.errno(), -6);
        assert_eq!(NvdimmError::from(LabelIoError::Device(5)).errno(), -5);
        assert_eq!(NvdimmError::from(LabelIoError::Device(-1)).errno(), -5);
        assert_eq!(
            NvdimmError::from(LabelFormatError::BadSignature).errno(),
            -22
        );
    }

    #[test]
    fn partial_reports_inner_errno() {
        let e = NvdimmError::Partial {
            dimm: DimmId::new(1),
            source: Box::new(NvdimmError::Busy("no free label slot")),
        };
        assert_eq!(e.errno(), -16);
        assert!(e.to_string().contains("nmem1"));
    }
}
