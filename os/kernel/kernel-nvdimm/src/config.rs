/// Runtime policy of an [`NvdimmBus`](crate::NvdimmBus).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BusConfig {
    /// Granularity of per-DIMM namespace sizes, in bytes. Power of two.
    pub alignment: u64,
    /// Sector size recorded for BLK namespaces created without one.
    pub default_lbasize: u64,
    /// Format an unformatted label area on the first label mutation instead
    /// of failing with [`NvdimmError::Unformatted`](crate::NvdimmError::Unformatted).
    pub auto_format: bool,
}

impl BusConfig {
    pub const DEFAULT: Self = Self {
        alignment: 4096,
        default_lbasize: 512,
        auto_format: true,
    };

    #[must_use]
    pub const fn new() -> Self {
        Self::DEFAULT
    }

    #[must_use]
    pub const fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    #[must_use]
    pub const fn with_default_lbasize(mut self, lbasize: u64) -> Self {
        self.default_lbasize = lbasize;
        self
    }

    #[must_use]
    pub const fn with_auto_format(mut self, auto_format: bool) -> Self {
        self.auto_format = auto_format;
        self
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
