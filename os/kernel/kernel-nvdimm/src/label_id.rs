use core::fmt;
use kernel_nvdimm_label::{NamespaceLabel, Uuid};

/// Placement class of a namespace.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum NamespaceKind {
    /// Interleaved, contiguous, anchored at the top of each DIMM's mapping.
    Pmem,
    /// DIMM-local, fragmentable.
    Blk,
}

impl NamespaceKind {
    /// The kind a label describes, from its LOCAL flag.
    #[must_use]
    pub const fn of_label(label: &NamespaceLabel) -> Self {
        if label.is_local() { Self::Blk } else { Self::Pmem }
    }

    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Pmem => "pmem",
            Self::Blk => "blk",
        }
    }
}

/// Owner tag of a DPA allocation: namespace kind plus uuid.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LabelId {
    pub kind: NamespaceKind,
    pub uuid: Uuid,
}

impl LabelId {
    #[must_use]
    pub const fn new(kind: NamespaceKind, uuid: Uuid) -> Self {
        Self { kind, uuid }
    }

    #[must_use]
    pub const fn pmem(uuid: Uuid) -> Self {
        Self::new(NamespaceKind::Pmem, uuid)
    }

    #[must_use]
    pub const fn blk(uuid: Uuid) -> Self {
        Self::new(NamespaceKind::Blk, uuid)
    }

    #[must_use]
    pub const fn of_label(label: &NamespaceLabel) -> Self {
        Self::new(NamespaceKind::of_label(label), label.uuid)
    }

    /// Whether `label` belongs to this namespace and category.
    #[must_use]
    pub fn matches(&self, label: &NamespaceLabel) -> bool {
        *self == Self::of_label(label)
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind.prefix(), self.uuid)
    }
}
