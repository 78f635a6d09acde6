use crate::{DimmId, LabelId, NamespaceKind};
use alloc::string::String;
use alloc::vec::Vec;
use kernel_nvdimm_label::Uuid;

/// Identity of a namespace as supplied by the caller of
/// [`create_or_resize`](crate::BusState::create_or_resize).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NamespaceDescriptor {
    pub uuid: Uuid,
    /// Stored in up to 64 bytes; longer names are truncated.
    pub name: String,
    pub kind: NamespaceKind,
    /// Sector size, BLK only. Zero selects the bus default.
    pub lbasize: u64,
}

impl NamespaceDescriptor {
    #[must_use]
    pub fn pmem(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
            kind: NamespaceKind::Pmem,
            lbasize: 0,
        }
    }

    #[must_use]
    pub fn blk(uuid: Uuid, name: impl Into<String>, lbasize: u64) -> Self {
        Self {
            uuid,
            name: name.into(),
            kind: NamespaceKind::Blk,
            lbasize,
        }
    }

    #[must_use]
    pub const fn label_id(&self) -> LabelId {
        LabelId::new(self.kind, self.uuid)
    }
}

/// One DIMM extent of a namespace.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct NamespaceExtent {
    pub dimm: DimmId,
    /// Interleave position (PMEM) or extent ordinal (BLK).
    pub position: u16,
    pub dpa: u64,
    pub len: u64,
    /// Label slot describing this extent, if one is committed.
    pub slot: Option<u32>,
}

/// A published namespace.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NamespaceInfo {
    pub descriptor: NamespaceDescriptor,
    /// Total size across all DIMMs.
    pub size: u64,
    pub extents: Vec<NamespaceExtent>,
}

impl NamespaceInfo {
    #[must_use]
    pub const fn label_id(&self) -> LabelId {
        self.descriptor.label_id()
    }
}
