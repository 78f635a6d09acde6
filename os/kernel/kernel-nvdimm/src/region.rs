use crate::{LabelId, NamespaceDescriptor, NamespaceKind};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Range;

/// Handle of a DIMM attached to a bus.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DimmId(usize);

impl DimmId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for DimmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nmem{}", self.0)
    }
}

/// Handle of a region registered with a bus.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RegionId(usize);

impl RegionId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region{}", self.0)
    }
}

/// One DIMM's share of a region: the DPA window namespaces may occupy.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Mapping {
    pub dimm: DimmId,
    pub start: u64,
    pub size: u64,
}

impl Mapping {
    #[must_use]
    pub const fn new(dimm: DimmId, start: u64, size: u64) -> Self {
        Self { dimm, start, size }
    }

    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start + self.size
    }

    #[must_use]
    pub const fn window(&self) -> Range<u64> {
        self.start..self.end()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegionKind {
    /// Interleaved persistent memory identified by its interleave-set cookie.
    Pmem { isetcookie: u64 },
    /// Block-window access to a single DIMM.
    Blk,
}

impl RegionKind {
    #[must_use]
    pub const fn namespace_kind(&self) -> NamespaceKind {
        match self {
            Self::Pmem { .. } => NamespaceKind::Pmem,
            Self::Blk => NamespaceKind::Blk,
        }
    }
}

/// Region topology as produced by platform discovery.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RegionDescriptor {
    pub kind: RegionKind,
    /// Mapping `i` hosts interleave position `i`.
    pub mappings: Vec<Mapping>,
}

impl RegionDescriptor {
    #[must_use]
    pub const fn pmem(isetcookie: u64, mappings: Vec<Mapping>) -> Self {
        Self {
            kind: RegionKind::Pmem { isetcookie },
            mappings,
        }
    }

    #[must_use]
    pub fn blk(mapping: Mapping) -> Self {
        Self {
            kind: RegionKind::Blk,
            mappings: alloc::vec![mapping],
        }
    }
}

/// A registered region and the namespaces published on it.
#[derive(Debug, Clone)]
pub struct Region {
    id: RegionId,
    descriptor: RegionDescriptor,
    pub(crate) namespaces: BTreeMap<LabelId, NamespaceDescriptor>,
}

impl Region {
    pub(crate) const fn new(id: RegionId, descriptor: RegionDescriptor) -> Self {
        Self {
            id,
            descriptor,
            namespaces: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> RegionId {
        self.id
    }

    #[must_use]
    pub const fn kind(&self) -> RegionKind {
        self.descriptor.kind
    }

    #[must_use]
    pub fn mappings(&self) -> &[Mapping] {
        &self.descriptor.mappings
    }

    /// Whether any mapping lives on `dimm`.
    #[must_use]
    pub fn uses_dimm(&self, dimm: DimmId) -> bool {
        self.descriptor.mappings.iter().any(|m| m.dimm == dimm)
    }

    /// Descriptors of the namespaces currently published on this region.
    pub fn namespaces(&self) -> impl Iterator<Item = &NamespaceDescriptor> {
        self.namespaces.values()
    }
}
