//! # NVDIMM Bus
//!
//! Owns the attached DIMMs and registered regions behind the single
//! allocation lock. Every mutation is a method of [`BusState`], reachable
//! only through a [`BusGuard`].
//!
//! ## Multi-DIMM updates
//!
//! A region-level resize walks the region's mappings in order and applies
//! the per-DIMM change to each. Each DIMM's change is staged on a copy of its
//! DPA tracker and only installed once its labels are committed, so a
//! failure leaves the failing DIMM as it was. DIMMs updated before the
//! failing one are **not** rolled back; such failures are reported as
//! [`NvdimmError::Partial`].
//!
//! PMEM label sets are written in two passes: first every position with
//! UPDATING set, then every position with it cleared.

use crate::allocator::{blk_available, grow_pmem, pmem_available, scan_allocate, shrink};
use crate::interleave::find_label_set;
use crate::scan::scan_blk;
use crate::writer::{blk_labels, delete_labels, pmem_label, refresh_labels, update_labels};
use crate::{
    BusConfig, Dimm, DimmId, DpaResource, DpaTracker, LabelArea, LabelAreaIo, LabelId, Mapping,
    NamespaceDescriptor, NamespaceExtent, NamespaceInfo, NamespaceKind, NvdimmError, Region,
    RegionDescriptor, RegionId, RegionKind,
};
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;
use log::{debug, info, warn};
use spin::{Mutex, MutexGuard};

/// Exclusive access to a bus's [`BusState`].
pub type BusGuard<'a, D> = MutexGuard<'a, BusState<D>>;

pub struct NvdimmBus<D> {
    state: Mutex<BusState<D>>,
}

impl<D> NvdimmBus<D> {
    #[must_use]
    pub const fn new(config: BusConfig) -> Self {
        Self {
            state: Mutex::new(BusState::new(config)),
        }
    }

    /// Acquire the allocation lock.
    pub fn lock(&self) -> BusGuard<'_, D> {
        self.state.lock()
    }

    /// Acquire the allocation lock if it is free.
    pub fn try_lock(&self) -> Option<BusGuard<'_, D>> {
        self.state.try_lock()
    }

    pub fn into_inner(self) -> BusState<D> {
        self.state.into_inner()
    }
}

impl<D> Default for NvdimmBus<D> {
    fn default() -> Self {
        Self::new(BusConfig::DEFAULT)
    }
}

/// Bus contents, accessible while holding the allocation lock.
pub struct BusState<D> {
    config: BusConfig,
    dimms: Vec<Option<Dimm<D>>>,
    regions: Vec<Option<Region>>,
}

impl<D> BusState<D> {
    #[must_use]
    pub const fn new(config: BusConfig) -> Self {
        Self {
            config,
            dimms: Vec::new(),
            regions: Vec::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &BusConfig {
        &self.config
    }

    #[must_use]
    pub fn dimm(&self, id: DimmId) -> Option<&Dimm<D>> {
        self.dimms.get(id.index()).and_then(Option::as_ref)
    }

    /// Direct access to a DIMM's transport, bypassing the label area.
    pub fn dimm_io_mut(&mut self, id: DimmId) -> Option<&mut D> {
        self.dimms
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .map(|dimm| &mut dimm.io)
    }

    pub fn dimms(&self) -> impl Iterator<Item = &Dimm<D>> {
        self.dimms.iter().flatten()
    }

    #[must_use]
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id.index()).and_then(Option::as_ref)
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().flatten()
    }

    fn dimm_ref(&self, id: DimmId) -> Result<&Dimm<D>, NvdimmError> {
        self.dimm(id).ok_or(NvdimmError::NoDevice)
    }

    fn dimm_mut(&mut self, id: DimmId) -> Result<&mut Dimm<D>, NvdimmError> {
        self.dimms
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(NvdimmError::NoDevice)
    }

    fn region_ref(&self, id: RegionId) -> Result<&Region, NvdimmError> {
        self.region(id).ok_or(NvdimmError::NoDevice)
    }

    fn region_mut(&mut self, id: RegionId) -> Result<&mut Region, NvdimmError> {
        self.regions
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(NvdimmError::NoDevice)
    }
}

impl<D: LabelAreaIo> BusState<D> {
    /// Attach a DIMM: probe its label area, select the current index, load
    /// the active labels and reserve the DPA ranges they describe.
    ///
    /// # Errors
    /// Transport failure, or a label area too small to hold an index.
    pub fn add_dimm(&mut self, io: D) -> Result<DimmId, NvdimmError> {
        let id = DimmId::new(self.dimms.len());
        let dimm = Dimm::attach(id, io)?;
        self.dimms.push(Some(dimm));
        Ok(id)
    }

    /// Detach a DIMM and hand back its transport.
    ///
    /// # Errors
    /// - [`NvdimmError::NoDevice`] for an unknown DIMM.
    /// - [`NvdimmError::Busy`] while a region maps it.
    pub fn remove_dimm(&mut self, id: DimmId) -> Result<D, NvdimmError> {
        if self.regions().any(|region| region.uses_dimm(id)) {
            return Err(NvdimmError::Busy("DIMM is mapped by a region"));
        }
        let dimm = self
            .dimms
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(NvdimmError::NoDevice)?;
        info!("{id}: detached");
        Ok(dimm.into_io())
    }

    /// Write a fresh, empty index pair to a DIMM without allocations.
    ///
    /// # Errors
    /// - [`NvdimmError::NoDevice`] for an unknown DIMM.
    /// - [`NvdimmError::Busy`] if the DIMM holds DPA allocations.
    /// - Transport failure.
    pub fn format_dimm(&mut self, id: DimmId) -> Result<(), NvdimmError> {
        let dimm = self.dimm_mut(id)?;
        if !dimm.dpa.is_empty() {
            return Err(NvdimmError::Busy("DIMM has allocated namespaces"));
        }
        dimm.area.format(&mut dimm.io)
    }

    /// Register a region.
    ///
    /// # Errors
    /// - [`NvdimmError::NoDevice`] if a mapping names an unknown DIMM.
    /// - [`NvdimmError::Invalid`] for no mappings, an empty or wrapping
    ///   mapping, a DIMM mapped twice, or a BLK region without exactly one
    ///   mapping.
    pub fn add_region(&mut self, descriptor: RegionDescriptor) -> Result<RegionId, NvdimmError> {
        let mappings = &descriptor.mappings;
        if mappings.is_empty() {
            return Err(NvdimmError::Invalid("region has no mappings"));
        }
        if descriptor.kind == RegionKind::Blk && mappings.len() != 1 {
            return Err(NvdimmError::Invalid("BLK region needs exactly one mapping"));
        }
        if u16::try_from(mappings.len()).is_err() {
            return Err(NvdimmError::Invalid("too many mappings"));
        }
        for (i, mapping) in mappings.iter().enumerate() {
            self.dimm_ref(mapping.dimm)?;
            if mapping.size == 0 || mapping.start.checked_add(mapping.size).is_none() {
                return Err(NvdimmError::Invalid("empty or wrapping mapping"));
            }
            if mappings[..i].iter().any(|other| other.dimm == mapping.dimm) {
                return Err(NvdimmError::Invalid("DIMM mapped twice"));
            }
        }

        let id = RegionId::new(self.regions.len());
        info!("{id}: {:?} with {} mappings", descriptor.kind, mappings.len());
        self.regions.push(Some(Region::new(id, descriptor)));
        Ok(id)
    }

    /// Unregister a region. Its namespaces stay on media.
    ///
    /// # Errors
    /// [`NvdimmError::NoDevice`] for an unknown region.
    pub fn remove_region(&mut self, id: RegionId) -> Result<Region, NvdimmError> {
        self.regions
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(NvdimmError::NoDevice)
    }

    /// Publish the namespaces the region's labels describe. Returns how many
    /// were found.
    ///
    /// # Errors
    /// - [`NvdimmError::NoDevice`] for an unknown region or DIMM.
    /// - [`NvdimmError::Invalid`] or [`NvdimmError::Busy`] for an
    ///   inconsistent PMEM label set; nothing is published.
    pub fn scan_region(&mut self, id: RegionId) -> Result<usize, NvdimmError> {
        let region = self.region_ref(id)?;
        let kind = region.kind();
        let mappings = region.mappings().to_vec();
        let areas = mappings
            .iter()
            .map(|mapping| self.dimm_ref(mapping.dimm).map(Dimm::area))
            .collect::<Result<Vec<&LabelArea>, _>>()?;

        let found = match kind {
            RegionKind::Pmem { isetcookie } => match find_label_set(isetcookie, &areas, &mappings) {
                Ok(identity) => {
                    if identity.updating {
                        warn!("{id}: pmem-{} was interrupted mid-update", identity.uuid);
                    }
                    vec![NamespaceDescriptor::pmem(identity.uuid, identity.name)]
                }
                Err(NvdimmError::NoDevice) => Vec::new(),
                Err(e) => {
                    warn!("{id}: label set rejected: {e}");
                    return Err(e);
                }
            },
            RegionKind::Blk => match (areas.first(), mappings.first()) {
                (Some(area), Some(mapping)) => scan_blk(area, mapping)
                    .into_iter()
                    .map(|ns| ns.descriptor)
                    .collect(),
                _ => Vec::new(),
            },
        };

        let region = self.region_mut(id)?;
        let count = found.len();
        for descriptor in found {
            info!("{id}: found {}", descriptor.label_id());
            region.namespaces.insert(descriptor.label_id(), descriptor);
        }
        Ok(count)
    }

    /// Namespaces published on `region`, with their current extents.
    ///
    /// # Errors
    /// [`NvdimmError::NoDevice`] for an unknown region or DIMM.
    pub fn list_namespaces(&self, id: RegionId) -> Result<Vec<NamespaceInfo>, NvdimmError> {
        let region = self.region_ref(id)?;
        let mut namespaces = Vec::new();
        for descriptor in region.namespaces() {
            let label_id = descriptor.label_id();
            let mut extents = Vec::new();
            for (position, mapping) in region.mappings().iter().enumerate() {
                let dimm = self.dimm_ref(mapping.dimm)?;
                let owned = dimm.dpa.find(label_id, &mapping.window());
                for (ordinal, res) in owned.iter().filter_map(|&r| dimm.dpa.get(r)).enumerate() {
                    let position = match label_id.kind {
                        NamespaceKind::Pmem => position,
                        NamespaceKind::Blk => ordinal,
                    };
                    let slot = dimm
                        .area
                        .active_labels()
                        .find(|label| label_id.matches(label) && label.dpa == res.start)
                        .map(|label| label.slot);
                    extents.push(NamespaceExtent {
                        dimm: mapping.dimm,
                        position: u16::try_from(position).unwrap_or(u16::MAX),
                        dpa: res.start,
                        len: res.len,
                        slot,
                    });
                }
            }
            namespaces.push(NamespaceInfo {
                descriptor: descriptor.clone(),
                size: extents.iter().map(|extent| extent.len).sum(),
                extents,
            });
        }
        Ok(namespaces)
    }

    /// Create a namespace or set its total size. A size of zero releases
    /// all of its capacity and labels.
    ///
    /// PMEM sizes are split evenly across the region's mappings; each share
    /// must be a multiple of [`BusConfig::alignment`], as must BLK sizes.
    ///
    /// # Errors
    /// - [`NvdimmError::NoDevice`] for an unknown region or DIMM.
    /// - [`NvdimmError::Invalid`] for a kind mismatch or a misaligned size.
    /// - [`NvdimmError::NoSpace`] if the request exceeds the namespace's
    ///   allocation plus the region's free space; nothing is changed.
    /// - [`NvdimmError::Busy`] if a PMEM region already hosts another
    ///   namespace, or no label slot is free.
    /// - [`NvdimmError::Partial`] if a DIMM failed after earlier DIMMs were
    ///   updated.
    pub fn create_or_resize(
        &mut self,
        id: RegionId,
        descriptor: &NamespaceDescriptor,
        size: u64,
    ) -> Result<(), NvdimmError> {
        let region = self.region_ref(id)?;
        let kind = region.kind();
        let mappings = region.mappings().to_vec();
        let label_id = descriptor.label_id();
        if descriptor.kind != kind.namespace_kind() {
            return Err(NvdimmError::Invalid("namespace kind does not match region"));
        }
        let mut descriptor = descriptor.clone();
        if descriptor.kind == NamespaceKind::Blk && descriptor.lbasize == 0 {
            descriptor.lbasize = self.config.default_lbasize;
        }

        match kind {
            RegionKind::Pmem { isetcookie } => {
                if region.namespaces.keys().any(|other| *other != label_id) {
                    return Err(NvdimmError::Busy("region already hosts a PMEM namespace"));
                }
                self.resize_pmem(&descriptor, isetcookie, &mappings, size)?;
            }
            RegionKind::Blk => self.resize_blk(&descriptor, &mappings, size)?,
        }

        let region = self.region_mut(id)?;
        if size == 0 {
            region.namespaces.remove(&label_id);
            info!("{id}: released {label_id}");
        } else {
            info!("{id}: {label_id} is {size:#x} bytes");
            region.namespaces.insert(label_id, descriptor);
        }
        Ok(())
    }

    /// Release a namespace's capacity on every mapping and drop its labels.
    ///
    /// # Errors
    /// - [`NvdimmError::NoDevice`] if the namespace is neither published nor
    ///   allocated on the region.
    /// - [`NvdimmError::Partial`] if a DIMM failed after earlier DIMMs were
    ///   updated.
    pub fn delete(&mut self, id: RegionId, label_id: &LabelId) -> Result<(), NvdimmError> {
        let region = self.region_ref(id)?;
        let mappings = region.mappings().to_vec();
        let published = region.namespaces.contains_key(label_id);
        let mut allocated = 0;
        for mapping in &mappings {
            allocated += self
                .dimm_ref(mapping.dimm)?
                .dpa
                .allocated_within(*label_id, &mapping.window());
        }
        if !published && allocated == 0 {
            return Err(NvdimmError::NoDevice);
        }

        let mut touched = false;
        for mapping in &mappings {
            self.release(*label_id, mapping)
                .map_err(|e| partial(touched, mapping.dimm, e))?;
            touched = true;
        }
        self.region_mut(id)?.namespaces.remove(label_id);
        info!("{id}: deleted {label_id}");
        Ok(())
    }

    /// Bytes `label_id` holds on `dimm`.
    ///
    /// # Errors
    /// [`NvdimmError::NoDevice`] for an unknown DIMM.
    pub fn per_dimm_allocated(&self, dimm: DimmId, label_id: &LabelId) -> Result<u64, NvdimmError> {
        Ok(self.dimm_ref(dimm)?.dpa.allocated(*label_id))
    }

    /// Capacity still available to namespaces on `region`.
    ///
    /// For PMEM regions this is the smallest per-DIMM gap below the
    /// top-anchored extent times the number of mappings; for BLK regions the
    /// sum of free gaps in the mapping.
    ///
    /// # Errors
    /// [`NvdimmError::NoDevice`] for an unknown region or DIMM.
    pub fn region_available(&self, id: RegionId) -> Result<u64, NvdimmError> {
        let region = self.region_ref(id)?;
        match region.kind() {
            RegionKind::Pmem { .. } => {
                let mut smallest = u64::MAX;
                for mapping in region.mappings() {
                    let dimm = self.dimm_ref(mapping.dimm)?;
                    smallest = smallest.min(pmem_available(&dimm.dpa, &mapping.window()));
                }
                Ok(smallest.saturating_mul(region.mappings().len() as u64))
            }
            RegionKind::Blk => {
                let mut total = 0;
                for mapping in region.mappings() {
                    total += blk_available(&self.dimm_ref(mapping.dimm)?.dpa, &mapping.window());
                }
                Ok(total)
            }
        }
    }

    fn resize_pmem(
        &mut self,
        descriptor: &NamespaceDescriptor,
        isetcookie: u64,
        mappings: &[Mapping],
        size: u64,
    ) -> Result<(), NvdimmError> {
        let label_id = descriptor.label_id();
        let ways = mappings.len() as u64;
        if !size.is_multiple_of(ways) {
            return Err(NvdimmError::Invalid("size not divisible by interleave ways"));
        }
        let target = size / ways;
        if !target.is_multiple_of(self.config.alignment) {
            return Err(NvdimmError::Invalid("size not aligned"));
        }

        let mut per_dimm = u64::MAX;
        for mapping in mappings {
            let dpa = &self.dimm_ref(mapping.dimm)?.dpa;
            let window = mapping.window();
            let allocated = dpa.allocated_within(label_id, &window);
            per_dimm = per_dimm.min(allocated + pmem_available(dpa, &window));
        }
        let capacity = per_dimm.saturating_mul(ways);
        if size > capacity {
            return Err(NvdimmError::NoSpace {
                requested: size,
                available: capacity,
            });
        }

        if target == 0 {
            let mut touched = false;
            for mapping in mappings {
                self.release(label_id, mapping)
                    .map_err(|e| partial(touched, mapping.dimm, e))?;
                touched = true;
            }
            return Ok(());
        }

        let nlabel = u16::try_from(mappings.len())
            .map_err(|_| NvdimmError::Invalid("too many mappings"))?;
        let mut touched = false;
        for updating in [true, false] {
            for (position, mapping) in (0u16..).zip(mappings) {
                let set = PmemSet {
                    descriptor,
                    isetcookie,
                    nlabel,
                    position,
                };
                self.place_pmem(&set, mapping, target, updating)
                    .map_err(|e| partial(touched, mapping.dimm, e))?;
                touched = true;
            }
        }
        Ok(())
    }

    fn place_pmem(
        &mut self,
        set: &PmemSet<'_>,
        mapping: &Mapping,
        target: u64,
        updating: bool,
    ) -> Result<(), NvdimmError> {
        let config = self.config;
        let label_id = set.descriptor.label_id();
        let window = mapping.window();
        let dimm = self.dimm_mut(mapping.dimm)?;

        let mut dpa = dimm.dpa.clone();
        let current = dpa.allocated_within(label_id, &window);
        if target < current {
            shrink(&mut dpa, label_id, &window, current - target)?;
        } else {
            grow_pmem(&mut dpa, label_id, &window, target)?;
        }
        let extent = first_extent(&dpa, label_id, &window)?;
        let label = pmem_label(
            set.descriptor,
            set.isetcookie,
            set.nlabel,
            set.position,
            &extent,
            updating,
        );
        update_labels(dimm, &config, label_id, &[label])?;
        dpa.clear_adjusted(label_id);
        dimm.dpa = dpa;
        debug!(
            "{}: position {} at [{:#x}, {:#x}){}",
            mapping.dimm,
            set.position,
            extent.start,
            extent.end(),
            if updating { ", updating" } else { "" }
        );
        Ok(())
    }

    fn resize_blk(
        &mut self,
        descriptor: &NamespaceDescriptor,
        mappings: &[Mapping],
        size: u64,
    ) -> Result<(), NvdimmError> {
        let Some(mapping) = mappings.first() else {
            return Err(NvdimmError::Invalid("region has no mappings"));
        };
        if !size.is_multiple_of(self.config.alignment) {
            return Err(NvdimmError::Invalid("size not aligned"));
        }
        let config = self.config;
        let label_id = descriptor.label_id();
        let window = mapping.window();
        let dimm = self.dimm_mut(mapping.dimm)?;

        let current = dimm.dpa.allocated_within(label_id, &window);
        let capacity = current + blk_available(&dimm.dpa, &window);
        if size > capacity {
            return Err(NvdimmError::NoSpace {
                requested: size,
                available: capacity,
            });
        }

        let mut dpa = dimm.dpa.clone();
        if size < current {
            shrink(&mut dpa, label_id, &window, current - size)?;
        } else if size > current {
            scan_allocate(&mut dpa, label_id, &window, size - current)?;
        }
        if size == 0 {
            delete_labels(dimm, label_id)?;
        } else {
            let extents: Vec<DpaResource> = dpa
                .find(label_id, &window)
                .into_iter()
                .filter_map(|r| dpa.get(r).copied())
                .collect();
            let labels = blk_labels(descriptor, descriptor.lbasize, &extents);
            let dirty: Vec<bool> = extents.iter().map(|extent| extent.adjusted).collect();
            refresh_labels(dimm, &config, label_id, &labels, &dirty)?;
        }
        dpa.clear_adjusted(label_id);
        dimm.dpa = dpa;
        Ok(())
    }

    /// Free everything `label_id` holds in `mapping` and drop its labels on
    /// that DIMM.
    fn release(&mut self, label_id: LabelId, mapping: &Mapping) -> Result<(), NvdimmError> {
        let window = mapping.window();
        let dimm = self.dimm_mut(mapping.dimm)?;
        let mut dpa = dimm.dpa.clone();
        let current = dpa.allocated_within(label_id, &window);
        if current > 0 {
            shrink(&mut dpa, label_id, &window, current)?;
        }
        delete_labels(dimm, label_id)?;
        dimm.dpa = dpa;
        Ok(())
    }
}

/// Label fields shared by every position of one PMEM update pass.
struct PmemSet<'a> {
    descriptor: &'a NamespaceDescriptor,
    isetcookie: u64,
    nlabel: u16,
    position: u16,
}

fn first_extent(
    dpa: &DpaTracker,
    label_id: LabelId,
    window: &Range<u64>,
) -> Result<DpaResource, NvdimmError> {
    dpa.find(label_id, window)
        .first()
        .and_then(|&r| dpa.get(r).copied())
        .ok_or(NvdimmError::Invalid("PMEM namespace has no extent"))
}

fn partial(touched: bool, dimm: DimmId, e: NvdimmError) -> NvdimmError {
    if touched {
        warn!("{dimm}: {e}; earlier DIMMs keep their changes");
        NvdimmError::Partial {
            dimm,
            source: Box::new(e),
        }
    } else {
        e
    }
}
