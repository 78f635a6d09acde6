//! # Label Area
//!
//! In-memory projection of one DIMM's label area: both index copies, which
//! of them is current, and the labels stored in slots.
//!
//! Only the staging copy (`1 - current`) is ever modified. A commit writes
//! it to media with the successor sequence number, copies it over the
//! superseded copy in memory so both converge, and swaps roles. The copy
//! that is current on media is never written while it is current, so a
//! failed or torn update leaves the previous state selectable.

use crate::{LabelAreaIo, NvdimmError};
use alloc::collections::BTreeMap;
use alloc::vec;
use kernel_nvdimm_label::consts::LABEL_SIZE;
use kernel_nvdimm_label::{
    IndexFlags, LabelAreaGeometry, NamespaceIndex, NamespaceLabel, Sequence, select_active,
};
use log::{debug, info, warn};

/// Sequence numbers written by [`LabelArea::format`]; copy 0 comes out current.
const FORMAT_SEQUENCE: [u32; 2] = [3, 2];

#[derive(Debug, Clone)]
pub struct LabelArea {
    geometry: LabelAreaGeometry,
    indices: [NamespaceIndex; 2],
    current: Option<usize>,
    /// Label records by slot, committed or staged.
    labels: BTreeMap<u32, NamespaceLabel>,
}

/// Saved in-memory state for undoing a failed transaction.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    indices: [NamespaceIndex; 2],
    current: Option<usize>,
    labels: BTreeMap<u32, NamespaceLabel>,
}

impl LabelArea {
    /// Read both index copies, select the current one and load its labels.
    ///
    /// Invalid copies and stale labels are logged and skipped; a label area
    /// with no valid copy probes as unformatted.
    ///
    /// # Errors
    /// [`NvdimmError::Format`] if the area is too small to hold a label
    /// index, or a transport error.
    pub fn probe<D: LabelAreaIo + ?Sized>(io: &D) -> Result<Self, NvdimmError> {
        let geometry = LabelAreaGeometry::new(io.config_size())?;
        let copies = [
            read_index(io, &geometry, 0)?,
            read_index(io, &geometry, 1)?,
        ];
        let seq = |which: usize| copies[which].as_ref().map_or(0, |index| index.sequence);
        let current = select_active(copies[0].is_some(), copies[1].is_some(), seq(0), seq(1));

        let mut area = Self::blank(geometry);
        let Some(current) = current else {
            debug!("no valid namespace index, label area unformatted");
            return Ok(area);
        };
        let [copy0, copy1] = copies;
        let Some(active) = (if current == 0 { copy0 } else { copy1 }) else {
            return Ok(area);
        };
        debug!("index {current} is current, sequence {}", active.sequence);
        area.indices = [active.clone(), active];
        area.current = Some(current);
        area.load_labels(io)?;
        Ok(area)
    }

    fn blank(geometry: LabelAreaGeometry) -> Self {
        let index = |which: usize| {
            let seq = Sequence::from_raw(FORMAT_SEQUENCE[which]).unwrap_or(Sequence::FIRST);
            let mut index = NamespaceIndex::new(&geometry, which, seq);
            index.flags = IndexFlags::new().with_init(true);
            index.update_checksum();
            index
        };
        Self {
            geometry,
            indices: [index(0), index(1)],
            current: None,
            labels: BTreeMap::new(),
        }
    }

    fn load_labels<D: LabelAreaIo + ?Sized>(&mut self, io: &D) -> Result<(), NvdimmError> {
        let Some(current) = self.current else {
            return Ok(());
        };
        let mut buf = [0u8; LABEL_SIZE];
        let used: alloc::vec::Vec<u32> = self.indices[current].free.used_slots().collect();
        for slot in used {
            io.read_bytes(self.geometry.slot_offset(slot), &mut buf)?;
            match NamespaceLabel::decode_slot(&buf, slot) {
                Ok(label) => {
                    self.labels.insert(slot, label);
                }
                Err(e) => warn!("skipping label in slot {slot}: {e}"),
            }
        }
        debug!("loaded {} active labels", self.labels.len());
        Ok(())
    }

    /// Write a fresh index pair with every slot free.
    ///
    /// # Errors
    /// Transport failure; the in-memory state is left unformatted.
    pub fn format<D: LabelAreaIo + ?Sized>(&mut self, io: &mut D) -> Result<(), NvdimmError> {
        let fresh = Self::blank(self.geometry);
        for (which, index) in fresh.indices.iter().enumerate() {
            let mut bytes = vec![0u8; self.geometry.index_size() as usize];
            let encoded = index.encode();
            bytes[..encoded.len()].copy_from_slice(&encoded);
            io.write_bytes(self.geometry.index_offset(which), &bytes)?;
        }
        *self = fresh;
        self.current = Some(0);
        info!(
            "formatted label area: {} slots, index size {:#x}",
            self.geometry.nslot(),
            self.geometry.index_size()
        );
        Ok(())
    }

    #[must_use]
    pub const fn geometry(&self) -> &LabelAreaGeometry {
        &self.geometry
    }

    #[must_use]
    pub const fn is_formatted(&self) -> bool {
        self.current.is_some()
    }

    /// Index copy currently authoritative on media.
    #[must_use]
    pub const fn current(&self) -> Option<usize> {
        self.current
    }

    /// Index copy the next commit will write.
    #[must_use]
    pub const fn staging(&self) -> Option<usize> {
        match self.current {
            Some(current) => Some(1 - current),
            None => None,
        }
    }

    #[must_use]
    pub fn current_index(&self) -> Option<&NamespaceIndex> {
        self.current.map(|which| &self.indices[which])
    }

    #[must_use]
    pub fn staging_index(&self) -> Option<&NamespaceIndex> {
        self.staging().map(|which| &self.indices[which])
    }

    /// Labels in slots the current index marks in use, in slot order.
    pub fn active_labels(&self) -> impl Iterator<Item = &NamespaceLabel> {
        let index = self.current_index();
        self.labels
            .iter()
            .filter(move |(slot, _)| index.is_some_and(|index| !index.free.is_free(**slot)))
            .map(|(_, label)| label)
    }

    /// `(slot, label)` pairs in slots the staging index marks in use.
    pub fn staged_labels(&self) -> impl Iterator<Item = (u32, &NamespaceLabel)> {
        let index = self.staging_index();
        self.labels
            .iter()
            .filter(move |(slot, _)| index.is_some_and(|index| !index.free.is_free(**slot)))
            .map(|(slot, label)| (*slot, label))
    }

    /// Claim the lowest free slot of the staging index.
    pub fn alloc_slot(&mut self) -> Option<u32> {
        let staging = self.staging()?;
        let slot = self.indices[staging].free.alloc_slot();
        if let Some(slot) = slot {
            debug!("allocated label slot {slot}");
        }
        slot
    }

    /// Release `slot` in the staging index. `false` on a double free.
    pub fn free_slot(&mut self, slot: u32) -> bool {
        let Some(staging) = self.staging() else {
            return false;
        };
        let freed = self.indices[staging].free.free_slot(slot);
        if !freed {
            warn!("label slot {slot} was already free");
        }
        freed
    }

    /// Free slots in the staging index; zero when unformatted.
    #[must_use]
    pub fn count_free(&self) -> u32 {
        self.staging_index().map_or(0, |index| index.free.count_free())
    }

    /// Persist `label` into `slot`.
    ///
    /// # Errors
    /// Transport failure; nothing is recorded in memory.
    pub fn write_label<D: LabelAreaIo + ?Sized>(
        &mut self,
        io: &mut D,
        slot: u32,
        label: NamespaceLabel,
    ) -> Result<(), NvdimmError> {
        io.write_bytes(self.geometry.slot_offset(slot), &label.encode())?;
        self.labels.insert(slot, label);
        Ok(())
    }

    /// Persist the staging index with the successor sequence and make it
    /// current.
    ///
    /// # Errors
    /// - [`NvdimmError::Invalid`] if the area is unformatted.
    /// - Transport failure; media still selects the previous copy, restore a
    ///   [`Checkpoint`] to resynchronize memory.
    pub fn commit<D: LabelAreaIo + ?Sized>(&mut self, io: &mut D) -> Result<(), NvdimmError> {
        let Some(current) = self.current else {
            return Err(NvdimmError::Invalid("label area is not formatted"));
        };
        let staging = 1 - current;
        let next = self.indices[current]
            .sequence()
            .map_or(Sequence::FIRST, Sequence::successor);

        let index = &mut self.indices[staging];
        index.flags = IndexFlags::new();
        index.sequence = next.get();
        index.relocate(&self.geometry, staging);
        index.update_checksum();
        io.write_bytes(self.geometry.index_offset(staging), &index.encode())?;

        self.indices[current] = self.indices[staging].clone();
        self.current = Some(staging);
        let index = &self.indices[staging];
        self.labels.retain(|slot, _| !index.free.is_free(*slot));
        debug!("committed index {staging}, sequence {next}");
        Ok(())
    }

    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            indices: self.indices.clone(),
            current: self.current,
            labels: self.labels.clone(),
        }
    }

    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.indices = checkpoint.indices;
        self.current = checkpoint.current;
        self.labels = checkpoint.labels;
    }
}

/// Read and validate index copy `which`. `None` if it is not usable.
///
/// # Errors
/// Transport failure only; format problems are logged.
pub fn read_index<D: LabelAreaIo + ?Sized>(
    io: &D,
    geometry: &LabelAreaGeometry,
    which: usize,
) -> Result<Option<NamespaceIndex>, NvdimmError> {
    let mut buf = vec![0u8; geometry.index_size() as usize];
    io.read_bytes(geometry.index_offset(which), &mut buf)?;
    match NamespaceIndex::parse(&buf, geometry, which) {
        Ok(index) => Ok(Some(index)),
        Err(e) => {
            debug!("index {which} rejected: {e}");
            Ok(None)
        }
    }
}
