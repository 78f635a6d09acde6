//! # Label Writer
//!
//! Transactional replacement of the labels one namespace keeps on one DIMM.
//! The ordering of every update is fixed:
//!
//! 1. format the label area if it has never been written;
//! 2. free staging slots holding labels of the same uuid but the other
//!    category, left over from an interrupted update;
//! 3. allocate a staging slot per new label and fill in its fields;
//! 4. persist each label record;
//! 5. free the slots of the labels being superseded;
//!    [`refresh_labels`] keeps a label whose extent is not adjusted and
//!    whose staged record is unchanged in its slot;
//! 6. commit the staging index (successor sequence, checksum, persist,
//!    converge copies, swap roles).
//!
//! A failure before step 6 persists leaves the current index untouched, so
//! media still selects the old label set. The in-memory label area is
//! restored to its pre-update state on any failure.

use crate::{BusConfig, Dimm, DpaResource, LabelAreaIo, LabelId, NamespaceDescriptor, NvdimmError};
use alloc::vec;
use alloc::vec::Vec;
use kernel_nvdimm_label::{LabelFlags, NamespaceLabel};
use log::debug;

/// Format the label area of `dimm` unless it already holds a valid index.
///
/// # Errors
/// [`NvdimmError::Unformatted`] when `config` forbids formatting, or a
/// transport failure.
pub fn ensure_formatted<D: LabelAreaIo>(
    dimm: &mut Dimm<D>,
    config: &BusConfig,
) -> Result<(), NvdimmError> {
    if dimm.area.is_formatted() {
        return Ok(());
    }
    if !config.auto_format {
        return Err(NvdimmError::Unformatted(dimm.id()));
    }
    dimm.area.format(&mut dimm.io)
}

/// Replace every label of `label_id` on `dimm` with `labels`, returning the
/// slot written for each, in order. The `slot` field of each template is
/// ignored.
///
/// # Errors
/// - [`NvdimmError::Busy`] if the staging index runs out of slots.
/// - [`NvdimmError::Unformatted`] or a transport failure.
pub fn update_labels<D: LabelAreaIo>(
    dimm: &mut Dimm<D>,
    config: &BusConfig,
    label_id: LabelId,
    labels: &[NamespaceLabel],
) -> Result<Vec<u32>, NvdimmError> {
    let dirty = vec![true; labels.len()];
    refresh_labels(dimm, config, label_id, labels, &dirty)
}

/// Like [`update_labels`], but a label whose `dirty` entry is `false` and
/// that is already staged with identical contents stays in its slot instead
/// of being rewritten. Returns the slot holding each label, in order.
///
/// # Errors
/// As [`update_labels`].
pub fn refresh_labels<D: LabelAreaIo>(
    dimm: &mut Dimm<D>,
    config: &BusConfig,
    label_id: LabelId,
    labels: &[NamespaceLabel],
    dirty: &[bool],
) -> Result<Vec<u32>, NvdimmError> {
    ensure_formatted(dimm, config)?;
    let checkpoint = dimm.area.checkpoint();
    let result = replace_labels(dimm, label_id, labels, dirty);
    if result.is_err() {
        dimm.area.restore(checkpoint);
    }
    result
}

fn replace_labels<D: LabelAreaIo>(
    dimm: &mut Dimm<D>,
    label_id: LabelId,
    labels: &[NamespaceLabel],
    dirty: &[bool],
) -> Result<Vec<u32>, NvdimmError> {
    let id = dimm.id();
    let area = &mut dimm.area;

    let orphans: Vec<u32> = area
        .staged_labels()
        .filter(|(_, label)| label.uuid == label_id.uuid && !label_id.matches(label))
        .map(|(slot, _)| slot)
        .collect();
    for slot in orphans {
        debug!("{id}: reclaiming orphaned label in slot {slot}");
        area.free_slot(slot);
    }

    let mut previous: Vec<NamespaceLabel> = area
        .staged_labels()
        .filter(|(_, label)| label_id.matches(label))
        .map(|(_, label)| label.clone())
        .collect();

    let mut placed = Vec::with_capacity(labels.len());
    let mut written = 0;
    for (i, template) in labels.iter().enumerate() {
        if !dirty.get(i).copied().unwrap_or(true) {
            let unchanged = previous.iter().position(|label| {
                *label
                    == NamespaceLabel {
                        slot: label.slot,
                        ..template.clone()
                    }
            });
            if let Some(k) = unchanged {
                placed.push(previous.swap_remove(k).slot);
                continue;
            }
        }
        let slot = area
            .alloc_slot()
            .ok_or(NvdimmError::Busy("no free label slot"))?;
        let label = NamespaceLabel {
            slot,
            ..template.clone()
        };
        area.write_label(&mut dimm.io, slot, label)?;
        placed.push(slot);
        written += 1;
    }

    for label in previous {
        area.free_slot(label.slot);
    }
    area.commit(&mut dimm.io)?;
    debug!("{id}: {label_id} now in slots {placed:?}, {written} rewritten");
    Ok(placed)
}

/// Free every label of `label_id` on `dimm` and commit. Returns the number
/// of labels removed; no index is written when there are none.
///
/// # Errors
/// Transport failure.
pub fn delete_labels<D: LabelAreaIo>(
    dimm: &mut Dimm<D>,
    label_id: LabelId,
) -> Result<usize, NvdimmError> {
    if !dimm.area.is_formatted() {
        return Ok(0);
    }
    let slots: Vec<u32> = dimm
        .area
        .staged_labels()
        .filter(|(_, label)| label_id.matches(label))
        .map(|(slot, _)| slot)
        .collect();
    if slots.is_empty() {
        return Ok(0);
    }

    let checkpoint = dimm.area.checkpoint();
    for &slot in &slots {
        dimm.area.free_slot(slot);
    }
    if let Err(e) = dimm.area.commit(&mut dimm.io) {
        dimm.area.restore(checkpoint);
        return Err(e);
    }
    debug!("{}: deleted {} labels of {label_id}", dimm.id(), slots.len());
    Ok(slots.len())
}

/// Label for interleave `position` of a PMEM namespace spanning `nlabel`
/// DIMMs.
#[must_use]
pub fn pmem_label(
    descriptor: &NamespaceDescriptor,
    isetcookie: u64,
    nlabel: u16,
    position: u16,
    extent: &DpaResource,
    updating: bool,
) -> NamespaceLabel {
    let mut label = NamespaceLabel {
        uuid: descriptor.uuid,
        flags: LabelFlags::new().with_updating(updating),
        nlabel,
        position,
        isetcookie,
        dpa: extent.start,
        rawsize: extent.len,
        ..NamespaceLabel::default()
    };
    label.set_name(&descriptor.name);
    label
}

/// One LOCAL label per extent of a BLK namespace, in extent order.
#[must_use]
pub fn blk_labels(
    descriptor: &NamespaceDescriptor,
    lbasize: u64,
    extents: &[DpaResource],
) -> Vec<NamespaceLabel> {
    let nlabel = u16::try_from(extents.len()).unwrap_or(u16::MAX);
    extents
        .iter()
        .zip(0u16..)
        .map(|(extent, position)| {
            let mut label = NamespaceLabel {
                uuid: descriptor.uuid,
                flags: LabelFlags::new().with_local(true),
                nlabel,
                position,
                dpa: extent.start,
                rawsize: extent.len,
                lbasize,
                ..NamespaceLabel::default()
            };
            label.set_name(&descriptor.name);
            label
        })
        .collect()
}
