//! # Interleave-Set Validator
//!
//! Reconstructs a PMEM namespace from the labels its DIMMs carry. A label set
//! is accepted only when every interleave position of the region is
//! described by exactly one label, and every DIMM's extent ends at the top
//! of that DIMM's mapping.

use crate::{LabelArea, Mapping, NvdimmError};
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use kernel_nvdimm_label::{NamespaceLabel, Uuid};
use log::debug;

/// What the labels say about a PMEM namespace.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NamespaceIdentity {
    pub uuid: Uuid,
    pub name: String,
    /// Per-DIMM extent size.
    pub rawsize: u64,
    /// Some label still carries UPDATING: an update was interrupted between
    /// its two passes.
    pub updating: bool,
}

fn set_members<'a>(
    area: &'a LabelArea,
    uuid: Uuid,
    isetcookie: u64,
    nlabel: usize,
) -> impl Iterator<Item = &'a NamespaceLabel> {
    area.active_labels().filter(move |label| {
        !label.is_local()
            && label.uuid == uuid
            && label.isetcookie == isetcookie
            && usize::from(label.nlabel) == nlabel
    })
}

/// Whether exactly one label across `areas` claims interleave position `pos`
/// of namespace `uuid`.
///
/// Labels whose `nlabel` differs from the number of areas, and LOCAL labels,
/// are ignored.
#[must_use]
pub fn has_uuid_at_pos(areas: &[&LabelArea], uuid: Uuid, isetcookie: u64, pos: u16) -> bool {
    let count: usize = areas
        .iter()
        .map(|area| {
            set_members(area, uuid, isetcookie, areas.len())
                .filter(|label| label.position == pos)
                .count()
        })
        .sum();
    count == 1
}

/// Find the one complete PMEM label set of a region.
///
/// `areas[i]` is the label area of `mappings[i]`'s DIMM.
///
/// # Errors
/// - [`NvdimmError::NoDevice`] if no label references the region: nothing
///   is provisioned.
/// - [`NvdimmError::Invalid`] for a set with a missing or duplicated
///   position, or extents that do not fit their mappings.
/// - [`NvdimmError::Busy`] if more than one uuid forms a complete set.
pub fn find_label_set(
    isetcookie: u64,
    areas: &[&LabelArea],
    mappings: &[Mapping],
) -> Result<NamespaceIdentity, NvdimmError> {
    let Some(reference) = areas.first() else {
        return Err(NvdimmError::NoDevice);
    };
    let mut candidates: Vec<Uuid> = reference
        .active_labels()
        .filter(|label| !label.is_local() && label.isetcookie == isetcookie)
        .map(|label| label.uuid)
        .collect();
    candidates.sort_unstable();
    candidates.dedup();

    let mut found: Option<Uuid> = None;
    for uuid in candidates {
        let complete = (0..areas.len()).all(|pos| {
            u16::try_from(pos).is_ok_and(|pos| has_uuid_at_pos(areas, uuid, isetcookie, pos))
        });
        if !complete {
            debug!("{uuid}: interleave set incomplete");
            return Err(NvdimmError::Invalid("incomplete interleave set"));
        }
        if found.is_some() {
            debug!("{uuid}: second complete interleave set");
            return Err(NvdimmError::Busy("ambiguous interleave set"));
        }
        found = Some(uuid);
    }
    let Some(uuid) = found else {
        return Err(NvdimmError::NoDevice);
    };

    let mut members = Vec::with_capacity(areas.len());
    for (area, mapping) in areas.iter().zip(mappings) {
        let mut on_dimm = set_members(area, uuid, isetcookie, areas.len());
        let (Some(label), None) = (on_dimm.next(), on_dimm.next()) else {
            debug!("{uuid}: {} does not carry exactly one label", mapping.dimm);
            return Err(NvdimmError::Invalid("interleave set not spread across mappings"));
        };
        if label.dpa < mapping.start || label.end() != mapping.end() {
            debug!(
                "{uuid}: [{:#x}, {:#x}) not anchored in {} mapping [{:#x}, {:#x})",
                label.dpa,
                label.end(),
                mapping.dimm,
                mapping.start,
                mapping.end()
            );
            return Err(NvdimmError::Invalid("extent outside mapping"));
        }
        members.push(label);
    }

    let Some(first) = members.iter().find(|label| label.position == 0) else {
        return Err(NvdimmError::Invalid("incomplete interleave set"));
    };
    if members.iter().any(|label| label.rawsize != first.rawsize) {
        return Err(NvdimmError::Invalid("interleave set extents differ in size"));
    }

    Ok(NamespaceIdentity {
        uuid,
        name: first.name_str().to_string(),
        rawsize: first.rawsize,
        updating: members.iter().any(|label| label.flags.updating()),
    })
}
