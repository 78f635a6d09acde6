//! # BLK Label-Set Scanner
//!
//! Groups a DIMM's LOCAL labels by uuid into BLK namespaces.

use crate::{LabelArea, Mapping, NamespaceDescriptor};
use alloc::collections::BTreeMap;
use alloc::string::ToString;
use alloc::vec::Vec;
use kernel_nvdimm_label::{NamespaceLabel, Uuid};
use log::warn;

/// A BLK namespace found on media.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BlkNamespace {
    pub descriptor: NamespaceDescriptor,
    /// Sum of all extents.
    pub size: u64,
}

/// Reconstruct the BLK namespaces in `mapping` from `area`'s LOCAL labels.
///
/// A uuid whose label count disagrees with its labels' `nlabel`, whose
/// positions are not exactly `0..nlabel`, or with an extent outside the
/// mapping, is logged and skipped.
#[must_use]
pub fn scan_blk(area: &LabelArea, mapping: &Mapping) -> Vec<BlkNamespace> {
    let mut groups: BTreeMap<Uuid, Vec<&NamespaceLabel>> = BTreeMap::new();
    for label in area.active_labels().filter(|label| label.is_local()) {
        groups.entry(label.uuid).or_default().push(label);
    }

    let mut found = Vec::with_capacity(groups.len());
    for (uuid, mut labels) in groups {
        labels.sort_by_key(|label| label.position);
        if labels.iter().any(|label| usize::from(label.nlabel) != labels.len()) {
            warn!("blk-{uuid}: {} labels disagree with nlabel, skipped", labels.len());
            continue;
        }
        if (0u16..).zip(&labels).any(|(ordinal, label)| label.position != ordinal) {
            warn!("blk-{uuid}: duplicate or missing extent positions, skipped");
            continue;
        }
        if labels
            .iter()
            .any(|label| label.dpa < mapping.start || label.end() > mapping.end())
        {
            warn!("blk-{uuid}: extent outside {} mapping, skipped", mapping.dimm);
            continue;
        }
        let Some(first) = labels.first() else {
            continue;
        };
        found.push(BlkNamespace {
            descriptor: NamespaceDescriptor::blk(uuid, first.name_str().to_string(), first.lbasize),
            size: labels.iter().map(|label| label.rawsize).sum(),
        });
    }
    found
}
