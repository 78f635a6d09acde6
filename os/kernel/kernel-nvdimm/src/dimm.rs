use crate::{DimmId, DpaTracker, LabelArea, LabelAreaIo, LabelId, NvdimmError};
use log::{info, warn};

/// A DIMM attached to the bus: its transport, label area and DPA
/// allocations.
#[derive(Debug)]
pub struct Dimm<D> {
    id: DimmId,
    pub(crate) io: D,
    pub(crate) area: LabelArea,
    pub(crate) dpa: DpaTracker,
}

impl<D: LabelAreaIo> Dimm<D> {
    /// Probe the label area and reserve the DPA ranges its active labels
    /// describe.
    ///
    /// # Errors
    /// Transport failure, or a label area too small to hold an index.
    pub(crate) fn attach(id: DimmId, io: D) -> Result<Self, NvdimmError> {
        let area = LabelArea::probe(&io)?;
        let mut dpa = DpaTracker::new();
        for label in area.active_labels() {
            if label.rawsize == 0 {
                continue;
            }
            let label_id = LabelId::of_label(label);
            if let Err(e) = dpa.insert(label_id, label.dpa, label.rawsize) {
                warn!(
                    "{id}: {label_id} slot {}: cannot reserve [{:#x}, {:#x}): {e}",
                    label.slot,
                    label.dpa,
                    label.end()
                );
            }
        }
        info!(
            "{id}: attached, {} labels, {} DPA ranges reserved",
            area.active_labels().count(),
            dpa.len()
        );
        Ok(Self { id, io, area, dpa })
    }
}

impl<D> Dimm<D> {
    #[must_use]
    pub const fn id(&self) -> DimmId {
        self.id
    }

    #[must_use]
    pub const fn io(&self) -> &D {
        &self.io
    }

    #[must_use]
    pub const fn area(&self) -> &LabelArea {
        &self.area
    }

    #[must_use]
    pub const fn dpa(&self) -> &DpaTracker {
        &self.dpa
    }

    pub(crate) fn into_io(self) -> D {
        self.io
    }
}
