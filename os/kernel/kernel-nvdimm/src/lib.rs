//! # NVDIMM Namespace Management
//!
//! Provisions namespaces on NVDIMMs: durable records, stored in each DIMM's
//! label area, describing which ranges of DIMM physical address (DPA) space
//! belong to which namespace.
//!
//! ## Model
//!
//! - A [`Dimm`] owns a transport ([`LabelAreaIo`]), the in-memory view of its
//!   label area ([`LabelArea`]) and the DPA ranges currently allocated on it
//!   ([`DpaTracker`]).
//! - A [`Region`] maps a window of one or more DIMMs. PMEM regions interleave
//!   their mappings; a PMEM namespace holds one equal-sized extent at the top
//!   of every mapping. BLK regions map a single DIMM and their namespaces may
//!   fragment into many extents.
//! - All mutation goes through [`BusState`], reachable only by holding the
//!   [`NvdimmBus`] lock.
//!
//! ## Label Updates
//!
//! Labels are never modified in place. A change writes new labels into free
//! slots of the staging index, then commits that index with the next
//! sequence number. Until the commit lands, media still selects the previous
//! index and label set. See [`writer`] for the exact ordering.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_nvdimm::{
//!     BusConfig, Mapping, MemoryLabelArea, NamespaceDescriptor, NvdimmBus, RegionDescriptor,
//! };
//! use kernel_nvdimm_label::Uuid;
//!
//! let bus = NvdimmBus::new(BusConfig::DEFAULT);
//! let mut state = bus.lock();
//! let d0 = state.add_dimm(MemoryLabelArea::new(128 * 1024)).unwrap();
//! let d1 = state.add_dimm(MemoryLabelArea::new(128 * 1024)).unwrap();
//! let region = state
//!     .add_region(RegionDescriptor::pmem(
//!         0x1234,
//!         vec![Mapping::new(d0, 0, 1 << 24), Mapping::new(d1, 0, 1 << 24)],
//!     ))
//!     .unwrap();
//!
//! let ns = NamespaceDescriptor::pmem(Uuid::from_u128(1), "pmem0");
//! state.create_or_resize(region, &ns, 4 << 20).unwrap();
//!
//! let listed = state.list_namespaces(region).unwrap();
//! assert_eq!(listed[0].size, 4 << 20);
//! assert_eq!(listed[0].extents.len(), 2);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod allocator;
mod bus;
mod config;
mod dimm;
mod error;
pub mod interleave;
mod io;
mod label_area;
mod label_id;
mod namespace;
mod region;
mod resource;
pub mod scan;
pub mod writer;

pub use bus::{BusGuard, BusState, NvdimmBus};
pub use config::BusConfig;
pub use dimm::Dimm;
pub use error::{LabelIoError, NvdimmError};
pub use interleave::NamespaceIdentity;
pub use io::{LabelAreaIo, MemoryLabelArea};
pub use label_area::{Checkpoint, LabelArea};
pub use label_id::{LabelId, NamespaceKind};
pub use namespace::{NamespaceDescriptor, NamespaceExtent, NamespaceInfo};
pub use region::{DimmId, Mapping, Region, RegionDescriptor, RegionId, RegionKind};
pub use resource::{DpaResource, DpaTracker, ResourceId};
pub use scan::BlkNamespace;
