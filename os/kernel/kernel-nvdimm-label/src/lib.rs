//! # NVDIMM Namespace Label Format
//!
//! This crate implements the on-media format used by NVDIMMs to describe how
//! their physical capacity is carved into namespaces. It contains no I/O: every
//! structure is decoded from and encoded into plain byte slices with explicit
//! little-endian accessors, so the same code serves the kernel driver and
//! host-side tooling that inspects label-area images.
//!
//! ## Label Area Layout
//!
//! Each DIMM exposes a small configuration ("label") area of `config_size`
//! bytes. It is laid out as two redundant namespace indices followed by an
//! array of fixed-size label slots:
//!
//! ```text
//! offset 0            index_size          2 * index_size
//! ┌───────────────────┬───────────────────┬──────────┬──────────┬─────┬──────────────┐
//! │ NamespaceIndex #0 │ NamespaceIndex #1 │ Label #0 │ Label #1 │ ... │ Label #nslot-1│
//! └───────────────────┴───────────────────┴──────────┴──────────┴─────┴──────────────┘
//! ```
//!
//! The geometry is fully determined by `config_size`, see [`LabelAreaGeometry`].
//!
//! ## Namespace Index
//!
//! A [`NamespaceIndex`] is a tiny superblock: a signature, a 2-bit cyclic
//! [`Sequence`] number, self-describing offsets, and a free-slot bitmap
//! ([`FreeSlotMap`]), all covered by a Fletcher-64 checksum ([`fletcher64`]).
//!
//! Two copies exist. Updates are always written to the copy that is **not**
//! currently authoritative, carrying the successor of the authoritative
//! sequence number. A torn or failed write therefore leaves the previous copy
//! intact and still selected by [`select_active`].
//!
//! ## Namespace Label
//!
//! A [`NamespaceLabel`] describes one DIMM's contribution to one namespace:
//! the namespace UUID and name, the extent (`dpa`, `rawsize`), the interleave
//! position and set cookie for PMEM namespaces, and the sector size for BLK
//! namespaces. Labels carry their own slot number so that stale copies can be
//! detected.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_nvdimm_label::{LabelAreaGeometry, NamespaceIndex, Sequence, select_active};
//!
//! let geometry = LabelAreaGeometry::new(128 * 1024).unwrap();
//! let mut index = NamespaceIndex::new(&geometry, 0, Sequence::FIRST);
//! index.update_checksum();
//! let bytes = index.encode();
//!
//! let parsed = NamespaceIndex::parse(&bytes, &geometry, 0).unwrap();
//! assert_eq!(parsed, index);
//! assert_eq!(select_active(true, false, parsed.sequence, 0), Some(0));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod bytes;
pub mod consts;
mod error;
mod fletcher;
mod geometry;
mod index;
mod label;
mod sequence;
mod slots;

pub use error::LabelFormatError;
pub use fletcher::fletcher64;
pub use geometry::{LabelAreaGeometry, align_up};
pub use index::{IndexFlags, NamespaceIndex};
pub use label::{LabelFlags, NamespaceLabel};
pub use sequence::{Sequence, select_active};
pub use slots::FreeSlotMap;
pub use uuid::Uuid;
