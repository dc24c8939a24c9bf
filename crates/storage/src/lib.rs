//! Record-level storage for worlddb
//!
//! This crate implements the on-disk building blocks:
//! - `RecordLayout`: typed, big-endian fixed-width records
//! - `StructuredFile`: an array of records behind a self-verifying header,
//!   with live slice views and overlap-safe `copy_block`
//! - `FragmentFile`: a first-fit allocator over one data file
//! - `paths`: where each file lives in a database directory
//!
//! Every write is an immediate positioned write. There is no buffering,
//! journaling or background flushing at this layer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fragment;
pub mod header;
pub mod layout;
pub mod paths;
pub mod structfile;

pub use fragment::{FragmentCounters, FragmentFile, Grant};
pub use layout::{Column, ColumnKind, RecordLayout, Scalar};
pub use structfile::{open_shared, Records, SharedFile, StructuredFile, StructuredFileOptions};
