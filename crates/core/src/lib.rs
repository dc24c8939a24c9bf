//! Core types for worlddb
//!
//! This crate defines the foundational types shared by every layer:
//! - Error: the fatal/non-fatal error taxonomy of the object store
//! - Oid, GenHash, Uid: durable object identity and its external string form

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod uid;

pub use error::{Error, Result};
pub use uid::{GenHash, Oid, Uid, NULL_OID};
