//! Object store engine for worlddb
//!
//! This crate turns the record files of `worlddb-storage` into a store of
//! typed objects:
//! - `schema`: classes, inheritance and field shapes
//! - `typemap`: how each field shape maps to record columns
//! - `value`: attribute values and shared object handles
//! - `table`: one StructuredFile of rows per class
//! - `database`: the OID table, class registry, identity cache and allocator
//! - `list` / `dict`: growable containers stored in allocations
//!
//! The engine is single-process: a directory lock keeps a second handle out,
//! and nothing is journaled.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;
pub mod dict;
pub mod list;
pub mod schema;
pub mod table;
pub mod typemap;
pub mod value;

pub use database::{Allocation, Database, DatabaseStats, Query, WorldConfig};
pub use dict::PersistentDict;
pub use list::PersistentList;
pub use schema::{Class, ClassBuilder, Field, FieldType};
pub use typemap::ValueStore;
pub use value::{DictRef, ListRef, Object, Value};
