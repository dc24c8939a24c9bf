//! worlddb - embedded persistent object store
//!
//! worlddb stores graphs of typed objects in a directory of fixed-record
//! files. Each class gets a table of fixed-width rows; every stored object
//! gets a UID (its row in the OID table plus a generation hash), and
//! references between objects are stored as UIDs. Strings that outgrow their
//! inline width, lists and dictionaries live in allocations carved out of
//! fragment files by a first-fit allocator.
//!
//! # Quick Start
//!
//! ```ignore
//! use worlddb::{Class, Database, FieldType, Object};
//!
//! let db = Database::open("./world")?;
//! let person = Class::builder("app.Person")
//!     .field("name", db.string_type())
//!     .field("age", FieldType::Int)
//!     .field("friend", FieldType::reference())
//!     .build()?;
//!
//! let alice = Object::new(&person).with("name", "Alice")?.with("age", 30)?;
//! let uid = db.insert(&alice)?;
//!
//! let again = db.retrieve(&uid)?.expect("stored");
//! assert_eq!(db.get(&again, "age")?.as_int(), Some(30));
//! db.close()?;
//! ```
//!
//! # Layers
//!
//! - `worlddb-core`: errors and identity types
//! - `worlddb-storage`: record layouts, StructuredFile, FragmentFile
//! - `worlddb-engine`: schema, type mapping, tables, database, containers

pub use worlddb_core::{Error, Oid, Result, Uid};
pub use worlddb_engine::database::{
    ALLOCATION_CLASS, BLOB_CLASS, CONFIG_FILE_NAME, DICT_CLASS, FRAGMENT_FILE_CLASS, LIST_CLASS,
};
pub use worlddb_engine::{
    Allocation, Class, ClassBuilder, Database, DatabaseStats, DictRef, Field, FieldType, ListRef,
    Object, PersistentDict, PersistentList, Query, Value, ValueStore, WorldConfig,
};

/// Low-level record storage
pub mod storage {
    pub use worlddb_storage::*;
}
