//! Built-in classes the database stores its own bookkeeping in
//!
//! Fragment files, blobs, lists and dictionaries are ordinary stored
//! objects with rows in their own Tables, so they share OIDs, generation
//! hashes and the identity checks of user objects.

use crate::schema::{Class, FieldType};
use std::sync::Arc;
use worlddb_core::Result;

/// Allocator instance; its counters live in its row
pub const FRAGMENT_FILE_CLASS: &str = "worlddb.FragmentFile";
/// Anything that owns a byte range in a fragment file
pub const ALLOCATION_CLASS: &str = "worlddb.Allocation";
/// Out-of-line byte string
pub const BLOB_CLASS: &str = "worlddb.Blob";
/// Growable list of fixed-width rows
pub const LIST_CLASS: &str = "worlddb.List";
/// Open-addressing hash dictionary
pub const DICT_CLASS: &str = "worlddb.Dict";

/// Width of the inline element-signature column
const SIGNATURE_INLINE: u32 = 64;

/// The resolved built-in classes
#[derive(Debug, Clone)]
pub(crate) struct SystemClasses {
    pub fragment_file: Arc<Class>,
    pub allocation: Arc<Class>,
    pub blob: Arc<Class>,
    pub list: Arc<Class>,
    pub dict: Arc<Class>,
}

impl SystemClasses {
    pub fn build() -> Result<Self> {
        let fragment_file = Class::builder(FRAGMENT_FILE_CLASS)
            .field("maxAllocs", FieldType::Int)
            .field("longestFragment", FieldType::Long)
            .field("fragmentCount", FieldType::Int)
            .field("allocCount", FieldType::Int)
            .field("fileSize", FieldType::Long)
            .build()?;
        let allocation = Class::builder(ALLOCATION_CLASS)
            .field("fragfile", FieldType::reference_to(&fragment_file))
            .field("allocBegin", FieldType::Long)
            .field("allocLength", FieldType::Long)
            .field("allocIndex", FieldType::Int)
            .field("contentLength", FieldType::Long)
            .build()?;
        let blob = Class::builder(BLOB_CLASS).extends(&allocation).build()?;
        let list = Class::builder(LIST_CLASS)
            .extends(&allocation)
            .field("elementType", FieldType::FixedString(SIGNATURE_INLINE))
            .build()?;
        let dict = Class::builder(DICT_CLASS)
            .extends(&list)
            .field("keyValueCount", FieldType::Int)
            .build()?;
        Ok(SystemClasses {
            fragment_file,
            allocation,
            blob,
            list,
            dict,
        })
    }

    /// Every class that gets a table on open
    pub fn all(&self) -> [&Arc<Class>; 4] {
        [&self.fragment_file, &self.blob, &self.list, &self.dict]
    }
}
