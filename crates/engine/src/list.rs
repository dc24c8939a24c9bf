//! Persistent growable lists
//!
//! A list is a `worlddb.List` object owning one allocation. Elements are
//! fixed-width rows, laid out by the element's [`FieldType`] exactly as a
//! table field would be, packed from the start of the allocation;
//! `contentLength` is the number of bytes in use. When the allocation
//! fills, it is at least doubled. Inserting and removing in the middle
//! shift the tail with `copy_block`.
//!
//! The element signature is stored in the list's row and checked whenever
//! a handle is opened, so a list can never be read back as another shape.

use crate::database::{Allocation, Database, LIST_CLASS};
use crate::schema::FieldType;
use crate::value::{ListRef, Object, Value};
use std::sync::Arc;
use tracing::debug;
use worlddb_core::{Error, Result, Uid};
use worlddb_storage::{RecordLayout, Scalar, StructuredFile};

/// Column prefix of element rows
const ELEMENT: &str = "value";

pub(crate) fn element_layout(element: &FieldType) -> Result<Arc<RecordLayout>> {
    Ok(Arc::new(RecordLayout::new(element.low_columns(ELEMENT))?))
}

impl Database {
    /// Create a list of `element` holding `items`
    pub fn new_list(&self, element: FieldType, items: &[Value]) -> Result<ListRef> {
        element.validate()?;
        let layout = element_layout(&element)?;
        let obj = Object::new(&self.system().list).with("elementType", element.to_string())?;
        let uid = self.insert_object(&obj, false)?;
        let capacity = items.len().max(self.config().list_initial_capacity as usize);
        self.allocate(uid, (capacity * layout.record_size()) as i64)?;
        debug!(target: "worlddb::db", oid = uid.oid, element = %element, capacity, "Created list");

        let list = PersistentList {
            db: self,
            uid,
            element,
            layout,
        };
        list.extend(items.iter().cloned())?;
        Ok(ListRef {
            uid,
            element: list.element,
        })
    }

    /// Operation handle for a stored list
    ///
    /// # Errors
    ///
    /// - `Error::InvalidOperation` if the UID is not a list
    /// - `Error::UnsupportedValue` if the stored element type differs from
    ///   the handle's
    pub fn list(&self, list: &ListRef) -> Result<PersistentList<'_>> {
        self.check_signature(list.uid, LIST_CLASS, &list.element.to_string())?;
        Ok(PersistentList {
            db: self,
            uid: list.uid,
            element: list.element.clone(),
            layout: element_layout(&list.element)?,
        })
    }

    /// Verify that `uid` is a `class` whose stored element signature is `expected`
    pub(crate) fn check_signature(&self, uid: Uid, class: &str, expected: &str) -> Result<()> {
        let Some(obj) = self.retrieve_uid(uid)? else {
            return Err(Error::NotFound(format!("null {} reference", class)));
        };
        if !obj.class().is_a(class) {
            return Err(Error::invalid_operation(format!(
                "{} is a {}, not a {}",
                uid,
                obj.class().name(),
                class
            )));
        }
        let stored = self.get(&obj, "elementType")?;
        if stored.as_bytes() != Some(expected.as_bytes()) {
            return Err(Error::unsupported(
                "elementType",
                format!(
                    "{} holds {}, handle expects {}",
                    uid,
                    stored.as_str().unwrap_or("<unreadable>"),
                    expected
                ),
            ));
        }
        Ok(())
    }
}

/// Borrowed operation handle for one persistent list.
///
/// The handle holds no state beyond the list's identity; every call reads
/// the current allocation from the list's row, so several handles to the
/// same list stay consistent.
pub struct PersistentList<'db> {
    db: &'db Database,
    uid: Uid,
    element: FieldType,
    layout: Arc<RecordLayout>,
}

impl<'db> PersistentList<'db> {
    /// Identity of the list
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Element shape
    pub fn element(&self) -> &FieldType {
        &self.element
    }

    /// Current allocation backing the list
    pub fn allocation(&self) -> Result<Allocation> {
        self.db.load_allocation(self.uid)
    }

    fn record_size(&self) -> i64 {
        self.layout.record_size() as i64
    }

    fn rows(&self, alloc: &Allocation) -> Result<StructuredFile> {
        self.db.region_view(alloc, Arc::clone(&self.layout))
    }

    fn count(&self, alloc: &Allocation) -> u64 {
        (alloc.content / self.record_size()) as u64
    }

    fn check_index(&self, index: usize, len: u64) -> Result<u64> {
        let index = index as u64;
        if index >= len {
            return Err(Error::Bounds { index, max: len });
        }
        Ok(index)
    }

    fn encode(&self, value: &Value) -> Result<Vec<Scalar>> {
        self.element.encode(self.db, ELEMENT, value)
    }

    fn decode(&self, raw: &[Scalar]) -> Result<Value> {
        self.element.decode(self.db, ELEMENT, raw)
    }

    /// Ensure room for `extra` more rows, at least doubling when growing
    fn reserve(&self, alloc: &mut Allocation, extra: u64) -> Result<()> {
        let needed = alloc.content + extra as i64 * self.record_size();
        if needed > alloc.length {
            let grow = (needed - alloc.length).max(alloc.length);
            self.db.expand(alloc, grow)?;
        }
        Ok(())
    }

    fn set_count(&self, alloc: &mut Allocation, count: u64) -> Result<()> {
        alloc.content = count as i64 * self.record_size();
        self.db.store_allocation(alloc)
    }

    /// Number of elements
    pub fn len(&self) -> Result<usize> {
        Ok(self.count(&self.allocation()?) as usize)
    }

    /// Whether the list has no elements
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Element at `index`
    pub fn get(&self, index: usize) -> Result<Value> {
        let alloc = self.allocation()?;
        let at = self.check_index(index, self.count(&alloc))?;
        let raw = self.rows(&alloc)?.get_all(at)?;
        self.decode(&raw)
    }

    /// Overwrite the element at `index`
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let raw = self.encode(&value.into())?;
        let alloc = self.allocation()?;
        let at = self.check_index(index, self.count(&alloc))?;
        self.rows(&alloc)?.set_all(at, &raw)
    }

    /// Append one element
    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        self.extend([value.into()])
    }

    /// Append every element of `values`
    pub fn extend(&self, values: impl IntoIterator<Item = Value>) -> Result<()> {
        // encode first: storing an element may itself allocate
        let raw = values
            .into_iter()
            .map(|value| self.encode(&value))
            .collect::<Result<Vec<_>>>()?;
        if raw.is_empty() {
            return Ok(());
        }
        let mut alloc = self.allocation()?;
        let len = self.count(&alloc);
        self.reserve(&mut alloc, raw.len() as u64)?;
        self.rows(&alloc)?.set_range(len, &raw)?;
        self.set_count(&mut alloc, len + raw.len() as u64)
    }

    /// Remove and return the last element
    pub fn pop(&self) -> Result<Option<Value>> {
        let mut alloc = self.allocation()?;
        let len = self.count(&alloc);
        if len == 0 {
            return Ok(None);
        }
        let raw = self.rows(&alloc)?.get_all(len - 1)?;
        self.set_count(&mut alloc, len - 1)?;
        self.decode(&raw).map(Some)
    }

    /// Insert `value` before `index`; `index == len` appends
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let raw = self.encode(&value.into())?;
        let mut alloc = self.allocation()?;
        let len = self.count(&alloc);
        let at = index as u64;
        if at > len {
            return Err(Error::Bounds { index: at, max: len });
        }
        self.reserve(&mut alloc, 1)?;
        let rows = self.rows(&alloc)?;
        rows.copy_block(at, at + 1, len - at)?;
        rows.set_all(at, &raw)?;
        self.set_count(&mut alloc, len + 1)
    }

    /// Remove and return the element at `index`, shifting the tail down
    pub fn remove(&self, index: usize) -> Result<Value> {
        let mut alloc = self.allocation()?;
        let len = self.count(&alloc);
        let at = self.check_index(index, len)?;
        let rows = self.rows(&alloc)?;
        let raw = rows.get_all(at)?;
        rows.copy_block(at + 1, at, len - at - 1)?;
        self.set_count(&mut alloc, len - 1)?;
        self.decode(&raw)
    }

    /// Drop every element; the allocation is kept
    pub fn clear(&self) -> Result<()> {
        self.truncate(0)
    }

    /// Keep only the first `len` elements
    pub fn truncate(&self, len: usize) -> Result<()> {
        let mut alloc = self.allocation()?;
        if (len as u64) < self.count(&alloc) {
            self.set_count(&mut alloc, len as u64)?;
        }
        Ok(())
    }

    /// Every element, in order
    pub fn to_vec(&self) -> Result<Vec<Value>> {
        let alloc = self.allocation()?;
        let len = self.count(&alloc);
        if len == 0 {
            return Ok(Vec::new());
        }
        self.rows(&alloc)?
            .records(0, len)?
            .iter()
            .map(|raw| self.decode(raw))
            .collect()
    }

    /// Position of the first element equal to `value`
    pub fn index_of(&self, value: &Value) -> Result<Option<usize>> {
        Ok(self.to_vec()?.iter().position(|v| v == value))
    }

    /// Whether any element equals `value`
    pub fn contains(&self, value: &Value) -> Result<bool> {
        Ok(self.index_of(value)?.is_some())
    }
}

impl std::fmt::Debug for PersistentList<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentList")
            .field("uid", &self.uid)
            .field("element", &self.element)
            .finish()
    }
}
