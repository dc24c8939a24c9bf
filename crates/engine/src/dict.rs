//! Persistent hash dictionaries
//!
//! A dictionary is a `worlddb.Dict` object owning one allocation of slot
//! rows. Each slot is a `(state, key, value)` row where state is
//! [`SLOT_UNUSED`], [`SLOT_TOMBSTONE`] or [`SLOT_ACTIVE`]. Keys are placed by
//! linear probing from `hash(key) % capacity`; a lookup stops at the first
//! unused slot, so removal leaves a tombstone rather than breaking probe
//! chains. The number of active slots is kept in `keyValueCount`.
//!
//! Key hashes come from xxh3 over a canonical byte encoding of the key, so
//! they are stable across processes. When no slot is free the table is
//! rehashed into a region twice the size, and the old region is released
//! only after every entry has been copied.

use crate::database::{Allocation, Database, DICT_CLASS};
use crate::list::element_layout;
use crate::schema::FieldType;
use crate::value::{DictRef, Object, Value};
use byteorder::{BigEndian, WriteBytesExt};
use std::sync::Arc;
use tracing::debug;
use worlddb_core::{Error, Result, Uid};
use worlddb_storage::{RecordLayout, Scalar, StructuredFile};
use xxhash_rust::xxh3::xxh3_64;

/// Slot never used; ends a probe sequence
pub const SLOT_UNUSED: i32 = 0;
/// Slot whose entry was removed
pub const SLOT_TOMBSTONE: i32 = 1;
/// Slot holding a live entry
pub const SLOT_ACTIVE: i32 = 2;

const KEY: &str = "key";
const VALUE: &str = "value";

fn slot_type(key: &FieldType, value: &FieldType) -> FieldType {
    FieldType::Tuple(vec![FieldType::Int, key.clone(), value.clone()])
}

/// Stable hash of a key value
fn key_hash(key: &Value) -> Result<u64> {
    let mut bytes = Vec::new();
    canonical_bytes(key, &mut bytes)?;
    Ok(xxh3_64(&bytes))
}

fn canonical_bytes(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => out.push(0),
        Value::Int(v) => {
            out.push(1);
            out.write_i64::<BigEndian>(*v)?;
        }
        Value::Float(v) => {
            out.push(2);
            // 0.0 and -0.0 compare equal, so they must hash equal
            let v = if *v == 0.0 { 0.0 } else { *v };
            out.write_f64::<BigEndian>(v)?;
        }
        Value::Bool(v) => {
            out.push(3);
            out.push(*v as u8);
        }
        Value::Bytes(v) => {
            out.push(4);
            out.write_u32::<BigEndian>(v.len() as u32)?;
            out.extend_from_slice(v);
        }
        Value::Tuple(members) => {
            out.push(5);
            out.write_u32::<BigEndian>(members.len() as u32)?;
            for member in members {
                canonical_bytes(member, out)?;
            }
        }
        Value::Object(obj) => {
            // an unsaved object cannot already be a key
            out.push(6);
            out.extend_from_slice(&obj.uid().unwrap_or(Uid::NULL).to_bytes());
        }
        other => {
            return Err(Error::unsupported(
                KEY,
                format!("{} values cannot be dictionary keys", other.kind()),
            ))
        }
    }
    Ok(())
}

/// Bring a key to the form it decodes back as
fn canonical_key(ty: &FieldType, key: Value) -> Value {
    match (ty, key) {
        (ty, Value::Null) => ty.null(),
        (FieldType::Float, Value::Int(v)) => Value::Float(v as f64),
        (FieldType::Tuple(members), Value::Tuple(values)) if members.len() == values.len() => {
            Value::Tuple(
                members
                    .iter()
                    .zip(values)
                    .map(|(member, value)| canonical_key(member, value))
                    .collect(),
            )
        }
        (_, key) => key,
    }
}

enum Probe {
    /// Key present at this slot; raw row attached
    Found(u64, Vec<Scalar>),
    /// Key absent; first reusable slot on its probe path
    Vacant(u64),
    /// Key absent and no slot free
    Full,
}

impl Database {
    /// Create a dictionary from `key` to `value` holding `entries`
    pub fn new_dict(
        &self,
        key: FieldType,
        value: FieldType,
        entries: &[(Value, Value)],
    ) -> Result<DictRef> {
        FieldType::dict_of(key.clone(), value.clone()).validate()?;
        let row = slot_type(&key, &value);
        let layout = element_layout(&row)?;
        let obj = Object::new(&self.system().dict)
            .with("elementType", row.to_string())?
            .with("keyValueCount", 0)?;
        let uid = self.insert_object(&obj, false)?;
        let capacity = (self.config().dict_initial_capacity as usize).max(entries.len() * 2);
        let mut alloc = self.allocate(uid, (capacity * layout.record_size()) as i64)?;

        let dict = PersistentDict {
            db: self,
            uid,
            key,
            value,
            row,
            layout,
        };
        dict.blank(&alloc, capacity as u64)?;
        alloc.content = (capacity * dict.layout.record_size()) as i64;
        self.store_allocation(&alloc)?;
        debug!(target: "worlddb::db", oid = uid.oid, capacity, "Created dictionary");
        for (k, v) in entries {
            dict.insert(k.clone(), v.clone())?;
        }
        Ok(DictRef {
            uid,
            key: dict.key,
            value: dict.value,
        })
    }

    /// Operation handle for a stored dictionary
    pub fn dict(&self, dict: &DictRef) -> Result<PersistentDict<'_>> {
        let row = slot_type(&dict.key, &dict.value);
        self.check_signature(dict.uid, DICT_CLASS, &row.to_string())?;
        Ok(PersistentDict {
            db: self,
            uid: dict.uid,
            key: dict.key.clone(),
            value: dict.value.clone(),
            layout: element_layout(&row)?,
            row,
        })
    }
}

/// Borrowed operation handle for one persistent dictionary
pub struct PersistentDict<'db> {
    db: &'db Database,
    uid: Uid,
    key: FieldType,
    value: FieldType,
    row: FieldType,
    layout: Arc<RecordLayout>,
}

impl<'db> PersistentDict<'db> {
    /// Identity of the dictionary
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Current allocation backing the slots
    pub fn allocation(&self) -> Result<Allocation> {
        self.db.load_allocation(self.uid)
    }

    /// Number of slots
    pub fn capacity(&self) -> Result<usize> {
        Ok(self.slots(&self.allocation()?) as usize)
    }

    fn slots(&self, alloc: &Allocation) -> u64 {
        (alloc.content / self.layout.record_size() as i64) as u64
    }

    fn rows(&self, alloc: &Allocation) -> Result<StructuredFile> {
        self.db.region_view(alloc, Arc::clone(&self.layout))
    }

    /// Overwrite the first `capacity` slots of `alloc` with unused rows
    fn blank(&self, alloc: &Allocation, capacity: u64) -> Result<StructuredFile> {
        let empty = self.row.encode(self.db, VALUE, &self.row.null())?;
        let rows = self.rows(alloc)?;
        rows.set_range(0, &vec![empty; capacity as usize])?;
        Ok(rows)
    }

    fn key_columns(&self) -> usize {
        self.key.low_columns(KEY).len()
    }

    fn state_of(raw: &[Scalar]) -> Result<i32> {
        match raw.first() {
            Some(Scalar::Int(state)) => Ok(*state),
            other => Err(Error::corruption(format!("dictionary slot has no state column ({:?})", other))),
        }
    }

    fn decode_key(&self, raw: &[Scalar]) -> Result<Value> {
        self.key.decode(self.db, KEY, &raw[1..1 + self.key_columns()])
    }

    fn decode_value(&self, raw: &[Scalar]) -> Result<Value> {
        self.value.decode(self.db, VALUE, &raw[1 + self.key_columns()..])
    }

    fn probe(&self, rows: &StructuredFile, slots: u64, key: &Value) -> Result<Probe> {
        if slots == 0 {
            return Ok(Probe::Full);
        }
        let hash = key_hash(key)?;
        let mut reusable = None;
        for i in 0..slots {
            let pos = hash.wrapping_add(i) % slots;
            let raw = rows.get_all(pos)?;
            match Self::state_of(&raw)? {
                SLOT_UNUSED => return Ok(Probe::Vacant(reusable.unwrap_or(pos))),
                SLOT_TOMBSTONE => {
                    reusable.get_or_insert(pos);
                }
                SLOT_ACTIVE => {
                    if self.decode_key(&raw)? == *key {
                        return Ok(Probe::Found(pos, raw));
                    }
                }
                state => {
                    return Err(Error::corruption(format!(
                        "dictionary {} slot {} has state {}",
                        self.uid, pos, state
                    )))
                }
            }
        }
        Ok(reusable.map_or(Probe::Full, Probe::Vacant))
    }

    fn live_count(&self) -> Result<i64> {
        self.db.read_long(self.uid, "keyValueCount")
    }

    fn set_live_count(&self, count: i64) -> Result<()> {
        self.db
            .write_raw(self.uid, "keyValueCount", &[Scalar::Int(count as i32)])
    }

    /// Number of live entries
    pub fn len(&self) -> Result<usize> {
        Ok(self.live_count()? as usize)
    }

    /// Whether the dictionary has no live entries
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Value stored under `key`
    pub fn get(&self, key: impl Into<Value>) -> Result<Option<Value>> {
        let key = canonical_key(&self.key, key.into());
        let alloc = self.allocation()?;
        match self.probe(&self.rows(&alloc)?, self.slots(&alloc), &key)? {
            Probe::Found(_, raw) => self.decode_value(&raw).map(Some),
            Probe::Vacant(_) | Probe::Full => Ok(None),
        }
    }

    /// Whether `key` is present
    pub fn contains_key(&self, key: impl Into<Value>) -> Result<bool> {
        let key = canonical_key(&self.key, key.into());
        let alloc = self.allocation()?;
        Ok(matches!(
            self.probe(&self.rows(&alloc)?, self.slots(&alloc), &key)?,
            Probe::Found(..)
        ))
    }

    /// Store `value` under `key`, returning the value it replaced.
    ///
    /// Replacing keeps the slot's stored key columns, so a long string key
    /// is not written out again.
    pub fn insert(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<Option<Value>> {
        let key = canonical_key(&self.key, key.into());
        let value = value.into();
        // encoding stores referenced objects, which gives object keys their uid
        let mut key_raw = if key.holds_object() {
            Some(self.key.encode(self.db, KEY, &key)?)
        } else {
            None
        };
        let value_raw = self.value.encode(self.db, VALUE, &value)?;

        loop {
            let alloc = self.allocation()?;
            let rows = self.rows(&alloc)?;
            match self.probe(&rows, self.slots(&alloc), &key)? {
                Probe::Found(pos, old) => {
                    let previous = self.decode_value(&old)?;
                    let mut row = old[..1 + self.key_columns()].to_vec();
                    row.extend_from_slice(&value_raw);
                    rows.set_all(pos, &row)?;
                    return Ok(Some(previous));
                }
                Probe::Vacant(pos) => {
                    let key_raw = match key_raw.take() {
                        Some(raw) => raw,
                        None => self.key.encode(self.db, KEY, &key)?,
                    };
                    let mut row = vec![Scalar::Int(SLOT_ACTIVE)];
                    row.extend(key_raw);
                    row.extend_from_slice(&value_raw);
                    rows.set_all(pos, &row)?;
                    self.set_live_count(self.live_count()? + 1)?;
                    return Ok(None);
                }
                Probe::Full => self.grow()?,
            }
        }
    }

    /// Remove `key`, returning its value
    pub fn remove(&self, key: impl Into<Value>) -> Result<Option<Value>> {
        let key = canonical_key(&self.key, key.into());
        let alloc = self.allocation()?;
        let rows = self.rows(&alloc)?;
        match self.probe(&rows, self.slots(&alloc), &key)? {
            Probe::Found(pos, raw) => {
                let previous = self.decode_value(&raw)?;
                let mut tombstone = self.row.encode(self.db, VALUE, &self.row.null())?;
                tombstone[0] = Scalar::Int(SLOT_TOMBSTONE);
                rows.set_all(pos, &tombstone)?;
                self.set_live_count(self.live_count()? - 1)?;
                Ok(Some(previous))
            }
            Probe::Vacant(_) | Probe::Full => Ok(None),
        }
    }

    /// Rehash every live entry into a region with twice the slots
    fn grow(&self) -> Result<()> {
        let old = self.allocation()?;
        let old_slots = self.slots(&old);
        let mut live = Vec::new();
        for raw in self.rows(&old)?.records(0, old_slots)? {
            if Self::state_of(&raw)? == SLOT_ACTIVE {
                live.push((key_hash(&self.decode_key(&raw)?)?, raw));
            }
        }

        let slots = (old_slots * 2).max(1);
        let size = slots as i64 * self.layout.record_size() as i64;
        let mut fresh = self.db.relocate(&old, size)?;
        let rows = self.blank(&fresh, slots)?;
        for (hash, raw) in &live {
            let mut placed = false;
            for i in 0..slots {
                let pos = hash.wrapping_add(i) % slots;
                if Self::state_of(&rows.get_all(pos)?)? == SLOT_UNUSED {
                    rows.set_all(pos, raw)?;
                    placed = true;
                    break;
                }
            }
            if !placed {
                return Err(Error::corruption(format!(
                    "dictionary {}: rehash into {} slots ran out of room",
                    self.uid, slots
                )));
            }
        }
        fresh.content = size;
        self.db.store_allocation(&fresh)?;
        self.db.release(&old)?;
        debug!(
            target: "worlddb::db",
            oid = self.uid.oid,
            from = old_slots,
            to = slots,
            live = live.len(),
            "Grew dictionary"
        );
        Ok(())
    }

    fn active_rows(&self) -> Result<Vec<Vec<Scalar>>> {
        let alloc = self.allocation()?;
        let mut active = Vec::new();
        for raw in self.rows(&alloc)?.records(0, self.slots(&alloc))? {
            if Self::state_of(&raw)? == SLOT_ACTIVE {
                active.push(raw);
            }
        }
        Ok(active)
    }

    /// Every live entry, in slot order
    pub fn items(&self) -> Result<Vec<(Value, Value)>> {
        self.active_rows()?
            .iter()
            .map(|raw| Ok((self.decode_key(raw)?, self.decode_value(raw)?)))
            .collect()
    }

    /// Every live key, in slot order
    pub fn keys(&self) -> Result<Vec<Value>> {
        self.active_rows()?
            .iter()
            .map(|raw| self.decode_key(raw))
            .collect()
    }

    /// Every live value, in slot order
    pub fn values(&self) -> Result<Vec<Value>> {
        self.active_rows()?
            .iter()
            .map(|raw| self.decode_value(raw))
            .collect()
    }
}

impl std::fmt::Debug for PersistentDict<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentDict")
            .field("uid", &self.uid)
            .field("key", &self.key)
            .field("value", &self.value)
            .finish()
    }
}
