//! Database struct and open/close logic
//!
//! A database directory holds:
//! - the OID table (`objects`): one row per minted identity
//! - the class registry (`classes`): class name per class id
//! - one Table per registered class
//! - the FragmentFiles backing blobs, lists and dictionaries
//!
//! ## Identity
//!
//! Every stored object is addressed by a [`Uid`], the pair of its OID (row
//! in the OID table) and a random generation hash minted at insert. A UID
//! whose hash disagrees with the OID table is rejected as stale rather than
//! resolved to whatever occupies the slot now. Live objects are interned in
//! a weak identity cache, so retrieving the same UID twice while a handle
//! is alive yields the same [`Object`].
//!
//! ## Writes
//!
//! Every write is an immediate positioned write. There is no journal and no
//! rollback: a failure part way through an insert leaves the fields written
//! so far on disk.

pub mod config;
mod heap;
mod system;

pub use config::{WorldConfig, CONFIG_FILE_NAME};
pub use heap::Allocation;
pub use system::{ALLOCATION_CLASS, BLOB_CLASS, DICT_CLASS, FRAGMENT_FILE_CLASS, LIST_CLASS};

use crate::schema::{Class, FieldType, MAX_CLASS_NAME};
use crate::table::Table;
use crate::typemap::ValueStore;
use crate::value::{Binding, DictRef, ListRef, Object, ObjectInner, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use system::SystemClasses;
use tracing::{debug, info, trace, warn};
use worlddb_core::uid::mint_genhash;
use worlddb_core::{Error, Oid, Result, Uid};
use worlddb_storage::paths::{CLASSES_FILE, LOCK_FILE, OBJECTS_FILE};
use worlddb_storage::{ColumnKind, FragmentFile, RecordLayout, Scalar, StructuredFile};

// ============================================================================
// On-disk tables
// ============================================================================

fn objects_layout() -> Result<RecordLayout> {
    RecordLayout::of(&[
        (ColumnKind::Int32, "hash"),
        (ColumnKind::Bool, "root"),
        (ColumnKind::Int32, "refcount"),
        (ColumnKind::Int64, "offset"),
        (ColumnKind::Int32, "classId"),
    ])
}

fn classes_layout() -> Result<RecordLayout> {
    RecordLayout::of(&[(ColumnKind::Bytes(MAX_CLASS_NAME as u32), "classname")])
}

/// One row of the OID table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OidEntry {
    genhash: i32,
    root: bool,
    refcount: i32,
    offset: u64,
    class_id: i32,
}

impl OidEntry {
    fn parse(oid: Oid, raw: &[Scalar]) -> Result<Self> {
        match raw {
            [Scalar::Int(genhash), Scalar::Bool(root), Scalar::Int(refcount), Scalar::Long(offset), Scalar::Int(class_id)]
                if *offset >= 0 =>
            {
                Ok(OidEntry {
                    genhash: *genhash,
                    root: *root,
                    refcount: *refcount,
                    offset: *offset as u64,
                    class_id: *class_id,
                })
            }
            _ => Err(Error::corruption(format!("OID table row {} is malformed", oid))),
        }
    }
}

/// Registered classes and their open tables
#[derive(Default)]
struct Catalog {
    /// Class id by name
    ids: HashMap<String, i32>,
    /// Class name by id; entry 0 is reserved
    names: Vec<String>,
    /// Tables opened in this process
    tables: HashMap<i32, Arc<Table>>,
}

/// Weak map from OID to live object
struct IdentityCache {
    entries: HashMap<Oid, Weak<ObjectInner>>,
    prune_at: usize,
}

const CACHE_PRUNE_FLOOR: usize = 1024;

impl IdentityCache {
    fn new() -> Self {
        IdentityCache {
            entries: HashMap::new(),
            prune_at: CACHE_PRUNE_FLOOR,
        }
    }

    fn get(&mut self, oid: Oid) -> Option<Object> {
        let weak = self.entries.get(&oid)?;
        match Object::upgrade(weak) {
            Some(obj) => Some(obj),
            None => {
                self.entries.remove(&oid);
                None
            }
        }
    }

    fn insert(&mut self, oid: Oid, obj: &Object) {
        self.entries.insert(oid, obj.downgrade());
        if self.entries.len() >= self.prune_at {
            let before = self.entries.len();
            self.entries.retain(|_, weak| weak.strong_count() > 0);
            self.prune_at = (self.entries.len() * 2).max(CACHE_PRUNE_FLOOR);
            trace!(
                target: "worlddb::db",
                pruned = before - self.entries.len(),
                live = self.entries.len(),
                "Pruned identity cache"
            );
        }
    }

    fn live(&self) -> usize {
        self.entries.values().filter(|w| w.strong_count() > 0).count()
    }
}

// ============================================================================
// Queries
// ============================================================================

type Predicate<'a> = Box<dyn Fn(&Database, &Object) -> Result<bool> + 'a>;

/// Filter for [`Database::query_class_select`].
///
/// ```ignore
/// let adults = db.query_class_select(&person, &Query::all().field_eq("age", 30))?;
/// ```
#[derive(Default)]
pub struct Query<'a> {
    predicate: Option<Predicate<'a>>,
    equals: Vec<(String, Value)>,
}

impl<'a> Query<'a> {
    /// Match every instance
    pub fn all() -> Self {
        Query::default()
    }

    /// Require a persisted field to equal `value`
    pub fn field_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.equals.push((field.to_string(), value.into()));
        self
    }

    /// Require an arbitrary predicate to hold
    pub fn filter(mut self, predicate: impl Fn(&Database, &Object) -> Result<bool> + 'a) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    fn matches(&self, db: &Database, obj: &Object) -> Result<bool> {
        if let Some(predicate) = &self.predicate {
            if !predicate(db, obj)? {
                return Ok(false);
            }
        }
        for (field, expected) in &self.equals {
            if db.get(obj, field)? != *expected {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl fmt::Debug for Query<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("predicate", &self.predicate.is_some())
            .field("equals", &self.equals)
            .finish()
    }
}

/// Counts reported by [`Database::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Identities minted (the reserved OID 0 excluded)
    pub objects: u64,
    /// Registered classes, built-in ones included
    pub classes: usize,
    /// FragmentFiles in use
    pub fragment_files: usize,
    /// Object handles currently alive in the identity cache
    pub cached_objects: usize,
}

// ============================================================================
// Database
// ============================================================================

/// An open object store directory.
///
/// Opening takes an exclusive lock on the directory; it is released when
/// the database is closed or dropped.
pub struct Database {
    dir: PathBuf,
    config: WorldConfig,
    _lock_file: File,
    objects: StructuredFile,
    classes: StructuredFile,
    system: SystemClasses,
    catalog: Mutex<Catalog>,
    cache: Mutex<IdentityCache>,
    /// Open FragmentFiles by the OID of their system object.
    /// Lock order: `heap` before `catalog`.
    heap: Mutex<HashMap<Oid, FragmentFile>>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) a database directory using its `worlddb.toml`.
    ///
    /// A default config file is written on first open.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the config file is invalid
    /// - `Error::Locked` if another handle has the directory open
    /// - `Error::SchemaMismatch` if a bookkeeping file has an unexpected layout
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let config_path = dir.join(CONFIG_FILE_NAME);
        WorldConfig::write_default_if_missing(&config_path)?;
        let config = WorldConfig::from_file(&config_path)?;
        Self::open_with_config(dir, config)
    }

    /// Open (or create) a database directory with an explicit config.
    ///
    /// The config is written to `worlddb.toml` so later plain opens see it.
    pub fn open_with_config(dir: impl AsRef<Path>, config: WorldConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        config.write_to_file(&dir.join(CONFIG_FILE_NAME))?;

        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(dir.join(LOCK_FILE))?;
        fs2::FileExt::try_lock_exclusive(&lock_file).map_err(|_| Error::Locked(dir.clone()))?;

        let objects = StructuredFile::open(dir.join(OBJECTS_FILE), objects_layout()?)?;
        if objects.is_empty()? {
            // OID 0 is the null reference
            objects.append(&objects.layout().zero_record())?;
        }
        let classes = StructuredFile::open(dir.join(CLASSES_FILE), classes_layout()?)?;
        if classes.is_empty()? {
            classes.append(&[Scalar::Bytes(Vec::new())])?;
        }

        let mut catalog = Catalog::default();
        for (id, record) in classes.iter()?.enumerate() {
            let name = match record?.into_iter().next() {
                Some(Scalar::Bytes(raw)) => class_name_from(&raw)?,
                _ => return Err(Error::corruption(format!("class registry entry {} is malformed", id))),
            };
            if !name.is_empty() {
                catalog.ids.insert(name.clone(), id as i32);
            }
            catalog.names.push(name);
        }

        let db = Database {
            system: SystemClasses::build()?,
            config,
            _lock_file: lock_file,
            objects,
            classes,
            catalog: Mutex::new(catalog),
            cache: Mutex::new(IdentityCache::new()),
            heap: Mutex::new(HashMap::new()),
            dir,
        };
        for class in db.system.all() {
            db.register_class(class)?;
        }
        info!(
            target: "worlddb::db",
            path = %db.dir.display(),
            objects = db.objects.len()?.saturating_sub(1),
            classes = db.catalog.lock().ids.len(),
            "Opened database"
        );
        Ok(db)
    }

    /// Directory this database lives in
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Active configuration
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// String type with the configured default inline width
    pub fn string_type(&self) -> FieldType {
        FieldType::FixedString(self.config.string_inline)
    }

    /// Flush every open file and release the directory lock.
    pub fn close(self) -> Result<()> {
        if self.config.sync_on_close {
            self.sync()?;
        }
        if let Err(e) = fs2::FileExt::unlock(&self._lock_file) {
            warn!(
                target: "worlddb::db",
                path = %self.dir.display(),
                error = %e,
                "Failed to release directory lock"
            );
        }
        info!(target: "worlddb::db", path = %self.dir.display(), "Closed database");
        Ok(())
    }

    /// fsync the OID table, registry, every open table and FragmentFile
    pub fn sync(&self) -> Result<()> {
        self.objects.sync()?;
        self.classes.sync()?;
        for file in self.heap.lock().values() {
            file.sync()?;
        }
        let tables: Vec<Arc<Table>> = self.catalog.lock().tables.values().cloned().collect();
        for table in tables {
            table.sync()?;
        }
        Ok(())
    }

    // ========================================================================
    // Class registry
    // ========================================================================

    /// Register a class, opening (or creating) its table.
    ///
    /// Registering is idempotent. A class whose resolved layout differs from
    /// the one already registered under its name, or from the header of its
    /// existing table file, is a `SchemaMismatch`.
    pub fn register_class(&self, class: &Arc<Class>) -> Result<()> {
        self.table_for(class).map(|_| ())
    }

    fn table_for(&self, class: &Arc<Class>) -> Result<Arc<Table>> {
        let mut catalog = self.catalog.lock();
        let id = match catalog.ids.get(class.name()) {
            Some(id) => *id,
            None => {
                let name = class.name().as_bytes();
                if name.len() > MAX_CLASS_NAME {
                    return Err(Error::invalid_operation(format!(
                        "class name '{}' is longer than {} bytes",
                        class.name(),
                        MAX_CLASS_NAME
                    )));
                }
                let id = catalog.names.len() as i32;
                self.classes.append(&[Scalar::Bytes(name.to_vec())])?;
                catalog.ids.insert(class.name().to_string(), id);
                catalog.names.push(class.name().to_string());
                info!(target: "worlddb::db", class = class.name(), class_id = id, "Registered class");
                id
            }
        };
        if let Some(table) = catalog.tables.get(&id) {
            if !table.class().same_layout(class) {
                return Err(Error::SchemaMismatch {
                    path: worlddb_storage::paths::class_data_path(&self.dir, class.name()),
                    detail: format!(
                        "class {} is already registered as {}, now declared as {}",
                        class.name(),
                        table.class(),
                        class
                    ),
                });
            }
            return Ok(Arc::clone(table));
        }
        let table = Arc::new(Table::open(&self.dir, Arc::clone(class), id)?);
        catalog.tables.insert(id, Arc::clone(&table));
        Ok(table)
    }

    fn table_by_id(&self, class_id: i32) -> Result<Arc<Table>> {
        let catalog = self.catalog.lock();
        if let Some(table) = catalog.tables.get(&class_id) {
            return Ok(Arc::clone(table));
        }
        match usize::try_from(class_id).ok().and_then(|i| catalog.names.get(i)) {
            Some(name) if !name.is_empty() => Err(Error::UnknownClass(name.clone())),
            _ => Err(Error::corruption(format!("class id {} is not in the registry", class_id))),
        }
    }

    /// Names of every class in the registry, in registration order
    pub fn class_names(&self) -> Vec<String> {
        self.catalog
            .lock()
            .names
            .iter()
            .filter(|name| !name.is_empty())
            .cloned()
            .collect()
    }

    // ========================================================================
    // OID table
    // ========================================================================

    fn oid_entry(&self, oid: Oid) -> Result<OidEntry> {
        OidEntry::parse(oid, &self.objects.get_all(oid as u64)?)
    }

    /// OID table row for a UID, checked for range, generation and liveness
    fn entry(&self, uid: Uid) -> Result<OidEntry> {
        let len = self.objects.len()?;
        if uid.oid == 0 || uid.oid as u64 >= len {
            return Err(Error::NotFound(format!(
                "oid {} is out of range ({} identities)",
                uid.oid,
                len.saturating_sub(1)
            )));
        }
        let entry = self.oid_entry(uid.oid)?;
        if entry.genhash != uid.genhash {
            return Err(Error::StaleReference {
                uid: uid.to_string(),
                stored: entry.genhash,
            });
        }
        if entry.refcount == 0 {
            return Err(Error::NotFound(format!("{} has been freed", uid)));
        }
        Ok(entry)
    }

    fn mint(&self, class_id: i32, root: bool) -> Result<Uid> {
        let oid = self.objects.len()?;
        let oid = Oid::try_from(oid)
            .ok()
            .filter(|oid| *oid <= i32::MAX as Oid)
            .ok_or_else(|| Error::invalid_operation("OID space exhausted"))?;
        let genhash = mint_genhash();
        self.objects.set_all(
            oid as u64,
            &[
                Scalar::Int(genhash),
                Scalar::Bool(root),
                Scalar::Int(root as i32 + 1),
                Scalar::Long(0),
                Scalar::Int(class_id),
            ],
        )?;
        Ok(Uid::new(oid, genhash))
    }

    // ========================================================================
    // Insert / retrieve
    // ========================================================================

    /// Persist `obj` as a root object and return its UID string.
    ///
    /// Inserting an object that is already stored returns its existing UID.
    /// Objects reachable through reference, list and dictionary fields are
    /// inserted along the way.
    pub fn insert(&self, obj: &Object) -> Result<String> {
        Ok(self.insert_object(obj, true)?.to_string())
    }

    pub(crate) fn insert_object(&self, obj: &Object, root: bool) -> Result<Uid> {
        if let Some(uid) = obj.uid() {
            return Ok(uid);
        }
        let table = self.table_for(obj.class())?;
        let uid = self.mint(table.class_id(), root)?;
        let row = table.reserve_row(uid)?;
        // fields not yet written read as null rather than as zeroed columns
        for field in table.class().data_fields() {
            let raw = field.ty.encode(self, &field.name, &field.ty.null())?;
            table.write_field(row, &field.name, &raw)?;
        }
        self.objects
            .set_at(uid.oid as u64, "offset", &Scalar::Long(row as i64))?;
        let mut pending = obj.bind(Binding {
            uid,
            row,
            class_id: table.class_id(),
        })?;
        self.cache.lock().insert(uid.oid, obj);
        debug!(
            target: "worlddb::db",
            oid = uid.oid,
            class = obj.class().name(),
            row,
            root,
            "Inserted object"
        );

        // Identity is in place before any field is encoded, so cycles back
        // to this object resolve to its UID.
        for field in table.class().data_fields() {
            if let Some(value) = pending.remove(&field.name) {
                let raw = field.ty.encode(self, &field.name, &value)?;
                table.write_field(row, &field.name, &raw)?;
            }
        }
        Ok(uid)
    }

    /// Object for a UID string; the null UID yields `None`.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidUid` if the string does not decode
    /// - `Error::StaleReference` if the generation hash does not match
    /// - `Error::NotFound` if the OID is out of range or freed
    /// - `Error::UnknownClass` if the object's class is not registered in
    ///   this process
    pub fn retrieve(&self, uid: &str) -> Result<Option<Object>> {
        self.retrieve_uid(uid.parse()?)
    }

    /// Object for a UID; the null UID yields `None`.
    pub fn retrieve_uid(&self, uid: Uid) -> Result<Option<Object>> {
        if uid.oid == 0 {
            if uid.genhash != 0 {
                return Err(Error::InvalidUid(uid.to_string()));
            }
            return Ok(None);
        }
        let cached = self.cache.lock().get(uid.oid);
        if let Some(obj) = cached {
            return match obj.uid() {
                Some(current) if current == uid => Ok(Some(obj)),
                current => Err(Error::StaleReference {
                    uid: uid.to_string(),
                    stored: current.map_or(0, |c| c.genhash),
                }),
            };
        }
        let entry = self.entry(uid)?;
        let table = self.table_by_id(entry.class_id)?;
        table.check_identity(entry.offset, uid)?;
        let obj = Object::stored(
            Arc::clone(table.class()),
            Binding {
                uid,
                row: entry.offset,
                class_id: entry.class_id,
            },
        );
        self.cache.lock().insert(uid.oid, &obj);
        debug!(
            target: "worlddb::db",
            oid = uid.oid,
            class = table.class().name(),
            "Retrieved object"
        );
        Ok(Some(obj))
    }

    /// UID string of a stored object
    pub fn uid_of(&self, obj: &Object) -> Option<String> {
        obj.uid().map(|uid| uid.to_string())
    }

    // ========================================================================
    // Attribute access
    // ========================================================================

    /// Read an attribute.
    ///
    /// Stored attributes are decoded from the row on first access and cached
    /// on the handle. Values holding object handles are not cached; they are
    /// resolved through the identity cache on every read, so handles only
    /// keep each other alive while the caller holds them. Ephemeral
    /// attributes never touch storage and read as `Null` until set.
    pub fn get(&self, obj: &Object, field: &str) -> Result<Value> {
        let class = obj.class();
        if class.is_ephemeral(field) {
            return Ok(obj.get(field).unwrap_or(Value::Null));
        }
        let ty = &class
            .field(field)
            .ok_or_else(|| no_field(class, field))?
            .ty;
        if let Some(value) = obj.get(field) {
            return Ok(value);
        }
        let Some(binding) = obj.binding() else {
            return Ok(ty.null());
        };
        let table = self.table_by_id(binding.class_id)?;
        let raw = table.read_field(binding.row, field)?;
        let value = ty.decode(self, field, &raw)?;
        if !value.holds_object() {
            obj.cache_put(field, value.clone());
        }
        Ok(value)
    }

    /// Write an attribute.
    ///
    /// For a stored object the value is encoded and written to its row
    /// immediately; the cached copy is dropped so the next read decodes what
    /// was stored. A string field that held an external blob gives the
    /// blob's range back to its FragmentFile once the new value is written.
    pub fn set(&self, obj: &Object, field: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let class = obj.class();
        let binding = match obj.binding() {
            Some(binding) if !class.is_ephemeral(field) => binding,
            _ => return obj.set(field, value),
        };
        let ty = class
            .field(field)
            .ok_or_else(|| no_field(class, field))?
            .ty
            .clone();
        let raw = ty.encode(self, field, &value)?;
        let table = self.table_by_id(binding.class_id)?;
        let stale = match ty {
            FieldType::FixedString(_) => external_blob(&table.read_field(binding.row, field)?),
            _ => None,
        };
        table.write_field(binding.row, field, &raw)?;
        obj.invalidate(field);
        if let Some(blob) = stale {
            self.free_blob(blob)?;
        }
        Ok(())
    }

    /// Locate the row of a live UID
    fn locate(&self, uid: Uid) -> Result<(Arc<Table>, u64)> {
        let entry = self.entry(uid)?;
        Ok((self.table_by_id(entry.class_id)?, entry.offset))
    }

    /// Raw columns of a field, bypassing the object cache
    pub(crate) fn read_raw(&self, uid: Uid, field: &str) -> Result<Vec<Scalar>> {
        let (table, row) = self.locate(uid)?;
        table.read_field(row, field)
    }

    /// Overwrite the raw columns of a field and drop any cached copy
    pub(crate) fn write_raw(&self, uid: Uid, field: &str, raw: &[Scalar]) -> Result<()> {
        let (table, row) = self.locate(uid)?;
        table.write_field(row, field, raw)?;
        let cached = self.cache.lock().get(uid.oid);
        if let Some(obj) = cached {
            obj.invalidate(field);
        }
        Ok(())
    }

    pub(crate) fn read_long(&self, uid: Uid, field: &str) -> Result<i64> {
        let raw = self.read_raw(uid, field)?;
        raw.first().and_then(Scalar::as_i64).ok_or_else(|| {
            Error::corruption(format!("{}.{} is not an integer column", uid, field))
        })
    }

    pub(crate) fn system(&self) -> &SystemClasses {
        &self.system
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Every stored instance of `class` matching `query`.
    ///
    /// This is a full scan of the class's table; each row is retrieved and
    /// all of its persisted fields decoded before the filters run.
    pub fn query_class_select(&self, class: &Arc<Class>, query: &Query<'_>) -> Result<Vec<Object>> {
        for (field, _) in &query.equals {
            if class.field(field).is_none() {
                return Err(no_field(class, field));
            }
        }
        let table = self.table_for(class)?;
        let mut found = Vec::new();
        for uid in table.scan()? {
            let Some(obj) = self.retrieve_uid(uid)? else {
                continue;
            };
            for field in class.data_fields() {
                self.get(&obj, &field.name)?;
            }
            if query.matches(self, &obj)? {
                found.push(obj);
            }
        }
        debug!(
            target: "worlddb::db",
            class = class.name(),
            matched = found.len(),
            "Class select"
        );
        Ok(found)
    }

    /// Check every FragmentFile's tiling and every live OID's row identity.
    ///
    /// Inconsistencies are logged and reported as `Ok(false)`; I/O failures
    /// are returned as errors.
    pub fn sanity_check(&self) -> Result<bool> {
        let mut sound = true;
        for ff in self.fragment_files()? {
            match self.with_fragment_file(ff, |file| file.check_tiling()) {
                Ok(()) => {}
                Err(Error::Corruption(detail)) => {
                    warn!(target: "worlddb::alloc", fragfile = ff.oid, %detail, "Fragment file failed tiling check");
                    sound = false;
                }
                Err(e) => return Err(e),
            }
        }
        for oid in 1..self.objects.len()? {
            let oid = oid as Oid;
            let entry = self.oid_entry(oid)?;
            if entry.refcount == 0 {
                continue;
            }
            let table = match self.table_by_id(entry.class_id) {
                Ok(table) => table,
                // rows of classes not registered in this process are skipped
                Err(Error::UnknownClass(_)) => continue,
                Err(Error::Corruption(detail)) => {
                    warn!(target: "worlddb::db", oid, %detail, "OID table entry failed check");
                    sound = false;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Err(e) = table.check_identity(entry.offset, Uid::new(oid, entry.genhash)) {
                match e {
                    Error::Corruption(detail) => {
                        warn!(target: "worlddb::db", oid, %detail, "Object failed identity check");
                        sound = false;
                    }
                    other => return Err(other),
                }
            }
        }
        info!(target: "worlddb::db", sound, "Sanity check finished");
        Ok(sound)
    }

    /// Summary counts
    pub fn stats(&self) -> Result<DatabaseStats> {
        Ok(DatabaseStats {
            objects: self.objects.len()?.saturating_sub(1),
            classes: self.catalog.lock().ids.len(),
            fragment_files: self.fragment_files()?.len(),
            cached_objects: self.cache.lock().live(),
        })
    }

    #[cfg(test)]
    fn tamper_genhash(&self, oid: Oid, genhash: i32) -> Result<()> {
        self.objects.set_at(oid as u64, "hash", &Scalar::Int(genhash))
    }

    #[cfg(test)]
    fn is_root(&self, uid: Uid) -> Result<bool> {
        Ok(self.entry(uid)?.root)
    }
}

/// Blob referenced by the raw columns of a string field, if any
fn external_blob(raw: &[Scalar]) -> Option<Uid> {
    match raw {
        [Scalar::Int(oid), Scalar::Int(genhash), ..] if *oid > 0 => {
            Some(Uid::new(*oid as Oid, *genhash))
        }
        _ => None,
    }
}

fn no_field(class: &Class, field: &str) -> Error {
    Error::invalid_operation(format!("{} has no field '{}'", class.name(), field))
}

fn class_name_from(raw: &[u8]) -> Result<String> {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8(raw[..end].to_vec())
        .map_err(|_| Error::corruption("class registry holds a non-UTF-8 name"))
}

impl ValueStore for Database {
    fn store_blob(&self, bytes: &[u8]) -> Result<Uid> {
        Database::store_blob(self, bytes)
    }

    fn load_blob(&self, uid: Uid) -> Result<Vec<u8>> {
        Database::load_blob(self, uid)
    }

    fn insert_ref(&self, obj: &Object) -> Result<Uid> {
        self.insert_object(obj, false)
    }

    fn resolve_ref(&self, uid: Uid) -> Result<Option<Object>> {
        self.retrieve_uid(uid)
    }

    fn create_list(&self, element: &FieldType, items: &[Value]) -> Result<ListRef> {
        self.new_list(element.clone(), items)
    }

    fn create_dict(
        &self,
        key: &FieldType,
        value: &FieldType,
        entries: &[(Value, Value)],
    ) -> Result<DictRef> {
        self.new_dict(key.clone(), value.clone(), entries)
    }
}
