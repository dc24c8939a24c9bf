//! Per-class instance storage
//!
//! A Table owns the StructuredFile `<class name>.data`, one row per stored
//! instance, with the columns of every persisted field in the class's
//! resolved order. Each row starts life zeroed with its identity columns
//! (`_schema_oid`, `_schema_genhash`) filled in; the OID table points back
//! at the row, and [`Table::check_identity`] verifies the two agree before
//! an instance is handed out.

use crate::schema::{Class, GENHASH_FIELD, OID_FIELD};
use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use worlddb_core::{Error, Oid, Result, Uid};
use worlddb_storage::paths::class_data_path;
use worlddb_storage::{RecordLayout, Scalar, StructuredFile};

/// Physical storage for one class
#[derive(Debug)]
pub struct Table {
    class: Arc<Class>,
    class_id: i32,
    data: StructuredFile,
    slots: HashMap<String, Range<usize>>,
    oid_column: usize,
    genhash_column: usize,
}

impl Table {
    /// Open (or create) the table for `class` in `dir`
    pub fn open(dir: &Path, class: Arc<Class>, class_id: i32) -> Result<Self> {
        let mut columns = Vec::new();
        let mut slots = HashMap::new();
        for field in class.fields() {
            let low = field.ty.low_columns(&field.name);
            let start = columns.len();
            columns.extend(low);
            slots.insert(field.name.clone(), start..columns.len());
        }
        let layout = RecordLayout::new(columns)?;
        let oid_column = column_of(&layout, OID_FIELD)?;
        let genhash_column = column_of(&layout, GENHASH_FIELD)?;
        let data = StructuredFile::open(class_data_path(dir, class.name()), layout)?;
        debug!(
            target: "worlddb::db",
            class = class.name(),
            class_id,
            rows = data.len()?,
            "Opened table"
        );
        Ok(Table {
            class,
            class_id,
            data,
            slots,
            oid_column,
            genhash_column,
        })
    }

    /// The class this table stores
    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// Registry index of the class
    pub fn class_id(&self) -> i32 {
        self.class_id
    }

    /// Number of rows
    pub fn len(&self) -> Result<u64> {
        self.data.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> Result<bool> {
        self.data.is_empty()
    }

    fn columns(&self, field: &str) -> Result<Range<usize>> {
        self.slots.get(field).cloned().ok_or_else(|| {
            Error::invalid_operation(format!("{} has no field '{}'", self.class.name(), field))
        })
    }

    /// Append a zeroed row owned by `uid`, returning its index
    pub fn reserve_row(&self, uid: Uid) -> Result<u64> {
        let row = self.data.len()?;
        self.data.expand(1)?;
        self.data
            .set_column(row, self.oid_column, &Scalar::Int(uid.oid as i32))?;
        self.data
            .set_column(row, self.genhash_column, &Scalar::Int(uid.genhash))?;
        Ok(row)
    }

    /// Stored owner of a row
    pub fn identity(&self, row: u64) -> Result<Uid> {
        let oid = self.data.get_column(row, self.oid_column)?;
        let genhash = self.data.get_column(row, self.genhash_column)?;
        match (oid, genhash) {
            (Scalar::Int(oid), Scalar::Int(genhash)) if oid >= 0 => {
                Ok(Uid::new(oid as Oid, genhash))
            }
            (oid, genhash) => Err(Error::corruption(format!(
                "{} row {}: bad identity ({}, {})",
                self.class.name(),
                row,
                oid,
                genhash
            ))),
        }
    }

    /// Verify that `row` belongs to `uid`
    pub fn check_identity(&self, row: u64, uid: Uid) -> Result<()> {
        let stored = self.identity(row)?;
        if stored != uid {
            return Err(Error::corruption(format!(
                "{} row {} belongs to oid {} (genhash {:#010x}), OID table says oid {} (genhash {:#010x})",
                self.class.name(),
                row,
                stored.oid,
                stored.genhash,
                uid.oid,
                uid.genhash
            )));
        }
        Ok(())
    }

    /// Raw columns of one field
    pub fn read_field(&self, row: u64, field: &str) -> Result<Vec<Scalar>> {
        self.columns(field)?
            .map(|col| self.data.get_column(row, col))
            .collect()
    }

    /// Overwrite the columns of one field
    pub fn write_field(&self, row: u64, field: &str, values: &[Scalar]) -> Result<()> {
        let columns = self.columns(field)?;
        if values.len() != columns.len() {
            return Err(Error::invalid_operation(format!(
                "{}.{} has {} columns, got {} values",
                self.class.name(),
                field,
                columns.len(),
                values.len()
            )));
        }
        for (col, value) in columns.zip(values) {
            self.data.set_column(row, col, value)?;
        }
        Ok(())
    }

    /// Identities of every row, in row order
    pub fn scan(&self) -> Result<Vec<Uid>> {
        let mut uids = Vec::new();
        for row in 0..self.data.len()? {
            uids.push(self.identity(row)?);
        }
        Ok(uids)
    }

    /// Flush and fsync the data file
    pub fn sync(&self) -> Result<()> {
        self.data.sync()
    }
}

fn column_of(layout: &RecordLayout, name: &str) -> Result<usize> {
    layout
        .column_index(name)
        .ok_or_else(|| Error::corruption(format!("layout lacks identity column {}", name)))
}
