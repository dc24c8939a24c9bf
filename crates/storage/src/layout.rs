//! Fixed-width record layout
//!
//! A record is an ordered list of typed columns packed big-endian with no
//! padding. Each column kind has a format character (the same alphabet the
//! identification header records) and a byte width:
//!
//! | kind      | char | bytes |
//! |-----------|------|-------|
//! | `Int32`   | `i`  | 4     |
//! | `Int64`   | `q`  | 8     |
//! | `Float64` | `d`  | 8     |
//! | `Bool`    | `b`  | 1     |
//! | `Bytes(n)`| `ns` | n     |
//!
//! Offsets and the record size are computed once when the layout is built.

use byteorder::{BigEndian, ByteOrder};
use std::collections::HashMap;
use std::fmt;
use worlddb_core::{Error, Result};

/// Physical type of one column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// IEEE 754 double
    Float64,
    /// Boolean stored as one byte
    Bool,
    /// Fixed-length raw bytes, NUL padded
    Bytes(u32),
}

impl ColumnKind {
    /// Width of the column in bytes
    pub fn size(&self) -> usize {
        match self {
            ColumnKind::Int32 => 4,
            ColumnKind::Int64 => 8,
            ColumnKind::Float64 => 8,
            ColumnKind::Bool => 1,
            ColumnKind::Bytes(n) => *n as usize,
        }
    }

    /// Format token written into the identification header
    pub fn format_token(&self) -> String {
        match self {
            ColumnKind::Int32 => "i".to_string(),
            ColumnKind::Int64 => "q".to_string(),
            ColumnKind::Float64 => "d".to_string(),
            ColumnKind::Bool => "b".to_string(),
            ColumnKind::Bytes(n) => format!("{}s", n),
        }
    }

    /// The all-zero value of this kind
    pub fn zero(&self) -> Scalar {
        match self {
            ColumnKind::Int32 => Scalar::Int(0),
            ColumnKind::Int64 => Scalar::Long(0),
            ColumnKind::Float64 => Scalar::Float(0.0),
            ColumnKind::Bool => Scalar::Bool(false),
            ColumnKind::Bytes(n) => Scalar::Bytes(vec![0; *n as usize]),
        }
    }
}

/// A named column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    /// Column kind
    pub kind: ColumnKind,
    /// Column name, unique within a layout
    pub name: String,
}

impl Column {
    /// Create a column
    pub fn new(kind: ColumnKind, name: impl Into<String>) -> Self {
        Column {
            kind,
            name: name.into(),
        }
    }
}

/// One decoded column value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// `Int32` column value
    Int(i32),
    /// `Int64` column value
    Long(i64),
    /// `Float64` column value
    Float(f64),
    /// `Bool` column value
    Bool(bool),
    /// `Bytes(n)` column value (exactly n bytes when decoded)
    Bytes(Vec<u8>),
}

impl Scalar {
    /// Integer view of `Int` and `Long` scalars
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v as i64),
            Scalar::Long(v) => Some(*v),
            _ => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Scalar::Int(_) => "int32",
            Scalar::Long(_) => "int64",
            Scalar::Float(_) => "float64",
            Scalar::Bool(_) => "bool",
            Scalar::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Long(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Bytes(b) => write!(f, "{}", hex::encode(b)),
        }
    }
}

/// Precomputed geometry of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    columns: Vec<Column>,
    offsets: Vec<usize>,
    record_size: usize,
    by_name: HashMap<String, usize>,
}

impl RecordLayout {
    /// Build a layout from an ordered column list.
    ///
    /// Fails if the list is empty, a name repeats, or a byte column has
    /// zero width.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::invalid_operation("record layout needs at least one column"));
        }
        let mut offsets = Vec::with_capacity(columns.len());
        let mut by_name = HashMap::with_capacity(columns.len());
        let mut current = 0usize;
        for (idx, column) in columns.iter().enumerate() {
            if column.kind == ColumnKind::Bytes(0) {
                return Err(Error::invalid_operation(format!(
                    "column '{}' has zero width",
                    column.name
                )));
            }
            if by_name.insert(column.name.clone(), idx).is_some() {
                return Err(Error::invalid_operation(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
            offsets.push(current);
            current += column.kind.size();
        }
        Ok(RecordLayout {
            columns,
            offsets,
            record_size: current,
            by_name,
        })
    }

    /// Convenience constructor from `(kind, name)` pairs
    pub fn of(columns: &[(ColumnKind, &str)]) -> Result<Self> {
        Self::new(
            columns
                .iter()
                .map(|(kind, name)| Column::new(*kind, *name))
                .collect(),
        )
    }

    /// Columns in storage order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Size of one record in bytes
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Byte offset of a column within the record
    pub fn column_offset(&self, index: usize) -> usize {
        self.offsets[index]
    }

    /// Position of a named column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// The big-endian format string, e.g. `!iqd32s`
    pub fn format_string(&self) -> String {
        let mut fmt = String::from("!");
        for column in &self.columns {
            fmt.push_str(&column.kind.format_token());
        }
        fmt
    }

    /// Field names in storage order
    pub fn field_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// A record with every column zeroed
    pub fn zero_record(&self) -> Vec<Scalar> {
        self.columns.iter().map(|c| c.kind.zero()).collect()
    }

    /// Pack a full record
    pub fn encode(&self, values: &[Scalar]) -> Result<Vec<u8>> {
        if values.len() != self.columns.len() {
            return Err(Error::invalid_operation(format!(
                "record has {} columns, got {} values",
                self.columns.len(),
                values.len()
            )));
        }
        let mut buf = vec![0u8; self.record_size];
        for (idx, value) in values.iter().enumerate() {
            let start = self.offsets[idx];
            let column = &self.columns[idx];
            encode_scalar(column, value, &mut buf[start..start + column.kind.size()])?;
        }
        Ok(buf)
    }

    /// Unpack a full record; `bytes` must be exactly one record long
    pub fn decode(&self, bytes: &[u8]) -> Vec<Scalar> {
        self.columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let start = self.offsets[idx];
                decode_scalar(column.kind, &bytes[start..start + column.kind.size()])
            })
            .collect()
    }
}

/// Pack one value into a column-sized buffer
pub fn encode_scalar(column: &Column, value: &Scalar, out: &mut [u8]) -> Result<()> {
    match (column.kind, value) {
        (ColumnKind::Int32, Scalar::Int(v)) => BigEndian::write_i32(out, *v),
        (ColumnKind::Int64, Scalar::Long(v)) => BigEndian::write_i64(out, *v),
        (ColumnKind::Float64, Scalar::Float(v)) => BigEndian::write_f64(out, *v),
        (ColumnKind::Bool, Scalar::Bool(v)) => out[0] = u8::from(*v),
        (ColumnKind::Bytes(n), Scalar::Bytes(b)) => {
            if b.len() > n as usize {
                return Err(Error::invalid_operation(format!(
                    "{} bytes do not fit column '{}' of width {}",
                    b.len(),
                    column.name,
                    n
                )));
            }
            out[..b.len()].copy_from_slice(b);
            out[b.len()..].fill(0);
        }
        (kind, value) => {
            return Err(Error::invalid_operation(format!(
                "cannot pack {} into column '{}' ({})",
                value.kind_name(),
                column.name,
                kind.format_token()
            )))
        }
    }
    Ok(())
}

/// Unpack one value from a column-sized buffer
pub fn decode_scalar(kind: ColumnKind, bytes: &[u8]) -> Scalar {
    match kind {
        ColumnKind::Int32 => Scalar::Int(BigEndian::read_i32(bytes)),
        ColumnKind::Int64 => Scalar::Long(BigEndian::read_i64(bytes)),
        ColumnKind::Float64 => Scalar::Float(BigEndian::read_f64(bytes)),
        ColumnKind::Bool => Scalar::Bool(bytes[0] != 0),
        ColumnKind::Bytes(_) => Scalar::Bytes(bytes.to_vec()),
    }
}
