//! Mapping attribute values to record columns
//!
//! Each [`FieldType`] knows which low-level columns it occupies and how to
//! move a [`Value`] in and out of them:
//!
//! | shape          | columns                                              |
//! |----------------|------------------------------------------------------|
//! | int/long/...   | `name`                                               |
//! | `str(n)`       | `name$oid`, `name$genhash`, `name$len`, `name$data`  |
//! | tuple          | each member's columns under `name$0`, `name$1`, ...  |
//! | ref/list/dict  | `name$oid`, `name$genhash`                           |
//!
//! Strings longer than their inline width are written to a separate blob
//! and only the blob's identity is kept in the row; `$len` is then -1, as
//! it is for an absent string. References encode `(0, 0)` for null. Storing
//! an unsaved object inserts it first, so whole graphs persist from one
//! root.

use crate::schema::FieldType;
use crate::value::{DictRef, ListRef, Object, Value};
use std::slice::Iter;
use worlddb_core::{Error, Result, Uid};
use worlddb_storage::{Column, ColumnKind, Scalar};

/// Length marker for absent or externally stored strings.
///
/// All-zero string columns are an empty inline string, not null; tables
/// write the null encoding of every field when a row is reserved, so zeroed
/// columns are never read as a field value.
pub const EXTERNAL_LEN: i32 = -1;

/// Database services a mapping needs for anything variable-length
pub trait ValueStore {
    /// Persist bytes as a blob, returning its identity
    fn store_blob(&self, bytes: &[u8]) -> Result<Uid>;

    /// Read back a blob
    fn load_blob(&self, uid: Uid) -> Result<Vec<u8>>;

    /// Identity of `obj`, inserting it (as a non-root) if needed
    fn insert_ref(&self, obj: &Object) -> Result<Uid>;

    /// Object for a non-null identity
    fn resolve_ref(&self, uid: Uid) -> Result<Option<Object>>;

    /// Create a persistent list holding `items`
    fn create_list(&self, element: &FieldType, items: &[Value]) -> Result<ListRef>;

    /// Create a persistent dictionary holding `entries`
    fn create_dict(
        &self,
        key: &FieldType,
        value: &FieldType,
        entries: &[(Value, Value)],
    ) -> Result<DictRef>;
}

fn sub(name: &str, part: &str) -> String {
    format!("{}${}", name, part)
}

fn mismatch(field: &str, ty: &FieldType, value: &Value) -> Error {
    Error::unsupported(field, format!("cannot store {} as {}", value.kind(), ty))
}

fn next<'a>(field: &str, raw: &mut Iter<'a, Scalar>) -> Result<&'a Scalar> {
    raw.next()
        .ok_or_else(|| Error::corruption(format!("row ended before field '{}'", field)))
}

fn next_int(field: &str, raw: &mut Iter<'_, Scalar>) -> Result<i32> {
    match next(field, raw)? {
        Scalar::Int(v) => Ok(*v),
        other => Err(Error::corruption(format!(
            "field '{}': expected int32 column, found {}",
            field, other
        ))),
    }
}

fn uid_columns(uid: Uid) -> [Scalar; 2] {
    [Scalar::Int(uid.oid as i32), Scalar::Int(uid.genhash)]
}

fn next_uid(field: &str, raw: &mut Iter<'_, Scalar>) -> Result<Option<Uid>> {
    let oid = next_int(field, raw)?;
    let genhash = next_int(field, raw)?;
    if oid < 0 {
        return Err(Error::corruption(format!(
            "field '{}': negative oid {}",
            field, oid
        )));
    }
    Ok((oid != 0).then(|| Uid::new(oid as u32, genhash)))
}

impl FieldType {
    /// Columns this shape occupies when stored under `name`
    pub fn low_columns(&self, name: &str) -> Vec<Column> {
        match self {
            FieldType::Int => vec![Column::new(ColumnKind::Int32, name)],
            FieldType::Long => vec![Column::new(ColumnKind::Int64, name)],
            FieldType::Float => vec![Column::new(ColumnKind::Float64, name)],
            FieldType::Bool => vec![Column::new(ColumnKind::Bool, name)],
            FieldType::FixedString(n) => vec![
                Column::new(ColumnKind::Int32, sub(name, "oid")),
                Column::new(ColumnKind::Int32, sub(name, "genhash")),
                Column::new(ColumnKind::Int32, sub(name, "len")),
                Column::new(ColumnKind::Bytes(*n), sub(name, "data")),
            ],
            FieldType::Tuple(members) => members
                .iter()
                .enumerate()
                .flat_map(|(i, member)| member.low_columns(&sub(name, &i.to_string())))
                .collect(),
            FieldType::Ref(_) | FieldType::List(_) | FieldType::Dict(_, _) => vec![
                Column::new(ColumnKind::Int32, sub(name, "oid")),
                Column::new(ColumnKind::Int32, sub(name, "genhash")),
            ],
        }
    }

    /// Bytes this shape occupies in a record
    pub fn physical_size(&self) -> usize {
        self.low_columns("_")
            .iter()
            .map(|c| c.kind.size())
            .sum()
    }

    /// The canonical empty value of this shape
    pub fn null(&self) -> Value {
        match self {
            FieldType::Int | FieldType::Long => Value::Int(0),
            FieldType::Float => Value::Float(0.0),
            FieldType::Bool => Value::Bool(false),
            FieldType::Tuple(members) => Value::Tuple(members.iter().map(FieldType::null).collect()),
            FieldType::FixedString(_)
            | FieldType::Ref(_)
            | FieldType::List(_)
            | FieldType::Dict(_, _) => Value::Null,
        }
    }

    /// Encode `value` into this shape's columns
    pub fn encode(&self, store: &dyn ValueStore, field: &str, value: &Value) -> Result<Vec<Scalar>> {
        let mut out = Vec::new();
        self.encode_into(store, field, value, &mut out)?;
        Ok(out)
    }

    fn encode_into(
        &self,
        store: &dyn ValueStore,
        field: &str,
        value: &Value,
        out: &mut Vec<Scalar>,
    ) -> Result<()> {
        if value.is_null() {
            let null = self.null();
            if !null.is_null() {
                return self.encode_into(store, field, &null, out);
            }
        }
        match (self, value) {
            (FieldType::Int, Value::Int(v)) => {
                let v = i32::try_from(*v).map_err(|_| {
                    Error::unsupported(field, format!("{} does not fit a 32-bit int", v))
                })?;
                out.push(Scalar::Int(v));
            }
            (FieldType::Long, Value::Int(v)) => out.push(Scalar::Long(*v)),
            (FieldType::Float, Value::Float(v)) => out.push(Scalar::Float(*v)),
            (FieldType::Float, Value::Int(v)) => out.push(Scalar::Float(*v as f64)),
            (FieldType::Bool, Value::Bool(v)) => out.push(Scalar::Bool(*v)),

            (FieldType::FixedString(_), Value::Null) => {
                out.extend(uid_columns(Uid::NULL));
                out.push(Scalar::Int(EXTERNAL_LEN));
                out.push(Scalar::Bytes(Vec::new()));
            }
            (FieldType::FixedString(n), Value::Bytes(bytes)) => {
                if bytes.len() <= *n as usize {
                    out.extend(uid_columns(Uid::NULL));
                    out.push(Scalar::Int(bytes.len() as i32));
                    out.push(Scalar::Bytes(bytes.clone()));
                } else {
                    let uid = store.store_blob(bytes)?;
                    out.extend(uid_columns(uid));
                    out.push(Scalar::Int(EXTERNAL_LEN));
                    out.push(Scalar::Bytes(Vec::new()));
                }
            }

            (FieldType::Tuple(members), Value::Tuple(values)) => {
                if members.len() != values.len() {
                    return Err(Error::unsupported(
                        field,
                        format!("tuple of {} stored as {}", values.len(), self),
                    ));
                }
                for (i, (member, value)) in members.iter().zip(values).enumerate() {
                    member.encode_into(store, &sub(field, &i.to_string()), value, out)?;
                }
            }

            (FieldType::Ref(_), Value::Null)
            | (FieldType::List(_), Value::Null)
            | (FieldType::Dict(_, _), Value::Null) => out.extend(uid_columns(Uid::NULL)),

            (FieldType::Ref(constraint), Value::Object(obj)) => {
                if let Some(class) = constraint {
                    if !obj.class().is_a(class) {
                        return Err(Error::unsupported(
                            field,
                            format!("{} is not a {}", obj.class().name(), class),
                        ));
                    }
                }
                let uid = store.insert_ref(obj)?;
                out.extend(uid_columns(uid));
            }

            (FieldType::List(element), Value::Seq(items)) => {
                let list = store.create_list(element, items)?;
                out.extend(uid_columns(list.uid));
            }
            (FieldType::List(element), Value::List(list)) => {
                if list.element != **element {
                    return Err(Error::unsupported(
                        field,
                        format!("list({}) stored as {}", list.element, self),
                    ));
                }
                out.extend(uid_columns(list.uid));
            }

            (FieldType::Dict(key, val), Value::Map(entries)) => {
                let dict = store.create_dict(key, val, entries)?;
                out.extend(uid_columns(dict.uid));
            }
            (FieldType::Dict(key, val), Value::Dict(dict)) => {
                if dict.key != **key || dict.value != **val {
                    return Err(Error::unsupported(
                        field,
                        format!("dict({},{}) stored as {}", dict.key, dict.value, self),
                    ));
                }
                out.extend(uid_columns(dict.uid));
            }

            (ty, value) => return Err(mismatch(field, ty, value)),
        }
        Ok(())
    }

    /// Decode this shape from its columns
    pub fn decode(&self, store: &dyn ValueStore, field: &str, raw: &[Scalar]) -> Result<Value> {
        let mut iter = raw.iter();
        let value = self.decode_from(store, field, &mut iter)?;
        if iter.next().is_some() {
            return Err(Error::corruption(format!(
                "field '{}': extra columns after {}",
                field, self
            )));
        }
        Ok(value)
    }

    fn decode_from(
        &self,
        store: &dyn ValueStore,
        field: &str,
        raw: &mut Iter<'_, Scalar>,
    ) -> Result<Value> {
        let value = match self {
            FieldType::Int => Value::Int(next_int(field, raw)? as i64),
            FieldType::Long => match next(field, raw)? {
                Scalar::Long(v) => Value::Int(*v),
                other => return Err(column_mismatch(field, "int64", other)),
            },
            FieldType::Float => match next(field, raw)? {
                Scalar::Float(v) => Value::Float(*v),
                other => return Err(column_mismatch(field, "float64", other)),
            },
            FieldType::Bool => match next(field, raw)? {
                Scalar::Bool(v) => Value::Bool(*v),
                other => return Err(column_mismatch(field, "bool", other)),
            },
            FieldType::FixedString(n) => {
                let external = next_uid(field, raw)?;
                let len = next_int(field, raw)?;
                let data = match next(field, raw)? {
                    Scalar::Bytes(b) => b,
                    other => return Err(column_mismatch(field, "bytes", other)),
                };
                match external {
                    Some(uid) => Value::Bytes(store.load_blob(uid)?),
                    None if len == EXTERNAL_LEN => Value::Null,
                    None if len >= 0 && len as u32 <= *n && len as usize <= data.len() => {
                        Value::Bytes(data[..len as usize].to_vec())
                    }
                    None => {
                        return Err(Error::corruption(format!(
                            "field '{}': inline length {} exceeds width {}",
                            field, len, n
                        )))
                    }
                }
            }
            FieldType::Tuple(members) => {
                let mut values = Vec::with_capacity(members.len());
                for (i, member) in members.iter().enumerate() {
                    values.push(member.decode_from(store, &sub(field, &i.to_string()), raw)?);
                }
                Value::Tuple(values)
            }
            FieldType::Ref(_) => match next_uid(field, raw)? {
                Some(uid) => store.resolve_ref(uid)?.map_or(Value::Null, Value::Object),
                None => Value::Null,
            },
            FieldType::List(element) => match next_uid(field, raw)? {
                Some(uid) => Value::List(ListRef {
                    uid,
                    element: (**element).clone(),
                }),
                None => Value::Null,
            },
            FieldType::Dict(key, val) => match next_uid(field, raw)? {
                Some(uid) => Value::Dict(DictRef {
                    uid,
                    key: (**key).clone(),
                    value: (**val).clone(),
                }),
                None => Value::Null,
            },
        };
        Ok(value)
    }
}

fn column_mismatch(field: &str, expected: &str, found: &Scalar) -> Error {
    Error::corruption(format!(
        "field '{}': expected {} column, found {}",
        field, expected, found
    ))
}
