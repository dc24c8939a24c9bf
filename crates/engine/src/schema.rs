//! Class schemas
//!
//! A [`Class`] is resolved once, when it is built, into the exact column
//! order its Table uses on disk:
//!
//! 1. Start from the implicit identity fields `_schema_genhash` and
//!    `_schema_oid`.
//! 2. Merge each parent's resolved schema, last-declared parent first, so
//!    that earlier parents win name conflicts.
//! 3. Merge the class's own declarations last; they override everything.
//! 4. Typed fields are persisted, sorted by name. Fields declared without a
//!    type are ephemeral and never reach disk.
//!
//! The sorted order is part of the file format: reordering or retyping a
//! field changes the Table's identification block and the file will no
//! longer open.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use worlddb_core::{Error, Result};

/// Implicit column holding the row owner's OID
pub const OID_FIELD: &str = "_schema_oid";

/// Implicit column holding the row owner's generation hash
pub const GENHASH_FIELD: &str = "_schema_genhash";

/// Inline width of [`FieldType::string`]
pub const DEFAULT_STRING_INLINE: u32 = 32;

/// Longest class name the registry can hold
pub const MAX_CLASS_NAME: usize = 512;

/// Shape of one persisted attribute
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    Long,
    /// 64-bit float
    Float,
    /// Boolean
    Bool,
    /// Byte string stored inline up to `n` bytes, externally beyond that
    FixedString(u32),
    /// Fixed-arity tuple
    Tuple(Vec<FieldType>),
    /// Reference to another stored object, optionally constrained to a class
    Ref(Option<String>),
    /// Reference to a growable persistent list
    List(Box<FieldType>),
    /// Reference to a persistent hash dictionary
    Dict(Box<FieldType>, Box<FieldType>),
}

impl FieldType {
    /// A string with the default inline width.
    ///
    /// The width is fixed; use `Database::string_type` for the width set by
    /// the database's `string_inline` config.
    pub fn string() -> Self {
        FieldType::FixedString(DEFAULT_STRING_INLINE)
    }

    /// An unconstrained object reference
    pub fn reference() -> Self {
        FieldType::Ref(None)
    }

    /// A reference that only accepts instances of `class` (or subclasses)
    pub fn reference_to(class: &Class) -> Self {
        FieldType::Ref(Some(class.name().to_string()))
    }

    /// A list of `element`
    pub fn list_of(element: FieldType) -> Self {
        FieldType::List(Box::new(element))
    }

    /// A dictionary from `key` to `value`
    pub fn dict_of(key: FieldType, value: FieldType) -> Self {
        FieldType::Dict(Box::new(key), Box::new(value))
    }

    /// Reject shapes that cannot be laid out
    pub fn validate(&self) -> Result<()> {
        match self {
            FieldType::FixedString(0) => Err(Error::invalid_operation(
                "fixed string width must be at least 1",
            )),
            FieldType::Tuple(members) => {
                if members.is_empty() {
                    return Err(Error::invalid_operation("tuple needs at least one member"));
                }
                members.iter().try_for_each(FieldType::validate)
            }
            FieldType::List(element) => element.validate(),
            FieldType::Dict(key, value) => {
                if !key.is_hashable() {
                    return Err(Error::invalid_operation(format!(
                        "{} cannot be a dictionary key",
                        key
                    )));
                }
                key.validate()?;
                value.validate()
            }
            _ => Ok(()),
        }
    }

    fn is_hashable(&self) -> bool {
        match self {
            FieldType::List(_) | FieldType::Dict(_, _) => false,
            FieldType::Tuple(members) => members.iter().all(FieldType::is_hashable),
            _ => true,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int => f.write_str("int"),
            FieldType::Long => f.write_str("long"),
            FieldType::Float => f.write_str("float"),
            FieldType::Bool => f.write_str("bool"),
            FieldType::FixedString(n) => write!(f, "str({})", n),
            FieldType::Tuple(members) => {
                f.write_str("tuple(")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", member)?;
                }
                f.write_str(")")
            }
            FieldType::Ref(None) => f.write_str("ref"),
            FieldType::Ref(Some(class)) => write!(f, "ref({})", class),
            FieldType::List(element) => write!(f, "list({})", element),
            FieldType::Dict(key, value) => write!(f, "dict({},{})", key, value),
        }
    }
}

/// A persisted field of a resolved class
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Attribute name
    pub name: String,
    /// Attribute shape
    pub ty: FieldType,
}

/// A resolved class: name, ancestry and persisted field order
#[derive(Debug)]
pub struct Class {
    name: String,
    lineage: Vec<String>,
    schema: BTreeMap<String, Option<FieldType>>,
    fields: Vec<Field>,
}

impl Class {
    /// Start declaring a class
    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder {
            name: name.into(),
            parents: Vec::new(),
            declared: Vec::new(),
        }
    }

    /// Fully-qualified class name, as stored in the class registry
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This class followed by its ancestors, nearest first
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    /// Whether this class is `name` or inherits from it
    pub fn is_a(&self, name: &str) -> bool {
        self.lineage.iter().any(|c| c == name)
    }

    /// Persisted fields in column order (identity fields included)
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Persisted fields a caller can read and write
    pub fn data_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(|f| f.name != OID_FIELD && f.name != GENHASH_FIELD)
    }

    /// Look up a persisted field
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether `name` is declared without a type
    pub fn is_ephemeral(&self, name: &str) -> bool {
        matches!(self.schema.get(name), Some(None))
    }

    /// Names of ephemeral fields
    pub fn ephemeral_fields(&self) -> impl Iterator<Item = &str> {
        self.schema
            .iter()
            .filter(|(_, ty)| ty.is_none())
            .map(|(name, _)| name.as_str())
    }

    /// Whether two classes would produce the same Table layout
    pub fn same_layout(&self, other: &Class) -> bool {
        self.fields == other.fields
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.name)?;
        for (i, field) in self.data_fields().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, " {}: {}", field.name, field.ty)?;
        }
        f.write_str(" }")
    }
}

/// Collects declarations for a [`Class`]
#[derive(Debug)]
pub struct ClassBuilder {
    name: String,
    parents: Vec<Arc<Class>>,
    declared: Vec<(String, Option<FieldType>)>,
}

impl ClassBuilder {
    /// Inherit from `parent`. Earlier parents take precedence over later ones.
    pub fn extends(mut self, parent: &Arc<Class>) -> Self {
        self.parents.push(Arc::clone(parent));
        self
    }

    /// Declare a persisted field
    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.declared.push((name.into(), Some(ty)));
        self
    }

    /// Declare an in-memory-only field
    pub fn ephemeral(mut self, name: impl Into<String>) -> Self {
        self.declared.push((name.into(), None));
        self
    }

    /// Resolve the schema
    pub fn build(self) -> Result<Arc<Class>> {
        validate_class_name(&self.name)?;

        let mut schema: BTreeMap<String, Option<FieldType>> = BTreeMap::new();
        schema.insert(GENHASH_FIELD.to_string(), Some(FieldType::Int));
        schema.insert(OID_FIELD.to_string(), Some(FieldType::Int));
        for parent in self.parents.iter().rev() {
            for (name, ty) in &parent.schema {
                schema.insert(name.clone(), ty.clone());
            }
        }

        let mut own = BTreeSet::new();
        for (name, ty) in self.declared {
            validate_field_name(&self.name, &name)?;
            if !own.insert(name.clone()) {
                return Err(Error::invalid_operation(format!(
                    "{} declares field '{}' twice",
                    self.name, name
                )));
            }
            if let Some(ty) = &ty {
                ty.validate()?;
            }
            schema.insert(name, ty);
        }

        let fields = schema
            .iter()
            .filter_map(|(name, ty)| {
                ty.as_ref().map(|ty| Field {
                    name: name.clone(),
                    ty: ty.clone(),
                })
            })
            .collect();

        let mut lineage = vec![self.name.clone()];
        for parent in &self.parents {
            for ancestor in parent.lineage() {
                if !lineage.contains(ancestor) {
                    lineage.push(ancestor.clone());
                }
            }
        }

        Ok(Arc::new(Class {
            name: self.name,
            lineage,
            schema,
            fields,
        }))
    }
}

fn validate_class_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_CLASS_NAME {
        return Err(Error::invalid_operation(format!(
            "class name must be 1..={} bytes",
            MAX_CLASS_NAME
        )));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(Error::invalid_operation(format!(
            "class name '{}' contains a path separator or NUL",
            name.escape_debug()
        )));
    }
    Ok(())
}

fn validate_field_name(class: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('$') || name.contains('\0') {
        return Err(Error::invalid_operation(format!(
            "{}: invalid field name '{}'",
            class,
            name.escape_debug()
        )));
    }
    if name.starts_with("_schema_") {
        return Err(Error::invalid_operation(format!(
            "{}: field prefix '_schema_' is reserved",
            class
        )));
    }
    Ok(())
}
