//! In-memory values and object handles
//!
//! [`Value`] is what attribute reads return and writes accept. [`Object`] is
//! a shared handle to one instance of a [`Class`]: either purely in memory
//! (attributes live in its cache) or bound to a Table row after insert (the
//! cache then only holds attributes decoded since the last write).

use crate::schema::{Class, FieldType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use worlddb_core::{Error, Result, Uid};

/// An attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value / null reference
    Null,
    /// Integer (stored as `int` or `long` depending on the field)
    Int(i64),
    /// Float
    Float(f64),
    /// Boolean
    Bool(bool),
    /// Byte string
    Bytes(Vec<u8>),
    /// Tuple members
    Tuple(Vec<Value>),
    /// Object reference
    Object(Object),
    /// Plain sequence; stored into a list field as a new persistent list
    Seq(Vec<Value>),
    /// Existing persistent list
    List(ListRef),
    /// Plain key/value pairs; stored into a dict field as a new dictionary
    Map(Vec<(Value, Value)>),
    /// Existing persistent dictionary
    Dict(DictRef),
}

impl Value {
    /// Whether this is `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer payload
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float payload
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Byte payload
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Byte payload as UTF-8 text
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Tuple members
    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(v) => Some(v),
            _ => None,
        }
    }

    /// Object handle
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// List handle
    pub fn as_list(&self) -> Option<&ListRef> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Dictionary handle
    pub fn as_dict(&self) -> Option<&DictRef> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Whether an object handle appears anywhere in this value
    pub(crate) fn holds_object(&self) -> bool {
        match self {
            Value::Object(_) => true,
            Value::Tuple(members) | Value::Seq(members) => members.iter().any(Value::holds_object),
            Value::Map(pairs) => pairs.iter().any(|(k, v)| k.holds_object() || v.holds_object()),
            _ => false,
        }
    }

    /// Short name of the variant, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Bytes(_) => "bytes",
            Value::Tuple(_) => "tuple",
            Value::Object(_) => "object",
            Value::Seq(_) => "sequence",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Dict(_) => "dict",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Bytes(v.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Bytes(v.into_bytes())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Value::Object(v)
    }
}

impl From<&Object> for Value {
    fn from(v: &Object) -> Self {
        Value::Object(v.clone())
    }
}

impl From<ListRef> for Value {
    fn from(v: ListRef) -> Self {
        Value::List(v)
    }
}

impl From<DictRef> for Value {
    fn from(v: DictRef) -> Self {
        Value::Dict(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Handle to a stored persistent list
#[derive(Debug, Clone, PartialEq)]
pub struct ListRef {
    /// Identity of the list entity
    pub uid: Uid,
    /// Element shape
    pub element: FieldType,
}

/// Handle to a stored persistent dictionary
#[derive(Debug, Clone, PartialEq)]
pub struct DictRef {
    /// Identity of the dictionary entity
    pub uid: Uid,
    /// Key shape
    pub key: FieldType,
    /// Value shape
    pub value: FieldType,
}

/// Where a stored object lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Binding {
    pub uid: Uid,
    pub row: u64,
    pub class_id: i32,
}

#[derive(Debug, Default)]
struct ObjectState {
    binding: Option<Binding>,
    cache: HashMap<String, Value>,
}

pub(crate) struct ObjectInner {
    class: Arc<Class>,
    state: Mutex<ObjectState>,
}

/// Shared handle to one instance of a class.
///
/// Clones refer to the same instance; equality is identity.
#[derive(Clone)]
pub struct Object(Arc<ObjectInner>);

impl Object {
    /// A new in-memory instance with no attributes set
    pub fn new(class: &Arc<Class>) -> Self {
        Object(Arc::new(ObjectInner {
            class: Arc::clone(class),
            state: Mutex::new(ObjectState::default()),
        }))
    }

    /// A lazily-loaded shell for a stored row
    pub(crate) fn stored(class: Arc<Class>, binding: Binding) -> Self {
        Object(Arc::new(ObjectInner {
            class,
            state: Mutex::new(ObjectState {
                binding: Some(binding),
                cache: HashMap::new(),
            }),
        }))
    }

    /// Set an attribute and return the object, for building instances
    pub fn with(self, field: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(field, value)?;
        Ok(self)
    }

    /// The instance's class
    pub fn class(&self) -> &Arc<Class> {
        &self.0.class
    }

    /// Identity, once inserted
    pub fn uid(&self) -> Option<Uid> {
        self.0.state.lock().binding.map(|b| b.uid)
    }

    /// Whether the object has been inserted
    pub fn is_stored(&self) -> bool {
        self.0.state.lock().binding.is_some()
    }

    /// Cached attribute value, without touching storage.
    ///
    /// For an in-memory object this is every attribute set so far; for a
    /// stored object use `Database::get` to read through to the row.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.0.state.lock().cache.get(field).cloned()
    }

    /// Set an attribute on an in-memory object, or an ephemeral attribute
    /// on any object. Stored attributes are written with `Database::set`.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        let class = &self.0.class;
        let ephemeral = class.is_ephemeral(field);
        if !ephemeral && class.field(field).is_none() {
            return Err(Error::invalid_operation(format!(
                "{} has no field '{}'",
                class.name(),
                field
            )));
        }
        let mut state = self.0.state.lock();
        if state.binding.is_some() && !ephemeral {
            return Err(Error::invalid_operation(format!(
                "{}.{} is stored; write it through the database",
                class.name(),
                field
            )));
        }
        state.cache.insert(field.to_string(), value.into());
        Ok(())
    }

    /// Whether two handles refer to the same instance
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn binding(&self) -> Option<Binding> {
        self.0.state.lock().binding
    }

    /// Attach the object to its row and hand back the persisted attributes
    /// that were pending in the cache. Ephemeral attributes stay cached.
    pub(crate) fn bind(&self, binding: Binding) -> Result<HashMap<String, Value>> {
        let mut state = self.0.state.lock();
        if state.binding.is_some() {
            return Err(Error::invalid_operation("object is already stored"));
        }
        state.binding = Some(binding);
        let class = &self.0.class;
        let pending = state
            .cache
            .iter()
            .filter(|(name, _)| !class.is_ephemeral(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect::<HashMap<_, _>>();
        state.cache.retain(|name, _| class.is_ephemeral(name));
        Ok(pending)
    }

    pub(crate) fn cache_put(&self, field: &str, value: Value) {
        self.0.state.lock().cache.insert(field.to_string(), value);
    }

    pub(crate) fn invalidate(&self, field: &str) {
        self.0.state.lock().cache.remove(field);
    }

    pub(crate) fn downgrade(&self) -> Weak<ObjectInner> {
        Arc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &Weak<ObjectInner>) -> Option<Object> {
        weak.upgrade().map(Object)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Attribute values are left out: object graphs may be cyclic
        match self.uid() {
            Some(uid) => write!(f, "<{} stored @ {}>", self.class().name(), uid),
            None => write!(f, "<{} in memory>", self.class().name()),
        }
    }
}
