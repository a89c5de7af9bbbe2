//! Plain data values and tracked read results.
//!
//! [`Value`] is the raw, unwrapped data model: primitives plus composite
//! lists and maps. Composites become reactive only once handed to
//! [`Engine::wrap`](crate::Engine::wrap) (or read out of an already-wrapped
//! container, which wraps nested composites lazily).
//!
//! [`Entry`] is what a tracked read returns: primitives come back as plain
//! [`Value`]s, composites come back as [`Container`] handles so that
//! re-reading the same field yields the same container identity.

use indexmap::IndexMap;

use crate::container::Container;

/// A plain data value: the raw material the engine wraps.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Absent / null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Ordered list of values (composite).
    List(Vec<Value>),
    /// Insertion-ordered string-keyed map (composite).
    Map(IndexMap<String, Value>),
}

impl Value {
    /// Create an empty map value.
    pub fn map() -> Self {
        Value::Map(IndexMap::new())
    }

    /// Create an empty list value.
    pub fn list() -> Self {
        Value::List(Vec::new())
    }

    /// True for lists and maps; false for primitives. O(1), never fails.
    pub fn is_composite(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    /// Short type name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Identity comparison in the spirit of `Object.is`.
    ///
    /// Primitives compare by value, except floats: all NaNs are identical
    /// to each other, and `0.0` is distinct from `-0.0` (bit comparison).
    /// Composites are never identical here - a composite write always
    /// counts as a change, since the incoming value is a fresh allocation
    /// with its own identity.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => {
                (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }

    /// Integer accessor.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Float accessor.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Boolean accessor.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String accessor.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Map accessor.
    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// List accessor.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
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

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Value::List(iter.into_iter().collect())
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Value::Map(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Result of a tracked read from a [`Container`].
///
/// Primitives are detached copies; composites are live handles. The handle
/// for a given field is identity-stable: reading the same field twice
/// returns handles to the same underlying container.
#[derive(Clone, Debug)]
pub enum Entry {
    /// A primitive value, cloned out of the container.
    Value(Value),
    /// A nested reactive container.
    Container(Container),
}

impl Entry {
    /// O(1) tag check for "is this a reactive container". Never fails.
    pub fn is_container(&self) -> bool {
        matches!(self, Entry::Container(_))
    }

    /// The primitive value, if this entry is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Entry::Value(v) => Some(v),
            Entry::Container(_) => None,
        }
    }

    /// The nested container, if this entry is one.
    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Entry::Container(c) => Some(c),
            Entry::Value(_) => None,
        }
    }

    /// Consume the entry, keeping the container handle.
    pub fn into_container(self) -> Option<Container> {
        match self {
            Entry::Container(c) => Some(c),
            Entry::Value(_) => None,
        }
    }

    /// Integer accessor, for primitive entries.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_value().and_then(Value::as_i64)
    }

    /// Float accessor, for primitive entries.
    pub fn as_f64(&self) -> Option<f64> {
        self.as_value().and_then(Value::as_f64)
    }

    /// Boolean accessor, for primitive entries.
    pub fn as_bool(&self) -> Option<bool> {
        self.as_value().and_then(Value::as_bool)
    }

    /// String accessor, for primitive entries.
    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }
}
