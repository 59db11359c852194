//! Script-facing values.
//!
//! [`Value`] is the engine-independent form of everything a policy script can
//! hold, and [`DynamicView`] is the job descriptor as the script sees it.

use std::collections::BTreeMap;
use std::fmt;

/// A dynamically typed value exchanged with the policy script.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value; the script-side encoding of "unset".
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A string.
    Str(String),
    /// An ordered list.
    List(Vec<Value>),
    /// A string-keyed mapping.
    Map(BTreeMap<String, Value>),
    /// Any other script value, kept as its type name and printed form.
    Opaque {
        /// Script type name.
        type_name: String,
        /// Printed form.
        text: String,
    },
}

impl Value {
    /// Name of this value's type, as used in diagnostics.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Opaque { type_name, .. } => type_name,
        }
    }

    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// The stringified form of a value.
///
/// This follows the script engine's own display: `Null` prints as the empty
/// string, integral floats keep a `.0`, and lists and maps print their
/// elements recursively.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{x:.1}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("#{")?;
                for (i, (key, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {item}")?;
                }
                f.write_str("}")
            }
            Value::Opaque { text, .. } => f.write_str(text),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// The job descriptor as a mutable, key-ordered mapping.
///
/// Keys are native field names. A key the script removed means "leave the
/// field alone"; a key holding `Null` means "unset the field".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicView {
    fields: BTreeMap<String, Value>,
}

impl DynamicView {
    /// Create an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a field's value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Set a field's value, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(name.into(), value)
    }

    /// Remove a field, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Returns true if the view has an entry for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Field names in key order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Consume the view into its entries.
    pub fn into_map(self) -> BTreeMap<String, Value> {
        self.fields
    }
}

impl From<BTreeMap<String, Value>> for DynamicView {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }
}
