//! Record value tree module
//!
//! Source and target records flowing through the mapping engine are
//! heterogeneous: a relational row, a document, a message payload. They are
//! modelled as a tagged value tree with dotted-path accessors instead of
//! per-connector record types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A dynamically typed record value
///
/// Objects use a `BTreeMap` so that serialising the same logical record
/// always yields byte-identical output, which the execution trace and the
/// engine determinism tests rely on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Creates an empty object value
    pub fn empty_object() -> Self {
        Value::Object(BTreeMap::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Checks whether the value is "empty": null, empty string, empty array
    /// or empty object
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            _ => false,
        }
    }

    /// Truthiness used by predicates: null, false, 0, "" and empty
    /// collections are false, everything else true
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Numeric coercion: ints and floats directly, bools as 0/1, numeric
    /// strings parsed. Returns `None` for anything else.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) => Some(*f as i64),
            Value::Bool(b) => Some(if *b { 1 } else { 0 }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// String coercion used by concat, split and string transforms
    ///
    /// Null coerces to the empty string; composite values render as JSON.
    pub fn coerce_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Resolves a dotted path against this value
    ///
    /// Path segments traverse object keys; a segment that parses as an
    /// unsigned integer indexes into arrays. An empty path returns the value
    /// itself.
    ///
    /// # Arguments
    ///
    /// * `path` - Dotted path such as `"customer.address.city"` or `"items.0"`
    ///
    /// # Returns
    ///
    /// A reference to the resolved value, or `None` if any segment is missing
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(self);
        }
        let mut current = self;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => {
                    let idx: usize = segment.parse().ok()?;
                    items.get(idx)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Assigns a value at a dotted path, creating intermediate objects
    ///
    /// Missing path segments are materialised as empty objects. A non-object
    /// intermediate value is replaced by an object, matching the engine's
    /// last-writer-wins semantics for conflicting target paths.
    ///
    /// # Arguments
    ///
    /// * `path` - Dotted target path
    /// * `value` - Value to assign
    pub fn set_path(&mut self, path: &str, value: Value) {
        if path.is_empty() {
            *self = value;
            return;
        }
        let segments: Vec<&str> = path.split('.').collect();
        let mut current = self;
        for (i, segment) in segments.iter().enumerate() {
            if !matches!(current, Value::Object(_)) {
                *current = Value::empty_object();
            }
            let map = match current {
                Value::Object(map) => map,
                _ => unreachable!(),
            };
            if i == segments.len() - 1 {
                map.insert((*segment).to_string(), value);
                return;
            }
            current = map
                .entry((*segment).to_string())
                .or_insert_with(Value::empty_object);
        }
    }

    /// Approximate in-memory size in bytes, used by the sandbox allocation
    /// meter
    pub fn approx_size(&self) -> usize {
        match self {
            Value::Null | Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 8,
            Value::String(s) => s.len() + 24,
            Value::Array(a) => 24 + a.iter().map(Value::approx_size).sum::<usize>(),
            Value::Object(o) => {
                24 + o
                    .iter()
                    .map(|(k, v)| k.len() + 24 + v.approx_size())
                    .sum::<usize>()
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            other => {
                let json = serde_json::to_string(other).map_err(|_| fmt::Error)?;
                write!(f, "{}", json)
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(n) => serde_json::Value::from(n),
            Value::Float(f) => {
                serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_path_nested() {
        let record: Value = serde_json::from_str(
            r#"{"customer": {"address": {"city": "Seoul"}}, "items": [10, 20]}"#,
        )
        .unwrap();

        assert_eq!(
            record.get_path("customer.address.city"),
            Some(&Value::String("Seoul".to_string()))
        );
        assert_eq!(record.get_path("items.1"), Some(&Value::Int(20)));
        assert!(record.get_path("customer.phone").is_none());
    }

    #[test]
    fn test_set_path_creates_intermediates() {
        let mut record = Value::empty_object();
        record.set_path("out.x", Value::String("X".to_string()));
        record.set_path("out.y", Value::Int(3));

        assert_eq!(record.get_path("out.x"), Some(&Value::String("X".to_string())));
        assert_eq!(record.get_path("out.y"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_set_path_overwrites_scalar_intermediate() {
        let mut record = Value::empty_object();
        record.set_path("a", Value::Int(1));
        record.set_path("a.b", Value::Int(2));
        assert_eq!(record.get_path("a.b"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(Value::String(" 42 ".into()).as_f64(), Some(42.0));
        assert_eq!(Value::Bool(true).as_f64(), Some(1.0));
        assert!(Value::Array(vec![]).as_f64().is_none());
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::String("x".into()).is_truthy());
    }

    #[test]
    fn test_json_round_trip() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a": 1, "b": [true, null], "c": "s"}"#).unwrap();
        let value = Value::from(json.clone());
        let back: serde_json::Value = value.into();
        assert_eq!(json, back);
    }

    #[test]
    fn test_object_serialisation_is_ordered() {
        let mut record = Value::empty_object();
        record.set_path("zulu", Value::Int(1));
        record.set_path("alpha", Value::Int(2));
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"alpha":2,"zulu":1}"#);
    }
}
