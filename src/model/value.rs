//! Metadata value type carried on context tokens.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single metadata value.
///
/// Tokens carry arbitrary caller metadata (source document, agent name,
/// timestamps, scores). The engine never interprets it; it only has to
/// survive a save/load round trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    DateTime(DateTime<Utc>),
}

impl Value {
    /// Name used for this variant in the JSON `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::DateTime(_) => "DateTime",
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// False if any float inside is NaN or infinite. JSON cannot encode
    /// those, so such a value would not survive a save.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Float(f) => f.is_finite(),
            Value::List(items) => items.iter().all(Value::is_finite),
            Value::Map(m) => m.values().all(Value::is_finite),
            _ => true,
        }
    }

    /// Rough heap footprint, used for memory-usage metrics only.
    pub(crate) fn estimated_bytes(&self) -> usize {
        let inline = std::mem::size_of::<Value>();
        match self {
            Value::String(s) => inline + s.len(),
            Value::List(items) => inline + items.iter().map(Value::estimated_bytes).sum::<usize>(),
            Value::Map(m) => {
                inline + m.iter().map(|(k, v)| k.len() + v.estimated_bytes()).sum::<usize>()
            }
            _ => inline,
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<bool> for Value { fn from(v: bool) -> Self { Value::Bool(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Value::Int(v as i64) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::Int(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::Float(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::String(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::String(v.to_owned()) } }
impl From<DateTime<Utc>> for Value { fn from(v: DateTime<Utc>) -> Self { Value::DateTime(v) } }
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self { Value::List(v.into_iter().map(Into::into).collect()) }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self { v.map(Into::into).unwrap_or(Value::Null) }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                // Sorted so log lines are stable.
                let mut entries: Vec<_> = m.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                write!(f, "{{")?;
                for (i, (k, v)) in entries.into_iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from("source"), Value::String("source".into()));
        assert_eq!(Value::from(7), Value::Int(7));
        assert_eq!(Value::from(0.5), Value::Float(0.5));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_json_round_trip_keeps_variant() {
        let original = Value::from(vec![Value::Int(1), Value::Float(1.0), Value::from("1")]);
        let json = serde_json::to_string(&original).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_type_name_matches_json_tag() {
        for value in [Value::Null, Value::from(true), Value::from(3), Value::from(Utc::now())] {
            let json = serde_json::to_value(&value).unwrap();
            assert_eq!(json["type"], serde_json::json!(value.type_name()));
        }
    }

    #[test]
    fn test_is_finite_looks_inside_containers() {
        assert!(Value::from(f64::MAX).is_finite());
        assert!(!Value::from(f64::NAN).is_finite());
        assert!(!Value::from(vec![Value::Int(1), Value::Float(f64::INFINITY)]).is_finite());
        let mut m = HashMap::new();
        m.insert("score".to_string(), Value::Float(f64::NEG_INFINITY));
        assert!(!Value::Map(m).is_finite());
    }

    #[test]
    fn test_display_map_is_sorted() {
        let mut m = HashMap::new();
        m.insert("b".to_string(), Value::Int(2));
        m.insert("a".to_string(), Value::Int(1));
        assert_eq!(Value::Map(m).to_string(), "{a: 1, b: 2}");
    }
}
