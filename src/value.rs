//! Application value model.
//!
//! Every value that crosses the client boundary (query results, bound
//! parameters, rows handed to `create_table`) is one of the [`Value`] kinds.
//! Code that needs to branch on a value matches on the enum exhaustively.

use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::error::ClientError;

/// A single application-level value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    /// Integers that fit the engine's 32/64-bit integer columns.
    Integer(i64),
    /// 64-bit and wider integers delivered without floating point coercion.
    BigInt(i128),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    Buffer(Vec<u8>),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
}

/// Discriminant of a [`Value`], useful for logging and type inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Boolean,
    Integer,
    BigInt,
    Number,
    String,
    Date,
    Buffer,
    Array,
    Object,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Integer(_) => ValueKind::Integer,
            Value::BigInt(_) => ValueKind::BigInt,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Date(_) => ValueKind::Date,
            Value::Buffer(_) => ValueKind::Buffer,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Interpret numeric values as `i64`. Floating point values are accepted
    /// only when they are integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::BigInt(v) => i64::try_from(*v).ok(),
            Value::Number(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::BigInt(v) => Some(*v as f64),
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to a JSON value. Dates become RFC 3339 strings, buffers become
    /// byte arrays and integers outside the JSON-safe range become strings.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Boolean(b) => Json::Bool(*b),
            Value::Integer(v) => Json::from(*v),
            Value::BigInt(v) => {
                if let Ok(small) = i64::try_from(*v) {
                    Json::from(small)
                } else if let Ok(unsigned) = u64::try_from(*v) {
                    Json::from(unsigned)
                } else {
                    Json::String(v.to_string())
                }
            }
            Value::Number(v) => serde_json::Number::from_f64(*v)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Date(d) => Json::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Value::Buffer(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::String(s) => write!(f, "{s}"),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Integer(v) => serializer.serialize_i64(*v),
            Value::BigInt(v) => match i64::try_from(*v) {
                Ok(small) => serializer.serialize_i64(small),
                Err(_) => serializer.serialize_str(&v.to_string()),
            },
            Value::Number(v) => serializer.serialize_f64(*v),
            Value::String(s) => serializer.serialize_str(s),
            Value::Date(d) => {
                serializer.serialize_str(&d.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Value::Buffer(bytes) => {
                let mut seq = serializer.serialize_seq(Some(bytes.len()))?;
                for b in bytes {
                    seq.serialize_element(b)?;
                }
                seq.end()
            }
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Integer(i64::from(v))
                }
            }
        )*
    };
}

impl_from_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::BigInt(i128::from(v))
    }
}

impl From<i128> for Value {
    fn from(v: i128) -> Self {
        Value::BigInt(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        match i64::try_from(v) {
            Ok(small) => Value::Integer(small),
            Err(_) => Value::BigInt(v as i128),
        }
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Number(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v.and_time(chrono::NaiveTime::MIN).and_utc())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Buffer(v.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match v {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Boolean(b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    Value::BigInt(i128::from(u))
                } else {
                    Value::Number(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// One result row: column names in result order, each paired with its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Builder-style insert, replacing any existing value for `name`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Append a column even if one with the same name exists. Result rows
    /// keep one entry per schema field.
    pub(crate) fn push(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// The first column's value, or `None` for a row without columns.
    pub fn first(&self) -> Option<&Value> {
        self.entries.first().map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.entries.into_iter().map(|(_, v)| v).collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Row {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Conversion from a materialized [`Row`] into a stream element type.
pub trait FromRow: Sized + Send + 'static {
    fn from_row(row: Row) -> Result<Self, ClientError>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> Result<Self, ClientError> {
        Ok(row)
    }
}

impl FromRow for serde_json::Value {
    fn from_row(row: Row) -> Result<Self, ClientError> {
        Ok(row.to_json())
    }
}

/// Deserialize a row into any serde type through its JSON form.
pub fn row_into<T: DeserializeOwned>(row: &Row) -> Result<T, ClientError> {
    serde_json::from_value(row.to_json())
        .map_err(|err| ClientError::Internal(format!("failed to deserialize row: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_insert_replaces_existing_column() {
        let mut row = Row::from([("id", Value::from(1)), ("name", Value::from("a"))]);
        row.insert("id", 7);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("id"), Some(&Value::Integer(7)));
        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["id", "name"]);
    }

    #[test]
    fn row_first_is_none_without_columns() {
        assert!(Row::new().first().is_none());
        let row = Row::new().with("n", Value::Null);
        assert_eq!(row.first(), Some(&Value::Null));
    }

    #[test]
    fn bigint_outside_i64_serializes_as_string() {
        let v = Value::BigInt(i128::from(u64::MAX) + 1);
        assert_eq!(v.to_json(), serde_json::json!("18446744073709551616"));
        assert_eq!(Value::BigInt(42).to_json(), serde_json::json!(42));
    }

    #[test]
    fn row_deserializes_into_struct() {
        #[derive(serde::Deserialize)]
        struct User {
            id: i64,
            name: String,
        }
        let row = Row::from([("id", Value::from(3)), ("name", Value::from("c"))]);
        let user: User = row_into(&row).unwrap();
        assert_eq!(user.id, 3);
        assert_eq!(user.name, "c");
    }

    #[test]
    fn as_i64_accepts_integral_numbers_only() {
        assert_eq!(Value::Number(4.0).as_i64(), Some(4));
        assert_eq!(Value::Number(4.5).as_i64(), None);
        assert_eq!(Value::from("4").as_i64(), None);
    }
}
