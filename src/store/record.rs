use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Primary key of a record: the value of its `id` field.
///
/// Integers sort before strings, matching the key order of the browser store
/// the API data originally lived in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
  Int(i64),
  Text(String),
}

impl RecordId {
  pub fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::Number(n) => n.as_i64().map(Self::Int),
      Value::String(s) => Some(Self::Text(s.clone())),
      _ => None,
    }
  }

  /// Parse user input: integers become `Int`, anything else `Text`.
  pub fn parse(input: &str) -> Self {
    input
      .parse::<i64>()
      .map(Self::Int)
      .unwrap_or_else(|_| Self::Text(input.to_string()))
  }

  /// Storage encoding; keeps `1` and `"1"` distinct.
  pub fn storage_key(&self) -> String {
    match self {
      Self::Int(n) => n.to_string(),
      Self::Text(s) => Value::String(s.clone()).to_string(),
    }
  }
}

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Int(n) => write!(f, "{}", n),
      Self::Text(s) => f.write_str(s),
    }
  }
}

/// A flat record as delivered by the API: field name → JSON value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
  /// Accepts JSON objects only.
  pub fn from_value(value: Value) -> Option<Self> {
    match value {
      Value::Object(fields) => Some(Self(fields)),
      _ => None,
    }
  }

  pub fn field(&self, name: &str) -> Option<&Value> {
    self.0.get(name)
  }

  /// Key taken from `key_field`, if present and usable as a key.
  pub fn key(&self, key_field: &str) -> Option<RecordId> {
    self.field(key_field).and_then(RecordId::from_value)
  }
}

impl From<Record> for Value {
  fn from(record: Record) -> Self {
    Value::Object(record.0)
  }
}
