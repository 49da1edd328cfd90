//! Record data structures accepted by the sink

use crate::errors::{Result, SinkError};
use serde_json::Number;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared handle used for containers so that producers can build graphs
/// with self- or mutually-referential values.
pub type Shared<T> = Arc<RwLock<T>>;

/// Object contents. Keys are kept in sorted order.
pub type Object = BTreeMap<String, Value>;

/// A JSON-like value whose arrays and objects are shared handles.
///
/// Cloning a container clones the handle, not the contents. A graph that
/// contains a cycle is never reclaimed; producers that build cycles own that
/// cost.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Shared<Vec<Value>>),
    Object(Shared<Object>),
}

impl Value {
    /// Create an empty object
    pub fn object() -> Self {
        Value::Object(Arc::new(RwLock::new(Object::new())))
    }

    /// Create an empty array
    pub fn array() -> Self {
        Value::Array(Arc::new(RwLock::new(Vec::new())))
    }

    /// Set `key` on an object. Returns false if this value is not an object.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        match self {
            Value::Object(map) => {
                write_lock(map).insert(key.into(), value.into());
                true
            }
            _ => false,
        }
    }

    /// Append to an array. Returns false if this value is not an array.
    pub fn push(&self, value: impl Into<Value>) -> bool {
        match self {
            Value::Array(items) => {
                write_lock(items).push(value.into());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(map) => read_lock(map).get(key).cloned(),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::serializer::stringify(self))
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Array(Arc::new(RwLock::new(
                items.into_iter().map(Value::from).collect(),
            ))),
            serde_json::Value::Object(map) => Value::Object(Arc::new(RwLock::new(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ))),
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

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl From<f64> for Value {
    /// Non-finite numbers have no JSON form and become `Null`.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

pub(crate) fn read_lock<T>(lock: &Shared<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &Shared<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// A producer record: an object carrying a string `event` tag and an
/// optional numeric `timestamp`.
///
/// The tag, timestamp and `tags` are read once when the record is built and
/// drive filtering. The value stays shared with the producer, so envelope
/// assembly reads the tag and timestamp again through [`Record::current_event`]
/// and [`Record::current_timestamp`].
#[derive(Clone, Debug)]
pub struct Record {
    event: String,
    timestamp: Option<f64>,
    tags: Vec<String>,
    value: Value,
}

impl Record {
    pub fn new(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(SinkError::InvalidRecord(
                "record must be an object".to_string(),
            ));
        }

        let event = match value.get("event") {
            Some(Value::String(event)) => event,
            Some(_) => {
                return Err(SinkError::InvalidRecord(
                    "event must be a string".to_string(),
                ));
            }
            None => {
                return Err(SinkError::InvalidRecord(
                    "record has no event tag".to_string(),
                ));
            }
        };

        let timestamp = value.get("timestamp").and_then(|ts| ts.as_f64());

        let tags = match value.get("tags") {
            Some(Value::Array(items)) => read_lock(&items)
                .iter()
                .filter_map(|tag| tag.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            event,
            timestamp,
            tags,
            value,
        })
    }

    /// Event type tag
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    /// Event tag as the value holds it now, or the construction-time tag if
    /// the field has since been removed or is no longer a string.
    pub fn current_event(&self) -> String {
        match self.value.get("event") {
            Some(Value::String(event)) => event,
            _ => self.event.clone(),
        }
    }

    pub fn current_timestamp(&self) -> Option<f64> {
        self.value.get("timestamp").and_then(|ts| ts.as_f64())
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl TryFrom<Value> for Record {
    type Error = SinkError;

    fn try_from(value: Value) -> Result<Self> {
        Record::new(value)
    }
}

impl TryFrom<serde_json::Value> for Record {
    type Error = SinkError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        Record::new(Value::from(value))
    }
}
