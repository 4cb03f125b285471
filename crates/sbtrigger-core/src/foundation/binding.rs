//! Binding-data types: the named metadata handed to a triggered function
//! alongside its converted argument.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::integration::client::{MessageReceiver, MessageSession};

// =============================================================================
// Case-insensitive map
// =============================================================================

/// A string-keyed map whose lookups ignore ASCII case.
///
/// The most recently inserted spelling of a key is the one reported by
/// [`iter`](Self::iter).
#[derive(Clone)]
pub struct CaseInsensitiveMap<V> {
    entries: HashMap<String, (String, V)>,
}

impl<V> Default for CaseInsensitiveMap<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> CaseInsensitiveMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any entry whose key differs only in case.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        self.entries
            .insert(key.to_ascii_lowercase(), (key, value))
            .map(|(_, old)| old)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(&key.to_ascii_lowercase()).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries
            .remove(&key.to_ascii_lowercase())
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(key, value)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.values().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates keys in unspecified order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|(k, _)| k.as_str())
    }
}

impl<V: Clone> CaseInsensitiveMap<V> {
    /// Copies every entry of `other` into `self`; `other` wins on collision.
    pub fn overlay(&mut self, other: &Self) {
        for (key, value) in other.iter() {
            self.insert(key, value.clone());
        }
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for CaseInsensitiveMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V: fmt::Debug> fmt::Debug for CaseInsensitiveMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

// =============================================================================
// Binding types and values
// =============================================================================

/// Declared type of a binding-data field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    Int32,
    Int64,
    String,
    DateTime,
    /// Application properties map.
    Properties,
    /// Arbitrary JSON value.
    Json,
    /// Raw bytes.
    Bytes,
    /// Receiver handle for the entity the message came from.
    MessageReceiver,
    /// Session handle, for session-enabled entities.
    MessageSession,
}

impl BindingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::String => "String",
            Self::DateTime => "DateTime",
            Self::Properties => "Properties",
            Self::Json => "Json",
            Self::Bytes => "Bytes",
            Self::MessageReceiver => "MessageReceiver",
            Self::MessageSession => "MessageSession",
        }
    }
}

impl fmt::Display for BindingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A binding-data field value.
#[derive(Clone)]
pub enum BindingValue {
    Int32(i32),
    Int64(i64),
    String(String),
    DateTime(DateTime<Utc>),
    Properties(HashMap<String, serde_json::Value>),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    Receiver(Arc<dyn MessageReceiver>),
    Session(Arc<dyn MessageSession>),
    /// Field is defined but has no value.
    Null,
}

impl BindingValue {
    /// Wraps an optional string, mapping `None` to [`BindingValue::Null`].
    pub fn from_opt_str(value: Option<&str>) -> Self {
        value.map_or(Self::Null, |s| Self::String(s.to_string()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_properties(&self) -> Option<&HashMap<String, serde_json::Value>> {
        match self {
            Self::Properties(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_receiver(&self) -> Option<&Arc<dyn MessageReceiver>> {
        match self {
            Self::Receiver(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_session(&self) -> Option<&Arc<dyn MessageSession>> {
        match self {
            Self::Session(s) => Some(s),
            _ => None,
        }
    }

    /// The type this value satisfies, or `None` for [`BindingValue::Null`].
    pub fn binding_type(&self) -> Option<BindingType> {
        Some(match self {
            Self::Int32(_) => BindingType::Int32,
            Self::Int64(_) => BindingType::Int64,
            Self::String(_) => BindingType::String,
            Self::DateTime(_) => BindingType::DateTime,
            Self::Properties(_) => BindingType::Properties,
            Self::Json(_) => BindingType::Json,
            Self::Bytes(_) => BindingType::Bytes,
            Self::Receiver(_) => BindingType::MessageReceiver,
            Self::Session(_) => BindingType::MessageSession,
            Self::Null => return None,
        })
    }
}

impl fmt::Debug for BindingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int32(v) => f.debug_tuple("Int32").field(v).finish(),
            Self::Int64(v) => f.debug_tuple("Int64").field(v).finish(),
            Self::String(v) => f.debug_tuple("String").field(v).finish(),
            Self::DateTime(v) => f.debug_tuple("DateTime").field(v).finish(),
            Self::Properties(v) => f.debug_tuple("Properties").field(v).finish(),
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Self::Bytes(v) => f.debug_tuple("Bytes").field(&v.len()).finish(),
            Self::Receiver(r) => f.debug_tuple("Receiver").field(&r.entity_path()).finish(),
            Self::Session(s) => f.debug_tuple("Session").field(&s.session_id()).finish(),
            Self::Null => f.write_str("Null"),
        }
    }
}

impl PartialEq for BindingValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int32(a), Self::Int32(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            (Self::Properties(a), Self::Properties(b)) => a == b,
            (Self::Json(a), Self::Json(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            // Handles compare by identity.
            (Self::Receiver(a), Self::Receiver(b)) => Arc::ptr_eq(a, b),
            (Self::Session(a), Self::Session(b)) => Arc::ptr_eq(a, b),
            (Self::Null, Self::Null) => true,
            _ => false,
        }
    }
}

impl From<i32> for BindingValue {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for BindingValue {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<String> for BindingValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for BindingValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

/// An unset optional string becomes [`BindingValue::Null`].
impl From<Option<&str>> for BindingValue {
    fn from(v: Option<&str>) -> Self {
        Self::from_opt_str(v)
    }
}

impl From<DateTime<Utc>> for BindingValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}

impl From<serde_json::Value> for BindingValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<HashMap<String, serde_json::Value>> for BindingValue {
    fn from(v: HashMap<String, serde_json::Value>) -> Self {
        Self::Properties(v)
    }
}

/// Field name → declared type.
pub type BindingDataContract = CaseInsensitiveMap<BindingType>;

/// Field name → value, built per message.
pub type BindingData = CaseInsensitiveMap<BindingValue>;
