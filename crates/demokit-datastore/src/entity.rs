//! Entities, embedded entities and property values.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::key::Key;

/// A single property value.
///
/// [`Value::Text`] is the unindexed string form: it is stored and returned
/// like [`Value::String`] but never matches a query filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// Indexed short string.
    String(String),
    /// Unindexed long string.
    Text(String),
    /// UTC timestamp.
    Timestamp(DateTime<Utc>),
    /// Nested, self-describing sub-document.
    Embedded(EmbeddedEntity),
    /// Ordered list of values.
    List(Vec<Value>),
}

impl Value {
    /// Name of the variant, for error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::String(_) => "string",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
            Self::Embedded(_) => "embedded",
            Self::List(_) => "list",
        }
    }

    /// Whether the value participates in filters and sorts.
    #[must_use]
    pub const fn is_indexed(&self) -> bool {
        !matches!(self, Self::Text(_) | Self::Embedded(_) | Self::List(_))
    }

    /// Ordering between two indexed values of the same type.
    ///
    /// Values of different types compare by type name so that sorting is total.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Null, Self::Null) => Ordering::Equal,
            (a, b) => a.type_name().cmp(b.type_name()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<EmbeddedEntity> for Value {
    fn from(value: EmbeddedEntity) -> Self {
        Self::Embedded(value)
    }
}

/// Ordered property map.
///
/// Insertion order is preserved, so a discriminator written first is also
/// the first property a reader sees.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyMap {
    properties: Vec<(String, Value)>,
}

/// A key-less entity nested inside another entity's property.
pub type EmbeddedEntity = PropertyMap;

impl PropertyMap {
    /// Create an empty property map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            properties: Vec::new(),
        }
    }

    /// Set a property, replacing any existing value in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.properties.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.properties.push((name, value)),
        }
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Get a property value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Remove a property, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.properties.iter().position(|(n, _)| n == name)?;
        Some(self.properties.remove(index).1)
    }

    /// Iterate over properties in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether there are no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    fn require(&self, name: &str) -> StoreResult<&Value> {
        self.get(name)
            .ok_or_else(|| StoreError::property(name, "missing"))
    }

    fn mismatch(name: &str, expected: &str, found: &Value) -> StoreError {
        StoreError::property(
            name,
            format!("expected {expected}, found {}", found.type_name()),
        )
    }

    /// Get a required string property. Accepts both indexed and text forms.
    pub fn get_str(&self, name: &str) -> StoreResult<&str> {
        match self.require(name)? {
            Value::String(s) | Value::Text(s) => Ok(s),
            other => Err(Self::mismatch(name, "string", other)),
        }
    }

    /// Get an optional string property. Null counts as absent.
    pub fn get_opt_str(&self, name: &str) -> StoreResult<Option<&str>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s) | Value::Text(s)) => Ok(Some(s)),
            Some(other) => Err(Self::mismatch(name, "string", other)),
        }
    }

    /// Get a required integer property.
    pub fn get_i64(&self, name: &str) -> StoreResult<i64> {
        match self.require(name)? {
            Value::Integer(i) => Ok(*i),
            other => Err(Self::mismatch(name, "integer", other)),
        }
    }

    /// Get a required timestamp property.
    pub fn get_timestamp(&self, name: &str) -> StoreResult<DateTime<Utc>> {
        match self.require(name)? {
            Value::Timestamp(t) => Ok(*t),
            other => Err(Self::mismatch(name, "timestamp", other)),
        }
    }

    /// Get a required embedded entity property.
    pub fn get_embedded(&self, name: &str) -> StoreResult<&EmbeddedEntity> {
        match self.require(name)? {
            Value::Embedded(e) => Ok(e),
            other => Err(Self::mismatch(name, "embedded", other)),
        }
    }

    /// Get a list property. Absent and null read as an empty list.
    pub fn get_list(&self, name: &str) -> StoreResult<&[Value]> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(&[]),
            Some(Value::List(items)) => Ok(items),
            Some(other) => Err(Self::mismatch(name, "list", other)),
        }
    }
}

/// A stored record: a key plus its properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity key. May be incomplete before the entity is first stored.
    pub key: Key,
    /// Entity properties.
    pub properties: PropertyMap,
}

impl Entity {
    /// Create an entity with no properties.
    #[must_use]
    pub const fn new(key: Key) -> Self {
        Self {
            key,
            properties: PropertyMap::new(),
        }
    }

    /// Create an entity from a key and an existing property map.
    #[must_use]
    pub const fn with_properties(key: Key, properties: PropertyMap) -> Self {
        Self { key, properties }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_is_preserved() {
        let map = PropertyMap::new()
            .with("type", "SINGLE_INSTANCE")
            .with("instanceTemplate", Value::Text("{}".to_owned()))
            .with("type", "REPLACED");

        let names: Vec<_> = map.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["type", "instanceTemplate"]);
        assert_eq!(map.get_str("type").ok(), Some("REPLACED"));
    }

    #[test]
    fn typed_accessors_report_mismatches() {
        let map = PropertyMap::new()
            .with("count", 3_i64)
            .with("name", "alice");

        assert_eq!(map.get_i64("count").ok(), Some(3));
        assert!(matches!(
            map.get_i64("name"),
            Err(StoreError::Property { ref property, .. }) if property == "name"
        ));
        assert!(matches!(
            map.get_str("missing"),
            Err(StoreError::Property { .. })
        ));
        assert_eq!(map.get_opt_str("missing").ok(), Some(None));
        assert!(map.get_list("missing").map(<[Value]>::is_empty).unwrap_or(false));
    }

    #[test]
    fn text_values_are_unindexed() {
        assert!(!Value::Text("long".to_owned()).is_indexed());
        assert!(Value::String("short".to_owned()).is_indexed());
        assert!(!Value::Embedded(PropertyMap::new()).is_indexed());
    }

    #[test]
    fn timestamps_compare_chronologically() {
        let earlier = Value::Timestamp(Utc::now());
        let later = Value::Timestamp(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(earlier.compare(&later), Ordering::Less);
    }

    #[test]
    fn json_representation_keeps_property_order() {
        let map = PropertyMap::new().with("b", 1_i64).with("a", 2_i64);
        let json = serde_json::to_string(&map).unwrap_or_default();
        let parsed: PropertyMap = serde_json::from_str(&json).unwrap_or_default();
        assert_eq!(parsed, map);
        assert!(json.find("\"b\"") < json.find("\"a\""));
    }
}
