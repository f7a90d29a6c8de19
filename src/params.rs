//! Typed, open-ended parameter sets.
//!
//! Notifications and groups carry a `NotificationParameters` bag. Keys are not
//! predeclared; a handful of well-known keys drive manager behavior:
//!
//! - `eventType`: selects the event-type defaults to merge in
//! - `class`: `"system"` marks a system event
//! - `persistent`: whether the notification survives a device boot
//! - `timestamp`: seconds since the Unix epoch

use crate::error::{ManagerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key naming the event type of a notification or group.
pub const EVENT_TYPE_KEY: &str = "eventType";

/// Key naming the notification class.
pub const CLASS_KEY: &str = "class";

/// Key controlling persistence across boots.
pub const PERSISTENT_KEY: &str = "persistent";

/// Key holding the notification (or derived group) timestamp.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Class value identifying system events.
pub const SYSTEM_CLASS: &str = "system";

/// A single typed parameter value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    String(String),
    Int(i64),
    Bool(bool),
    Float(f64),
    Bytes(Vec<u8>),
}

impl ParamValue {
    /// Parse a textual value, picking the narrowest kind that fits.
    ///
    /// `true`/`false` become booleans, then integers, then floats; anything
    /// else stays a string.
    pub fn parse_text(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed {
            "true" => return ParamValue::Bool(true),
            "false" => return ParamValue::Bool(false),
            _ => {}
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return ParamValue::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return ParamValue::Float(f);
        }
        ParamValue::String(trimmed.to_string())
    }

    /// Coerce to an unsigned integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ParamValue::Int(i) if *i >= 0 => Some(*i as u64),
            ParamValue::Int(_) => None,
            ParamValue::Float(f) if *f >= 0.0 && f.is_finite() => Some(*f as u64),
            ParamValue::Float(_) => None,
            ParamValue::Bool(b) => Some(u64::from(*b)),
            ParamValue::String(s) => s.trim().parse().ok(),
            ParamValue::Bytes(_) => None,
        }
    }

    /// Coerce to a boolean.
    pub fn to_bool(&self) -> bool {
        match self {
            ParamValue::Bool(b) => *b,
            ParamValue::Int(i) => *i != 0,
            ParamValue::Float(f) => *f != 0.0,
            ParamValue::String(s) => {
                let s = s.trim();
                !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false"))
            }
            ParamValue::Bytes(b) => !b.is_empty(),
        }
    }

    /// Borrow the string content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::String(s) => serde_json::Value::String(s.clone()),
            ParamValue::Int(i) => serde_json::Value::from(*i),
            ParamValue::Bool(b) => serde_json::Value::Bool(*b),
            ParamValue::Float(f) => serde_json::Value::from(*f),
            ParamValue::Bytes(b) => serde_json::Value::from(b.clone()),
        }
    }

    fn from_json(key: &str, value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(s) => Ok(ParamValue::String(s.clone())),
            serde_json::Value::Bool(b) => Ok(ParamValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ParamValue::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(ParamValue::Int(i64::try_from(u).unwrap_or(i64::MAX)))
                } else {
                    Ok(ParamValue::Float(n.as_f64().unwrap_or_default()))
                }
            }
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| {
                            ManagerError::Deserialization(format!(
                                "parameter {key}: arrays must hold bytes"
                            ))
                        })
                })
                .collect::<Result<Vec<u8>>>()
                .map(ParamValue::Bytes),
            other => Err(ManagerError::Deserialization(format!(
                "parameter {key}: unsupported value {other}"
            ))),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::String(s) => write!(f, "{s}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<i32> for ParamValue {
    fn from(i: i32) -> Self {
        ParamValue::Int(i64::from(i))
    }
}

impl From<u32> for ParamValue {
    fn from(i: u32) -> Self {
        ParamValue::Int(i64::from(i))
    }
}

impl From<u64> for ParamValue {
    fn from(i: u64) -> Self {
        ParamValue::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        ParamValue::Float(f)
    }
}

impl From<Vec<u8>> for ParamValue {
    fn from(b: Vec<u8>) -> Self {
        ParamValue::Bytes(b)
    }
}

/// A mergeable key/value bag.
///
/// Enumeration order is the key order, so two equal sets always serialize
/// identically.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationParameters(BTreeMap<String, ParamValue>);

impl NotificationParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a key, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge `incoming` into this set. Incoming values win; keys absent from
    /// `incoming` are kept.
    pub fn merge(&mut self, incoming: &NotificationParameters) {
        for (key, value) in &incoming.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Return `self` with `top` merged over it.
    pub fn overlaid_with(&self, top: &NotificationParameters) -> NotificationParameters {
        let mut merged = self.clone();
        merged.merge(top);
        merged
    }

    /// String form of a value (strings as is, scalars formatted).
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            ParamValue::Bytes(_) => None,
            value => Some(value.to_string()),
        }
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(ParamValue::as_u64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(ParamValue::to_bool)
    }

    /// The `eventType` parameter, if any.
    pub fn event_type(&self) -> Option<String> {
        self.get_string(EVENT_TYPE_KEY)
    }

    /// The `timestamp` parameter, 0 when absent.
    pub fn timestamp(&self) -> u64 {
        self.get_u64(TIMESTAMP_KEY).unwrap_or(0)
    }

    /// Build from a JSON object, as received at a transport boundary.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            ManagerError::Deserialization("parameters must be a JSON object".into())
        })?;
        let mut params = NotificationParameters::new();
        for (key, value) in object {
            params.insert(key.clone(), ParamValue::from_json(key, value)?);
        }
        Ok(params)
    }

    /// Render as a flat JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for NotificationParameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = NotificationParameters::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overwrites_and_preserves() {
        let mut base = NotificationParameters::new()
            .with("a", 1i64)
            .with("b", "keep");
        let incoming = NotificationParameters::new().with("a", 2i64).with("c", true);

        base.merge(&incoming);

        assert_eq!(base.get("a"), Some(&ParamValue::Int(2)));
        assert_eq!(base.get("b"), Some(&ParamValue::String("keep".into())));
        assert_eq!(base.get("c"), Some(&ParamValue::Bool(true)));
        assert_eq!(base.len(), 3);
    }

    #[test]
    fn test_overlay_keeps_base_untouched() {
        let defaults = NotificationParameters::new().with("class", "system");
        let supplied = NotificationParameters::new().with("class", "app");

        let effective = defaults.overlaid_with(&supplied);

        assert_eq!(effective.get_string("class").as_deref(), Some("app"));
        assert_eq!(defaults.get_string("class").as_deref(), Some("system"));
    }

    #[test]
    fn test_bool_coercion() {
        assert!(ParamValue::from("yes").to_bool());
        assert!(!ParamValue::from("FALSE").to_bool());
        assert!(!ParamValue::from("0").to_bool());
        assert!(!ParamValue::from("").to_bool());
        assert!(ParamValue::Int(3).to_bool());
        assert!(!ParamValue::Float(0.0).to_bool());
    }

    #[test]
    fn test_u64_coercion() {
        assert_eq!(ParamValue::from("42").as_u64(), Some(42));
        assert_eq!(ParamValue::Int(-1).as_u64(), None);
        assert_eq!(ParamValue::Float(9.7).as_u64(), Some(9));
        assert_eq!(ParamValue::Bytes(vec![1]).as_u64(), None);
    }

    #[test]
    fn test_parse_text() {
        assert_eq!(ParamValue::parse_text("true"), ParamValue::Bool(true));
        assert_eq!(ParamValue::parse_text(" 12 "), ParamValue::Int(12));
        assert_eq!(ParamValue::parse_text("1.5"), ParamValue::Float(1.5));
        assert_eq!(
            ParamValue::parse_text("system"),
            ParamValue::String("system".into())
        );
    }

    #[test]
    fn test_json_conversion() {
        let params = NotificationParameters::from_json(&json!({
            "summary": "hello",
            "count": 3,
            "persistent": false,
            "ratio": 0.5,
            "icon": [1, 2, 3],
        }))
        .unwrap();

        assert_eq!(params.get_string("summary").as_deref(), Some("hello"));
        assert_eq!(params.get_u64("count"), Some(3));
        assert_eq!(params.get_bool("persistent"), Some(false));
        assert_eq!(params.get("icon"), Some(&ParamValue::Bytes(vec![1, 2, 3])));
        assert_eq!(params.to_json()["summary"], "hello");
    }

    #[test]
    fn test_json_rejects_nested_objects() {
        let result = NotificationParameters::from_json(&json!({"nested": {"a": 1}}));
        assert!(matches!(result, Err(ManagerError::Deserialization(_))));
    }
}
