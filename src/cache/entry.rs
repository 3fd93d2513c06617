//! Info record definitions.
//!
//! An info record is a loosely structured JSON object: a handful of keys the
//! cache itself maintains plus whatever fields the model registry returned.
//! [`InfoRecord`] keeps the object as-is on disk and adds typed accessors
//! for the keys the cache relies on.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Content hash, echoed inside the record.
pub const HASH: &str = "hash";
/// ISO-8601 timestamp of the last use, or empty.
pub const LAST_USED: &str = "lastUsed";
/// Whether registry enrichment succeeded (bool, or a string-bool in old files).
pub const CIVITAI: &str = "civitai";
/// Path the record was last written for. Informational only.
pub const FILE_PATH: &str = "filePath";
/// Registry model id.
pub const MODEL_ID: &str = "modelId";

/// One entry of the hash → info document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InfoRecord(Map<String, Value>);

impl InfoRecord {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimal record created when a path is first hashed.
    #[must_use]
    pub fn skeleton(hash: &str, file_path: &str) -> Self {
        let mut record = Self::new();
        record.insert(HASH, Value::from(hash));
        record.insert(LAST_USED, Value::from(""));
        record.insert(CIVITAI, Value::Bool(false));
        record.insert(FILE_PATH, Value::from(file_path));
        record
    }

    /// Wrap a JSON value if it is an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// `true` if the record has no keys at all ("no data yet").
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Look up a raw field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a raw field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Remove a raw field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Overlay every field of `other` onto this record.
    pub fn merge(&mut self, other: &InfoRecord) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// The echoed hash, if present and a non-empty string.
    #[must_use]
    pub fn hash(&self) -> Option<&str> {
        self.get(HASH)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The informational file path.
    #[must_use]
    pub fn file_path(&self) -> Option<&str> {
        self.get(FILE_PATH).and_then(Value::as_str)
    }

    /// Registry flag, accepting both booleans and the string forms older files used.
    #[must_use]
    pub fn civitai(&self) -> Option<bool> {
        match self.get(CIVITAI)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// `true` only when the registry positively confirmed this hash.
    #[must_use]
    pub fn is_registry_confirmed(&self) -> bool {
        self.civitai() == Some(true)
    }

    /// Store the registry flag as a real boolean.
    pub fn set_civitai(&mut self, found: bool) {
        self.insert(CIVITAI, Value::Bool(found));
    }

    /// Raw `lastUsed` string; empty strings count as unset.
    #[must_use]
    pub fn last_used_raw(&self) -> Option<&str> {
        self.get(LAST_USED)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Parsed `lastUsed`.
    ///
    /// RFC 3339 values are read as-is. Values without an offset, as written
    /// by older versions, are taken to be UTC.
    #[must_use]
    pub fn last_used(&self) -> Option<DateTime<Utc>> {
        let raw = self.last_used_raw()?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok());
        if naive.is_none() {
            log::debug!("Unparseable lastUsed value: {}", raw);
        }
        naive.map(|n| n.and_utc())
    }

    /// Set `lastUsed` to `timestamp`.
    pub fn set_last_used(&mut self, timestamp: DateTime<Utc>) {
        self.insert(LAST_USED, Value::from(format_timestamp(timestamp)));
    }

    /// Registry model id, normalized to a string (the registry sends numbers).
    #[must_use]
    pub fn model_id(&self) -> Option<String> {
        match self.get(MODEL_ID)? {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    /// Registry display name: `model.name`, falling back to the version `name`.
    #[must_use]
    pub fn model_name(&self) -> Option<&str> {
        self.get("model")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .or_else(|| self.get("name").and_then(Value::as_str))
    }
}

/// Timestamp format used for `lastUsed`.
#[must_use]
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}
