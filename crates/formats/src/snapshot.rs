use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::record::{LocationRecord, ValidationError, validate};

/// Raw keyed set of entries delivered by one upstream push.
///
/// Entries stay untyped until [`SnapshotPayload::validate`] runs; nothing
/// downstream of validation sees a `serde_json::Value`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotPayload {
    entries: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    Json(String),
    NotAKeyedSet { found: &'static str },
}

impl std::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadError::Json(msg) => write!(f, "snapshot is not valid JSON: {msg}"),
            PayloadError::NotAKeyedSet { found } => {
                write!(f, "expected a keyed set of records, found {found}")
            }
        }
    }
}

impl std::error::Error for PayloadError {}

/// One entry rejected during validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedEntry {
    pub id: String,
    pub error: ValidationError,
}

/// Outcome of validating every entry of a snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedSnapshot {
    pub records: BTreeMap<String, LocationRecord>,
    pub rejected: Vec<RejectedEntry>,
}

impl SnapshotPayload {
    pub fn from_json_str(payload: &str) -> Result<Self, PayloadError> {
        let value: Value =
            serde_json::from_str(payload).map_err(|e| PayloadError::Json(e.to_string()))?;
        Self::from_value(value)
    }

    /// `null` is a legitimately empty snapshot (an empty path upstream reads
    /// back as `null`). Any non-object value is malformed.
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(entries) => Ok(Self { entries }),
            Value::Bool(_) => Err(PayloadError::NotAKeyedSet { found: "bool" }),
            Value::Number(_) => Err(PayloadError::NotAKeyedSet { found: "number" }),
            Value::String(_) => Err(PayloadError::NotAKeyedSet { found: "string" }),
            Value::Array(_) => Err(PayloadError::NotAKeyedSet { found: "array" }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validates every entry. A bad entry never aborts its siblings.
    ///
    /// A JSON object that repeats a key keeps the later entry, so records are
    /// effectively last-write-wins by id.
    pub fn validate(self) -> ValidatedSnapshot {
        let mut out = ValidatedSnapshot::default();
        for (id, raw) in &self.entries {
            match validate(id, raw) {
                Ok(record) => {
                    out.records.insert(record.id.clone(), record);
                }
                Err(error) => out.rejected.push(RejectedEntry {
                    id: id.clone(),
                    error,
                }),
            }
        }
        out
    }
}
