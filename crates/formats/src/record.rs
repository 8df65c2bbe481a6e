use serde::Serialize;
use serde_json::{Map, Value};

/// A validated geolocated record.
///
/// Values are immutable once produced by [`validate`]; a later snapshot with
/// the same `id` and different fields is an update of the same entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationRecord {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub category: String,
    /// Optional `user` field written by the reporting backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporter: Option<String>,
    /// Optional `timestamp` field written by the reporting backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<String>,
}

impl LocationRecord {
    pub fn new(id: impl Into<String>, lat: f64, lon: f64, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            lat,
            lon,
            category: category.into(),
            reporter: None,
            reported_at: None,
        }
    }

    /// True if the geographic position differs from `other`.
    pub fn moved_from(&self, other: &LocationRecord) -> bool {
        self.lat != other.lat || self.lon != other.lon
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingField {
        field: &'static str,
    },
    TypeMismatch {
        field: &'static str,
        found: &'static str,
    },
    OutOfRange {
        field: &'static str,
        value: f64,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingField { field } => write!(f, "missing field `{field}`"),
            ValidationError::TypeMismatch { field, found } => {
                write!(f, "field `{field}` has unexpected type {found}")
            }
            ValidationError::OutOfRange { field, value } => {
                write!(f, "field `{field}` out of range: {value}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

const LAT_RANGE: std::ops::RangeInclusive<f64> = -90.0..=90.0;
const LON_RANGE: std::ops::RangeInclusive<f64> = -180.0..=180.0;

/// Converts one raw snapshot entry into a [`LocationRecord`].
///
/// Checks run in a fixed order: presence of `lat`, `lon`, `category`, then
/// types, then ranges. `null` counts as absent. Numeric strings are accepted
/// for coordinates since the upstream store does not enforce number types.
pub fn validate(id: &str, raw: &Value) -> Result<LocationRecord, ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::MissingField { field: "id" });
    }

    let Value::Object(obj) = raw else {
        return Err(ValidationError::TypeMismatch {
            field: "entry",
            found: type_name(raw),
        });
    };

    let lat = required(obj, "lat")?;
    let lon = required(obj, "lon")?;
    let category = required(obj, "category")?;

    let lat = coerce_f64("lat", lat)?;
    let lon = coerce_f64("lon", lon)?;
    let Value::String(category) = category else {
        return Err(ValidationError::TypeMismatch {
            field: "category",
            found: type_name(category),
        });
    };
    let reporter = optional_string(obj.get("user"), "user")?;
    let reported_at = optional_string(obj.get("timestamp"), "timestamp")?;

    if !LAT_RANGE.contains(&lat) {
        return Err(ValidationError::OutOfRange {
            field: "lat",
            value: lat,
        });
    }
    if !LON_RANGE.contains(&lon) {
        return Err(ValidationError::OutOfRange {
            field: "lon",
            value: lon,
        });
    }

    Ok(LocationRecord {
        id: id.to_string(),
        lat,
        lon,
        category: category.clone(),
        reporter,
        reported_at,
    })
}

fn required<'a>(
    obj: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField { field }),
        Some(v) => Ok(v),
    }
}

fn coerce_f64(field: &'static str, value: &Value) -> Result<f64, ValidationError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(ValidationError::TypeMismatch {
            field,
            found: type_name(value),
        }),
    }
}

fn optional_string(
    value: Option<&Value>,
    field: &'static str,
) -> Result<Option<String>, ValidationError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ValidationError::TypeMismatch {
            field,
            found: type_name(other),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
