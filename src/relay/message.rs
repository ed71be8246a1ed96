use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::utils::error::ValidationError;

pub const FIELD_LAT: &str = "lat";
pub const FIELD_LNG: &str = "lng";
pub const FIELD_SPEED: &str = "speed";
pub const FIELD_DATETIME: &str = "datetime";

/// How inbound payloads are turned into frames.
///
/// - `Strict` parses and checks every payload, and subscribers receive the
///   canonical serialization of the resulting [`TelemetryRecord`].
/// - `Lenient` skips validation and forwards the payload text unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    #[default]
    Strict,
    Lenient,
}

/// A validated GPS fix.
///
/// Serializes to the canonical wire form, a minified JSON object with keys
/// `lat`, `lng`, `speed` and `datetime` in that order.
///
/// # Example
///
/// ```rust
/// use gpsrelay::relay::message::validate;
///
/// let record = validate(br#"{"lat":1.0,"lng":2.0,"speed":3.0,"datetime":"2024-01-01T00:00:00Z"}"#).unwrap();
/// assert_eq!(
///     record.to_json().unwrap(),
///     r#"{"lat":1,"lng":2,"speed":3,"datetime":"2024-01-01T00:00:00Z"}"#
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    #[serde(rename = "lat", serialize_with = "compact_number")]
    latitude: f64,
    #[serde(rename = "lng", serialize_with = "compact_number")]
    longitude: f64,
    #[serde(serialize_with = "compact_number")]
    speed: f64,
    #[serde(rename = "datetime")]
    timestamp: String,
}

impl TelemetryRecord {
    pub fn new(latitude: f64, longitude: f64, speed: f64, timestamp: impl Into<String>) -> Self {
        Self {
            latitude,
            longitude,
            speed,
            timestamp: timestamp.into(),
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// The text sent to subscribers.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// Integral values up to 2^53 in magnitude are written without a fractional
// part (`1.0` -> `1`). Anything larger keeps the float form, so `1e16` stays
// `1e16` rather than being spelled out in full.
fn compact_number<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;

    if value.fract() == 0.0 && value.abs() <= MAX_EXACT {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

/// Parses and checks a raw upstream payload.
///
/// Fields are checked in the order `lat`, `lng`, `speed`, `datetime`, and the
/// first one that is absent, `null` or of the wrong type is reported. Extra
/// fields are ignored and do not appear in the record.
pub fn validate(raw: &[u8]) -> Result<TelemetryRecord, ValidationError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| ValidationError::Parse(e.to_string()))?;

    let Value::Object(fields) = value else {
        return Err(ValidationError::Parse(format!(
            "expected a JSON object, found {}",
            kind_of(&value)
        )));
    };

    Ok(TelemetryRecord {
        latitude: number_field(&fields, FIELD_LAT)?,
        longitude: number_field(&fields, FIELD_LNG)?,
        speed: number_field(&fields, FIELD_SPEED)?,
        timestamp: string_field(&fields, FIELD_DATETIME)?,
    })
}

/// Lenient counterpart of [`validate`]: the payload is forwarded as is, so the
/// only requirement is that it can travel in a text frame.
pub fn validate_lenient(raw: &[u8]) -> Result<String, ValidationError> {
    String::from_utf8(raw.to_vec()).map_err(|_| ValidationError::NotUtf8)
}

fn present<'a>(fields: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, ValidationError> {
    match fields.get(name) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(name)),
        Some(value) => Ok(value),
    }
}

fn number_field(fields: &Map<String, Value>, name: &'static str) -> Result<f64, ValidationError> {
    present(fields, name)?
        .as_f64()
        .ok_or(ValidationError::InvalidField {
            field: name,
            expected: "number",
        })
}

fn string_field(fields: &Map<String, Value>, name: &'static str) -> Result<String, ValidationError> {
    present(fields, name)?
        .as_str()
        .map(str::to_owned)
        .ok_or(ValidationError::InvalidField {
            field: name,
            expected: "string",
        })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
