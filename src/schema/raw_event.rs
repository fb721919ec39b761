//! Raw event log record definition
//!
//! Each record in the event log has the shape:
//!
//! ```json
//! { "id": "...", "type": "view", "event": { "customer-id": "...", "timestamp": "..." } }
//! ```
//!
//! Records are decoded leniently so that a missing or mistyped field, or a
//! record that is not an object at all, can be reported against the record
//! that carries it instead of failing the whole decode.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Input record layout identifier
pub const SCHEMA_VERSION: &str = "funnel.raw_event.v1";

/// A raw event record as found in the event log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEventRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<Value>,
    /// Nested body; kept untyped so a non-object body is a field error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Value>,
    /// JSON kind of a log element that was not an object
    #[serde(skip)]
    pub non_object: Option<String>,
}

impl From<Value> for RawEventRecord {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(mut map) => Self {
                id: map.remove("id"),
                event_type: map.remove("type"),
                event: map.remove("event"),
                non_object: None,
            },
            other => Self {
                non_object: Some(json_kind(&other).to_string()),
                ..Self::default()
            },
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A record whose required fields have been checked and flattened
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRecord {
    pub id: String,
    pub event_type: String,
    /// `None` for anonymous visitors
    pub customer_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RawEventRecord {
    /// Build a record from its parts (mostly useful for tests and fixtures)
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        customer_id: Option<&str>,
        timestamp: impl Into<String>,
    ) -> Self {
        let timestamp: String = timestamp.into();
        Self {
            id: Some(Value::String(id.into())),
            event_type: Some(Value::String(event_type.into())),
            event: Some(json!({
                "customer-id": customer_id,
                "timestamp": timestamp,
            })),
            non_object: None,
        }
    }

    /// Best-effort identifier for error reporting
    pub fn display_id(&self) -> Option<String> {
        self.id.as_ref().and_then(scalar_to_string)
    }

    /// Validate required fields and flatten into a [`FlatRecord`]
    pub fn flatten(&self) -> Result<FlatRecord, ValidationError> {
        if let Some(kind) = &self.non_object {
            return Err(ValidationError::InvalidField {
                field: "record",
                reason: format!("expected an object, found {}", kind),
            });
        }

        let id = match &self.id {
            None | Some(Value::Null) => return Err(ValidationError::MissingField("id")),
            Some(value) => scalar_to_string(value).ok_or(ValidationError::InvalidField {
                field: "id",
                reason: "expected a string or number".to_string(),
            })?,
        };

        let event_type = match &self.event_type {
            None | Some(Value::Null) => return Err(ValidationError::MissingField("type")),
            Some(Value::String(s)) => s.clone(),
            Some(_) => {
                return Err(ValidationError::InvalidField {
                    field: "type",
                    reason: "expected a string".to_string(),
                })
            }
        };

        let body: &Map<String, Value> = match &self.event {
            None | Some(Value::Null) => return Err(ValidationError::MissingField("event")),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(ValidationError::InvalidField {
                    field: "event",
                    reason: format!("expected an object, found {}", json_kind(other)),
                })
            }
        };

        let customer_id = match body.get("customer-id") {
            None => return Err(ValidationError::MissingField("event.customer-id")),
            Some(Value::Null) => None,
            Some(value) => Some(scalar_to_string(value).ok_or(ValidationError::InvalidField {
                field: "event.customer-id",
                reason: "expected a string, number or null".to_string(),
            })?),
        };

        let timestamp = match body.get("timestamp") {
            None | Some(Value::Null) => {
                return Err(ValidationError::MissingField("event.timestamp"))
            }
            Some(Value::String(s)) => parse_timestamp(s).ok_or(ValidationError::InvalidField {
                field: "event.timestamp",
                reason: format!("not an ISO-8601 instant: {}", s),
            })?,
            Some(_) => {
                return Err(ValidationError::InvalidField {
                    field: "event.timestamp",
                    reason: "expected a string".to_string(),
                })
            }
        };

        Ok(FlatRecord {
            id,
            event_type,
            customer_id,
            timestamp,
        })
    }

    /// Check the record without keeping the flattened value
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.flatten().map(|_| ())
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse an ISO-8601 instant.
///
/// Accepts RFC 3339 with an offset, or a naive date-time which is taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Validation errors for raw event records
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingField(field) => field,
            ValidationError::InvalidField { field, .. } => field,
        }
    }
}
