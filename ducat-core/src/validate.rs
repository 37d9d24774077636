//! Per-object validation for writes.
//!
//! Each envelope member is checked in isolation. A bad object produces a
//! [`RejectedObject`] carrying the failure for the status record; it never
//! aborts the rest of the batch.

use serde_json::Value;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::model::{Collection, StixObject};
use crate::timestamp::Timestamp;

/// An envelope member that failed validation, with the identity a status
/// entry needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedObject {
    /// Best-effort id for reporting. Objects with no usable id are reported
    /// under this placeholder.
    pub id: String,
    pub version: Timestamp,
    pub error: ValidationError,
}

const UNKNOWN_ID: &str = "unknown";

/// Validate one raw envelope member against a collection and normalize it
/// into a [`StixObject`].
///
/// Checks, in order: the value is a JSON object, its `id` is a well-formed
/// STIX identifier, its `type` agrees with the id prefix, its `created` and
/// `modified` timestamps parse, and its media type is accepted by the
/// collection. `request_time` stands in for the version of objects carrying
/// neither timestamp.
pub fn parse_object(
    raw: Value,
    collection: &Collection,
    request_time: Timestamp,
) -> Result<StixObject, RejectedObject> {
    let mut map = match raw {
        Value::Object(map) => map,
        other => {
            return Err(RejectedObject {
                id: UNKNOWN_ID.into(),
                version: request_time,
                error: ValidationError::MalformedId(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )),
            });
        }
    };

    let id = match map.get("id").and_then(Value::as_str) {
        Some(id) => id.to_owned(),
        None => {
            return Err(RejectedObject {
                id: UNKNOWN_ID.into(),
                version: request_time,
                error: ValidationError::MalformedId("missing id property".into()),
            });
        }
    };

    let reject = |error: ValidationError| RejectedObject {
        id: id.clone(),
        version: version_hint(&map, request_time),
        error,
    };

    let prefix = match check_id(&id) {
        Ok(prefix) => prefix,
        Err(error) => return Err(reject(error)),
    };

    match map.get("type") {
        None => {}
        Some(Value::String(declared)) if declared == prefix => {}
        Some(other) => {
            let declared = other.as_str().map(str::to_owned).unwrap_or_else(|| other.to_string());
            return Err(reject(ValidationError::MalformedId(format!(
                "id prefix {prefix} does not match type {declared}"
            ))));
        }
    }

    for field in ["created", "modified"] {
        if let Some(value) = map.get(field) {
            let ok = value
                .as_str()
                .is_some_and(|s| Timestamp::parse(s).is_ok());
            if !ok {
                return Err(reject(ValidationError::MalformedTimestamp {
                    field: if field == "created" { "created" } else { "modified" },
                    value: value.as_str().map(str::to_owned).unwrap_or_else(|| value.to_string()),
                }));
            }
        }
    }

    // The id prefix is authoritative; objects may omit `type` entirely.
    if !map.contains_key("type") {
        map.insert("type".into(), Value::String(prefix.to_owned()));
    }

    let object: StixObject = match serde_json::from_value(Value::Object(map)) {
        Ok(object) => object,
        Err(e) => {
            return Err(RejectedObject {
                id,
                version: request_time,
                error: ValidationError::MalformedId(e.to_string()),
            });
        }
    };

    if !collection.accepts_media_type(&object.media_type()) {
        let media_type = object.media_type();
        let version = object.version(request_time);
        return Err(RejectedObject {
            id: object.id,
            version,
            error: ValidationError::UnsupportedType(media_type),
        });
    }

    Ok(object)
}

/// Structural check of a STIX identifier: `type--uuid`.
fn check_id(id: &str) -> Result<&str, ValidationError> {
    let malformed = || ValidationError::MalformedId(id.to_owned());
    let (prefix, suffix) = id.split_once("--").ok_or_else(malformed)?;
    let valid_prefix = prefix
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase())
        && prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_prefix {
        return Err(malformed());
    }
    Uuid::parse_str(suffix).map_err(|_| malformed())?;
    Ok(prefix)
}

/// Version to report for an object rejected before full parsing: its
/// `modified` or `created` string if one parses, else the request time.
fn version_hint(map: &serde_json::Map<String, Value>, request_time: Timestamp) -> Timestamp {
    ["modified", "created"]
        .iter()
        .find_map(|field| {
            map.get(*field)
                .and_then(Value::as_str)
                .and_then(|s| Timestamp::parse(s).ok())
        })
        .unwrap_or(request_time)
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
