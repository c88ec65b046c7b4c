//! Submission Validator (4.A): schema-checks inbound `Collected` /
//! `Processed` records. Pure and side-effect-free — no store access, no
//! I/O. Unknown extra fields are dropped by virtue of `serde`'s default
//! behavior (we never set `deny_unknown_fields`).

use serde_json::Value;
use uuid::Uuid;

use crate::model::{CollectedItem, ProcessedItem};

#[derive(Debug, Clone, thiserror::Error)]
#[error("validation failed on field `{field}`: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &str, reason: &str) -> Self {
        ValidationError {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Missing/empty UUID is auto-filled with a freshly generated identifier,
/// matching the upstream submission contract; every other required field
/// must already be present.
pub fn validate_collected(mut raw: Value) -> Result<CollectedItem, ValidationError> {
    let obj = raw
        .as_object_mut()
        .ok_or_else(|| ValidationError::new("$", "expected a JSON object"))?;

    let needs_uuid = match obj.get("UUID") {
        None => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Null) => true,
        Some(_) => false,
    };
    if needs_uuid {
        obj.insert(
            "UUID".to_string(),
            Value::String(Uuid::new_v4().to_string()),
        );
    }

    match obj.get("token") {
        Some(Value::String(s)) if !s.is_empty() => {}
        _ => return Err(ValidationError::new("token", "required, non-empty string")),
    }

    match obj.get("content") {
        Some(Value::String(s)) if !s.is_empty() => {}
        _ => return Err(ValidationError::new("content", "required, non-empty string")),
    }

    serde_json::from_value(raw).map_err(|e| ValidationError::new("$", &e.to_string()))
}

/// Re-validation step run by the Archival Worker before indexing; same
/// shape check as at ingestion, no defaulting since a `ProcessedItem` is
/// always machine-produced.
pub fn validate_processed(raw: Value) -> Result<ProcessedItem, ValidationError> {
    let item: ProcessedItem =
        serde_json::from_value(raw).map_err(|e| ValidationError::new("$", &e.to_string()))?;

    if item.event_title.is_empty() {
        return Err(ValidationError::new("EVENT_TITLE", "must not be empty"));
    }
    if item.event_brief.is_empty() {
        return Err(ValidationError::new("EVENT_BRIEF", "must not be empty"));
    }
    if item.informant.is_empty() {
        return Err(ValidationError::new("INFORMANT", "must not be empty"));
    }

    Ok(item)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_uuid_is_auto_filled() {
        let item = validate_collected(json!({
            "token": "tok",
            "content": "body",
        }))
        .unwrap();
        assert!(!item.uuid.is_nil());
    }

    #[test]
    fn empty_uuid_is_replaced_not_rejected() {
        let item = validate_collected(json!({
            "UUID": "",
            "token": "tok",
            "content": "body",
        }))
        .unwrap();
        assert!(!item.uuid.is_nil());
    }

    #[test]
    fn missing_token_is_rejected() {
        let err = validate_collected(json!({
            "content": "body",
        }))
        .unwrap_err();
        assert_eq!(err.field, "token");
    }

    #[test]
    fn empty_content_is_rejected() {
        let err = validate_collected(json!({
            "token": "tok",
            "content": "",
        }))
        .unwrap_err();
        assert_eq!(err.field, "content");
    }

    #[test]
    fn unknown_extra_fields_are_dropped() {
        let item = validate_collected(json!({
            "token": "tok",
            "content": "body",
            "unexpected_field": "surprise",
        }))
        .unwrap();
        assert_eq!(item.token, "tok");
    }

    #[test]
    fn sanitize_is_idempotent_on_already_valid_input() {
        let raw = json!({
            "UUID": "11111111-1111-1111-1111-111111111111",
            "token": "tok",
            "content": "body",
        });
        let first = validate_collected(raw.clone()).unwrap();
        let second = validate_collected(raw).unwrap();
        assert_eq!(first.uuid, second.uuid);
        assert_eq!(first.token, second.token);
        assert_eq!(first.content, second.content);
    }
}
