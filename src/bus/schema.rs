use crate::error::{BusError, BusResult};
use serde_json::Value;

/// Topics published unprefixed regardless of the configured topic prefix.
pub const UNPREFIXED_TOPICS: &[&str] = &["intent", "transcript", "response", "error"];

/// Minimal schema validation, keyed by the last path segment of the topic.
pub fn validate(topic_suffix: &str, payload: &Value) -> BusResult<()> {
    let has = |key: &str| payload.get(key).is_some();
    match topic_suffix {
        "events" if !has("type") => Err(BusError::SchemaViolation("type")),
        "newStream" if !has("roomName") => Err(BusError::SchemaViolation("roomName")),
        "newStream" if !has("port") => Err(BusError::SchemaViolation("port")),
        "newStream" if !has("channelId") => Err(BusError::SchemaViolation("channelId")),
        "channelEnd" if !has("channelId") => Err(BusError::SchemaViolation("channelId")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_requires_type() {
        assert!(validate("events", &json!({"type": "x"})).is_ok());
        assert!(validate("events", &json!({})).is_err());
    }

    #[test]
    fn new_stream_requires_three_fields() {
        assert!(validate(
            "newStream",
            &json!({"roomName": "r", "port": 1, "channelId": "c"})
        )
        .is_ok());
        assert!(validate("newStream", &json!({"roomName": "r"})).is_err());
    }

    #[test]
    fn channel_end_requires_channel_id() {
        assert!(validate("channelEnd", &json!({"channelId": "c"})).is_ok());
        assert!(validate("channelEnd", &json!({})).is_err());
    }

    #[test]
    fn unknown_topics_pass() {
        assert!(validate("transcription", &json!({})).is_ok());
    }
}
