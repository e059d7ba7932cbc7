//! Wire envelope for events published to the IAM topic exchange.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CoreError;

/// A generic domain event as published by upstream services.
///
/// Required string fields default to empty when absent so that an
/// incomplete envelope surfaces as a [`CoreError::Validation`] from
/// [`validate_structure`](GenericEvent::validate_structure) rather than as a
/// deserialization failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericEvent {
    /// Unique per logical occurrence.
    #[serde(default)]
    pub event_id: String,

    /// Dot-delimited routing classifier, e.g. `"user.created.log"`.
    #[serde(default)]
    pub topic: String,

    #[serde(default)]
    pub source_service: String,

    /// Producer-supplied event time, see [`crate::timestamp`].
    #[serde(default)]
    pub timestamp: String,

    /// Arbitrary event attributes. `null` is treated as an empty map.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl GenericEvent {
    /// Check that every required field is present and non-empty.
    ///
    /// The payload may be empty.
    pub fn validate_structure(&self) -> Result<(), CoreError> {
        let required = [
            ("eventId", &self.event_id),
            ("topic", &self.topic),
            ("sourceService", &self.source_service),
            ("timestamp", &self.timestamp),
        ];

        for (field, value) in required {
            if value.is_empty() {
                return Err(CoreError::Validation(format!("{field} is required")));
            }
        }

        Ok(())
    }
}

fn null_as_empty<'de, D>(
    deserializer: D,
) -> Result<serde_json::Map<String, serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let payload = Option::<serde_json::Map<String, serde_json::Value>>::deserialize(deserializer)?;
    Ok(payload.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const USER_CREATED: &str = r#"{
        "eventId": "e1",
        "topic": "user.created.log",
        "sourceService": "iam",
        "timestamp": "2024-01-01T00:00:00Z",
        "payload": {"userId": "u1"}
    }"#;

    #[test]
    fn deserializes_camel_case_envelope() {
        let event: GenericEvent = serde_json::from_str(USER_CREATED).unwrap();
        assert_eq!(event.event_id, "e1");
        assert_eq!(event.topic, "user.created.log");
        assert_eq!(event.source_service, "iam");
        assert_eq!(event.timestamp, "2024-01-01T00:00:00Z");
        assert_eq!(event.payload["userId"], "u1");
        assert!(event.validate_structure().is_ok());
    }

    #[test]
    fn empty_event_id_fails_validation() {
        let event = GenericEvent {
            event_id: String::new(),
            ..serde_json::from_str(USER_CREATED).unwrap()
        };
        assert_matches!(
            event.validate_structure(),
            Err(CoreError::Validation(msg)) if msg == "eventId is required"
        );
    }

    #[test]
    fn missing_fields_deserialize_then_fail_validation() {
        let event: GenericEvent =
            serde_json::from_str(r#"{"eventId": "e1", "topic": "user.created.log"}"#).unwrap();
        assert_matches!(
            event.validate_structure(),
            Err(CoreError::Validation(msg)) if msg == "sourceService is required"
        );
    }

    #[test]
    fn null_or_missing_payload_is_empty() {
        let event: GenericEvent = serde_json::from_str(
            r#"{"eventId":"e1","topic":"t.log","sourceService":"iam","timestamp":"x","payload":null}"#,
        )
        .unwrap();
        assert!(event.payload.is_empty());

        let event: GenericEvent = serde_json::from_str(
            r#"{"eventId":"e1","topic":"t.log","sourceService":"iam","timestamp":"x"}"#,
        )
        .unwrap();
        assert!(event.payload.is_empty());
        assert!(event.validate_structure().is_ok());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(serde_json::from_slice::<GenericEvent>(b"{not json").is_err());
    }
}
