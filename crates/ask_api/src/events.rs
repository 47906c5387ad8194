use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One decoded record from the ask stream.
///
/// `delta` and `finish` are the fields the client acts on. Every other field
/// the service sends is kept in `extra` and forwarded untouched. Any parsed
/// object is an event; a `delta` that is not a string is carried as-is and
/// contributes no text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AskEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Value>,
    #[serde(
        default,
        deserialize_with = "deserialize_finish",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub finish: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AskEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: Some(Value::String(text.into())),
            ..Self::default()
        }
    }

    pub fn finished() -> Self {
        Self {
            finish: true,
            ..Self::default()
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Delta text, if the event carries a non-empty string one.
    pub fn delta_text(&self) -> Option<&str> {
        self.delta
            .as_ref()
            .and_then(Value::as_str)
            .filter(|delta| !delta.is_empty())
    }

    pub fn is_finish(&self) -> bool {
        self.finish
    }
}

/// Producers are loose about the marker's type; anything truthy counts.
fn deserialize_finish<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => false,
        Value::Bool(flag) => flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}

/// How an attempt's stream reached its logical end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamCompletion {
    /// A record with `finish: true` arrived.
    FinishMarker,
    /// The transport closed normally without a finish marker.
    TransportEof,
}

/// Summary of one successful attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutcome {
    pub completion: StreamCompletion,
    pub events_delivered: usize,
    pub discarded_tail_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_fields_survive_round_trip() {
        let raw = json!({"delta": "hi", "model": "m1", "usage": {"tokens": 3}});
        let event: AskEvent = serde_json::from_value(raw.clone()).expect("event should decode");

        assert_eq!(event.delta_text(), Some("hi"));
        assert!(!event.is_finish());
        assert_eq!(event.extra.get("model"), Some(&json!("m1")));
        assert_eq!(serde_json::to_value(&event).expect("event should encode"), raw);
    }

    #[test]
    fn finish_defaults_to_false_and_is_omitted() {
        let event: AskEvent = serde_json::from_str("{}").expect("empty object is an event");
        assert_eq!(event, AskEvent::default());
        assert_eq!(serde_json::to_string(&event).expect("encode"), "{}");

        let finished = serde_json::to_value(AskEvent::finished()).expect("encode");
        assert_eq!(finished, json!({"finish": true}));
    }

    #[test]
    fn finish_marker_accepts_truthy_values() {
        for (raw, expected) in [
            (json!({"finish": null}), false),
            (json!({"finish": 0}), false),
            (json!({"finish": 1}), true),
            (json!({"finish": "stop"}), true),
        ] {
            let event: AskEvent = serde_json::from_value(raw).expect("event should decode");
            assert_eq!(event.is_finish(), expected);
        }
    }

    #[test]
    fn non_string_delta_is_kept_without_text() {
        let raw = json!({"delta": {"text": "x"}, "id": "r1"});
        let event: AskEvent = serde_json::from_value(raw.clone()).expect("event should decode");

        assert_eq!(event.delta, Some(json!({"text": "x"})));
        assert_eq!(event.delta_text(), None);
        assert_eq!(event.extra.get("id"), Some(&json!("r1")));
        assert_eq!(serde_json::to_value(&event).expect("event should encode"), raw);
    }

    #[test]
    fn empty_delta_is_not_text() {
        assert_eq!(AskEvent::delta("").delta_text(), None);
    }
}
