use super::surface::Surface;
use crate::state::patch::PatchOperation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wire names of every event the stream may carry, in schema order.
pub const EVENT_TYPES: [&str; 18] = [
    "RUN_STARTED",
    "RUN_FINISHED",
    "RUN_ERROR",
    "STEP_STARTED",
    "STEP_FINISHED",
    "STEP_ERROR",
    "TEXT_MESSAGE_START",
    "TEXT_MESSAGE_CONTENT",
    "TEXT_MESSAGE_END",
    "TOOL_CALL_START",
    "TOOL_CALL_ARGS",
    "TOOL_CALL_END",
    "STATE_SNAPSHOT",
    "STATE_DELTA",
    "ACTION_REQUIRED",
    "APPROVAL_REQUESTED",
    "RENDER_SURFACE",
    "KEEP_ALIVE",
];

/// One decoded server-push message: the shared envelope plus the variant payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Envelope fields carried by every event. Only `KEEP_ALIVE` may omit them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum EventKind {
    RunStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow_id: Option<String>,
        #[serde(default)]
        steps: Vec<StepDescriptor>,
    },
    RunFinished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    RunError {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    StepStarted {
        step_index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    StepFinished {
        step_index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    StepError {
        step_index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
        error: String,
    },
    TextMessageStart {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
    TextMessageContent {
        message_id: String,
        #[serde(alias = "delta")]
        content: String,
    },
    TextMessageEnd {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        full_content: Option<String>,
    },
    ToolCallStart {
        tool_call_id: String,
        #[serde(alias = "toolCallName")]
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },
    ToolCallArgs {
        tool_call_id: String,
        delta: String,
    },
    ToolCallEnd {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    StateSnapshot {
        snapshot: Value,
    },
    StateDelta {
        delta: Vec<PatchOperation>,
    },
    ActionRequired {
        action_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        /// Advisory deadline in milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    ApprovalRequested {
        approval_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
        /// Advisory deadline in milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    RenderSurface {
        surface: Surface,
    },
    KeepAlive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub id: String,
    #[serde(default)]
    pub label: String,
}

/// Caller decision on a pending approval, sent over the side channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResolution {
    pub approval_id: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Action a user triggered on a rendered surface, sent over the side channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceActionRequest {
    pub surface_id: String,
    pub action_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl EventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::RunStarted { .. } => "RUN_STARTED",
            EventKind::RunFinished { .. } => "RUN_FINISHED",
            EventKind::RunError { .. } => "RUN_ERROR",
            EventKind::StepStarted { .. } => "STEP_STARTED",
            EventKind::StepFinished { .. } => "STEP_FINISHED",
            EventKind::StepError { .. } => "STEP_ERROR",
            EventKind::TextMessageStart { .. } => "TEXT_MESSAGE_START",
            EventKind::TextMessageContent { .. } => "TEXT_MESSAGE_CONTENT",
            EventKind::TextMessageEnd { .. } => "TEXT_MESSAGE_END",
            EventKind::ToolCallStart { .. } => "TOOL_CALL_START",
            EventKind::ToolCallArgs { .. } => "TOOL_CALL_ARGS",
            EventKind::ToolCallEnd { .. } => "TOOL_CALL_END",
            EventKind::StateSnapshot { .. } => "STATE_SNAPSHOT",
            EventKind::StateDelta { .. } => "STATE_DELTA",
            EventKind::ActionRequired { .. } => "ACTION_REQUIRED",
            EventKind::ApprovalRequested { .. } => "APPROVAL_REQUESTED",
            EventKind::RenderSurface { .. } => "RENDER_SURFACE",
            EventKind::KeepAlive => "KEEP_ALIVE",
        }
    }

    pub fn is_known_type(event_type: &str) -> bool {
        EVENT_TYPES.contains(&event_type)
    }

    /// Events that end a run: nothing after them may change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::RunFinished { .. } | EventKind::RunError { .. })
    }
}

impl AgentEvent {
    pub fn new(run_id: &str, session_id: &str, timestamp: DateTime<Utc>, kind: EventKind) -> Self {
        Self {
            meta: EventMeta {
                run_id: run_id.to_string(),
                session_id: session_id.to_string(),
                timestamp: Some(timestamp),
            },
            kind,
        }
    }

    pub fn keep_alive() -> Self {
        Self {
            meta: EventMeta::default(),
            kind: EventKind::KeepAlive,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    fn validate_envelope(&self) -> Result<(), String> {
        if matches!(self.kind, EventKind::KeepAlive) {
            return Ok(());
        }
        if self.meta.run_id.trim().is_empty() {
            return Err("missing runId".to_string());
        }
        if self.meta.timestamp.is_none() {
            return Err("missing timestamp".to_string());
        }
        Ok(())
    }
}

/// Outcome of decoding one framed message.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(AgentEvent),
    /// Event name outside the schema. Dropped by the caller to keep the stream alive.
    Unrecognized { event_type: String },
    Malformed {
        event_type: Option<String>,
        error: String,
    },
}

/// Decode a named message into an [`AgentEvent`].
///
/// The frame's event name wins over any `type` field in the body; the body
/// type is only consulted for unnamed frames (or the SSE default `message`).
pub fn decode_message(event_name: Option<&str>, data: &str) -> Decoded {
    let name = event_name
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "message")
        .map(str::to_string);

    let mut body = if data.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        match serde_json::from_str::<Value>(data) {
            Ok(body) => body,
            Err(error) => {
                return Decoded::Malformed {
                    event_type: name,
                    error: error.to_string(),
                }
            }
        }
    };

    let Some(object) = body.as_object_mut() else {
        return Decoded::Malformed {
            event_type: name,
            error: "payload is not a JSON object".to_string(),
        };
    };

    let event_type = match name {
        Some(name) => name,
        None => match object.get("type").and_then(Value::as_str) {
            Some(body_type) => body_type.to_string(),
            None => {
                return Decoded::Malformed {
                    event_type: None,
                    error: "message carries no event type".to_string(),
                }
            }
        },
    };

    if !EventKind::is_known_type(&event_type) {
        return Decoded::Unrecognized { event_type };
    }
    object.insert("type".to_string(), Value::String(event_type.clone()));

    match serde_json::from_value::<AgentEvent>(body) {
        Ok(event) => match event.validate_envelope() {
            Ok(()) => Decoded::Event(event),
            Err(error) => Decoded::Malformed {
                event_type: Some(event_type),
                error,
            },
        },
        Err(error) => Decoded::Malformed {
            event_type: Some(event_type),
            error: error.to_string(),
        },
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        FractionalMillis(f64),
        Text(String),
    }

    match Option::<RawTimestamp>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawTimestamp::Millis(millis)) => DateTime::from_timestamp_millis(millis)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {millis}"))),
        Some(RawTimestamp::FractionalMillis(millis)) => {
            DateTime::from_timestamp_millis(millis as i64)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {millis}")))
        }
        Some(RawTimestamp::Text(text)) => DateTime::parse_from_rfc3339(text.trim())
            .map(|parsed| Some(parsed.with_timezone(&Utc)))
            .map_err(|error| D::Error::custom(format!("invalid timestamp '{text}': {error}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::surface::Surface;

    fn event_of(decoded: Decoded) -> AgentEvent {
        match decoded {
            Decoded::Event(event) => event,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_run_started_with_steps() {
        let event = event_of(decode_message(
            Some("RUN_STARTED"),
            r#"{"runId":"r1","sessionId":"s1","timestamp":"2025-01-01T00:00:00Z","workflowId":"wf","steps":[{"id":"s1","label":"Plan"},{"id":"s2","label":"Act"}]}"#,
        ));
        assert_eq!(event.meta.run_id, "r1");
        assert_eq!(event.meta.session_id, "s1");
        match event.kind {
            EventKind::RunStarted { workflow_id, steps } => {
                assert_eq!(workflow_id.as_deref(), Some("wf"));
                assert_eq!(steps.len(), 2);
                assert_eq!(steps[1].label, "Act");
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_event_name_wins_over_body_type() {
        let event = event_of(decode_message(
            Some("TEXT_MESSAGE_CONTENT"),
            r#"{"type":"SOMETHING_ELSE","runId":"r1","sessionId":"s1","timestamp":1735689600000,"messageId":"m1","delta":"Hi"}"#,
        ));
        assert_eq!(
            event.kind,
            EventKind::TextMessageContent {
                message_id: "m1".to_string(),
                content: "Hi".to_string(),
            }
        );
        assert_eq!(
            event.meta.timestamp,
            DateTime::from_timestamp_millis(1_735_689_600_000)
        );
    }

    #[test]
    fn test_unnamed_frame_falls_back_to_body_type() {
        let event = event_of(decode_message(
            None,
            r#"{"type":"RUN_FINISHED","runId":"r1","sessionId":"s1","timestamp":"2025-01-01T00:00:05Z","result":{"ok":true}}"#,
        ));
        assert!(event.kind.is_terminal());
    }

    #[test]
    fn test_unknown_event_name_is_unrecognized_not_error() {
        let decoded = decode_message(Some("RUN_TELEPORTED"), r#"{"runId":"r1"}"#);
        assert_eq!(
            decoded,
            Decoded::Unrecognized {
                event_type: "RUN_TELEPORTED".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            decode_message(Some("RUN_STARTED"), "{not json"),
            Decoded::Malformed { .. }
        ));
        assert!(matches!(
            decode_message(Some("RUN_STARTED"), "[1,2]"),
            Decoded::Malformed { .. }
        ));
        // Known type but missing the envelope.
        assert!(matches!(
            decode_message(Some("STEP_STARTED"), r#"{"stepIndex":0}"#),
            Decoded::Malformed { .. }
        ));
        // Known type with a wrongly typed field.
        assert!(matches!(
            decode_message(
                Some("STEP_STARTED"),
                r#"{"runId":"r1","sessionId":"s1","timestamp":1,"stepIndex":"zero"}"#
            ),
            Decoded::Malformed { .. }
        ));
    }

    #[test]
    fn test_keep_alive_needs_no_envelope() {
        let event = event_of(decode_message(Some("KEEP_ALIVE"), ""));
        assert_eq!(event, AgentEvent::keep_alive());
    }

    #[test]
    fn test_unknown_surface_type_still_decodes() {
        let event = event_of(decode_message(
            Some("RENDER_SURFACE"),
            r#"{"runId":"r1","sessionId":"s1","timestamp":1,"surface":{"type":"unknown_future_type","id":"x1","blob":[1]}}"#,
        ));
        match event.kind {
            EventKind::RenderSurface { surface } => {
                assert!(matches!(surface, Surface::Unrecognized(_)));
                assert_eq!(surface.id(), "x1");
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_state_delta_ops_decode() {
        let event = event_of(decode_message(
            Some("STATE_DELTA"),
            r#"{"runId":"r1","sessionId":"s1","timestamp":1,"delta":[{"op":"add","path":"/a","value":1},{"op":"move","from":"/a","path":"/b"}]}"#,
        ));
        match event.kind {
            EventKind::StateDelta { delta } => assert_eq!(delta.len(), 2),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_type_names_cover_schema() {
        for name in EVENT_TYPES {
            assert!(EventKind::is_known_type(name));
        }
        assert_eq!(AgentEvent::keep_alive().type_name(), "KEEP_ALIVE");
    }
}
