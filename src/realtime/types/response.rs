use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::serde_helpers::deserialize_with_warnings;
use crate::ws::WsError;

/// Frame received from the backend, discriminated by its `type` field.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// The backend pinged us; nothing to answer at this layer
    Ping,
    /// Answer to a keep-alive `ping`
    Pong,
    /// Sent once after the socket opens (`status = "connected"`)
    ConnectionEstablished(Ack),
    /// Acknowledges a `subscribe` (`status = "subscribed"`)
    Subscription(Ack),
    /// Acknowledges an `unsubscribe` (`status = "unsubscribed"`)
    Unsubscription(Ack),
    /// Partial execution record for `message_id`
    Update(UpdateFrame),
    /// Client-bound `subscribe` echo
    Subscribe(Ack),
    /// Client-bound `unsubscribe` echo
    Unsubscribe(Ack),
    /// Any `type` this client does not know
    #[serde(other)]
    Unknown,
}

impl ServerFrame {
    /// The `message_id` carried by the frame, if any.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::ConnectionEstablished(ack)
            | Self::Subscription(ack)
            | Self::Unsubscription(ack)
            | Self::Subscribe(ack)
            | Self::Unsubscribe(ack) => ack.message_id.as_deref(),
            Self::Update(update) => update.message_id.as_deref(),
            Self::Ping | Self::Pong | Self::Unknown => None,
        }
    }
}

/// Body shared by acknowledgement frames.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Body of an `update` frame: the id plus whichever record fields changed.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpdateFrame {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl UpdateFrame {
    /// The id to merge into, or `None` when missing or empty.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.message_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Accumulated state of one execution, built by shallow-merging `update` frames.
///
/// Later frames overwrite earlier values key by key; nested objects are replaced,
/// not merged.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub message_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ExecutionRecord {
    #[must_use]
    pub fn new<S: Into<String>>(message_id: S) -> Self {
        Self {
            message_id: message_id.into(),
            fields: Map::new(),
        }
    }

    /// Overwrite each field present in `fields`. The envelope keys `type` and
    /// `message_id` are never copied.
    pub fn merge(&mut self, fields: &Map<String, Value>) {
        for (key, value) in fields {
            if key == "type" || key == "message_id" {
                continue;
            }
            self.fields.insert(key.clone(), value.clone());
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.str_field("code")
    }

    #[must_use]
    pub fn stdout(&self) -> Option<&str> {
        self.str_field("stdout")
    }

    #[must_use]
    pub fn stderr(&self) -> Option<&str> {
        self.str_field("stderr")
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.str_field("message")
    }

    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.str_field("status")
    }

    #[must_use]
    pub fn logging(&self) -> Option<&Value> {
        self.fields.get("logging")
    }

    #[must_use]
    pub fn timestamp(&self) -> Option<&Value> {
        self.fields.get("timestamp")
    }

    /// `true` once the backend reported the execution finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.fields
            .get("is_complete")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    #[must_use]
    pub fn is_streamable(&self) -> bool {
        self.fields
            .get("is_streamable")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Typed view of the known execution fields.
    pub fn to_update(&self) -> crate::Result<ExecutionUpdate> {
        deserialize_with_warnings(Value::Object(self.fields.clone()))
    }
}

/// Typed execution fields carried by `update` frames.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ExecutionUpdate {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    /// Structured log entries; the shape is backend-defined
    #[serde(default)]
    pub logging: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub is_streamable: bool,
    /// Backend timestamp, numeric or ISO 8601
    #[serde(default)]
    pub timestamp: Option<Value>,
}

/// Deserialize the frames carried by one text message.
///
/// Accepts a single object or an array of objects. Empty or whitespace-only input
/// yields no frames. A malformed element of an array is logged and skipped; the
/// rest of the batch is still returned.
pub fn parse_frames(bytes: &[u8]) -> crate::Result<Vec<ServerFrame>> {
    let trimmed = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(&[][..], |start| &bytes[start..]);

    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_slice::<Value>(trimmed).map_err(WsError::MessageParse)? {
        Value::Array(items) => Ok(items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| match deserialize_with_warnings(item) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(index, error = %e, "skipping malformed frame in batch");
                    #[cfg(not(feature = "tracing"))]
                    let _ = (index, &e);
                    None
                }
            })
            .collect()),
        value @ Value::Object(_) => Ok(vec![deserialize_with_warnings(value)?]),
        other => Err(WsError::InvalidMessage(format!("expected an object or array, got {other}")).into()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn parses_every_known_type() {
        let raw = r#"[
            {"type": "ping"},
            {"type": "pong"},
            {"type": "connection_established", "message_id": "exec-1", "status": "connected"},
            {"type": "subscription", "message_id": "exec-2", "status": "subscribed"},
            {"type": "unsubscription", "message_id": "exec-2", "status": "unsubscribed"},
            {"type": "update", "message_id": "exec-1", "stdout": "hi"}
        ]"#;

        let frames = parse_frames(raw.as_bytes()).unwrap();

        assert_eq!(frames.len(), 6);
        assert_eq!(frames[0], ServerFrame::Ping);
        assert_eq!(frames[1], ServerFrame::Pong);
        assert!(matches!(
            &frames[2],
            ServerFrame::ConnectionEstablished(Ack { status: Some(status), .. }) if status == "connected"
        ));
        assert_eq!(frames[3].message_id(), Some("exec-2"));
        assert!(matches!(&frames[4], ServerFrame::Unsubscription(_)));
        match &frames[5] {
            ServerFrame::Update(update) => {
                assert_eq!(update.target(), Some("exec-1"));
                assert_eq!(update.fields.get("stdout"), Some(&json!("hi")));
                assert!(!update.fields.contains_key("type"));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_tolerated() {
        let frames = parse_frames(br#"{"type": "heartbeat_v2", "seq": 4}"#).unwrap();

        assert_eq!(frames, vec![ServerFrame::Unknown]);
    }

    #[test]
    fn whitespace_yields_no_frames() {
        assert!(parse_frames(b"  \n\t").unwrap().is_empty());
        assert!(parse_frames(b"").unwrap().is_empty());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let error = parse_frames(b"{not json").unwrap_err();
        assert!(matches!(error.ws(), Some(WsError::MessageParse(_))), "got {error}");
        let error = parse_frames(b"42").unwrap_err();
        assert!(matches!(error.ws(), Some(WsError::InvalidMessage(_))), "got {error}");
        assert!(parse_frames(br#"{"message_id": "no type"}"#).is_err());
    }

    #[test]
    fn malformed_batch_element_is_skipped() {
        let raw = r#"[
            {"message_id": "no type"},
            {"type": "update", "message_id": "exec-1", "stdout": "kept"},
            {"type": "subscription", "message_id": 7}
        ]"#;

        let frames = parse_frames(raw.as_bytes()).unwrap();

        assert_eq!(frames.len(), 1);
        match &frames[0] {
            ServerFrame::Update(update) => {
                assert_eq!(update.target(), Some("exec-1"));
                assert_eq!(update.fields.get("stdout"), Some(&json!("kept")));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn update_without_usable_id_has_no_target() {
        let frames = parse_frames(br#"[{"type": "update"}, {"type": "update", "message_id": ""}]"#)
            .unwrap();

        for frame in frames {
            let ServerFrame::Update(update) = frame else {
                panic!("expected update");
            };
            assert_eq!(update.target(), None);
        }
    }

    #[test]
    fn merge_is_shallow_and_skips_envelope_keys() {
        let mut record = ExecutionRecord::new("exec-1");
        record.merge(&object(json!({
            "type": "update",
            "message_id": "other",
            "stdout": "a",
            "logging": [{"level": "info"}],
            "status": "running"
        })));
        record.merge(&object(json!({
            "stdout": "ab",
            "logging": [],
            "is_complete": true
        })));

        assert_eq!(record.message_id, "exec-1");
        assert_eq!(record.get("type"), None);
        assert_eq!(record.stdout(), Some("ab"));
        assert_eq!(record.logging(), Some(&json!([])));
        assert_eq!(record.status(), Some("running"));
        assert!(record.is_complete());
        assert!(!record.is_streamable());
    }

    #[test]
    fn typed_view_reads_known_fields() {
        let mut record = ExecutionRecord::new("exec-1");
        record.merge(&object(json!({
            "code": "print(1)",
            "stdout": "1\n",
            "is_streamable": true,
            "timestamp": "2026-01-01T00:00:00Z"
        })));

        let update = record.to_update().unwrap();

        assert_eq!(update.code.as_deref(), Some("print(1)"));
        assert_eq!(update.stdout.as_deref(), Some("1\n"));
        assert!(update.is_streamable);
        assert!(!update.is_complete);
        assert_eq!(update.timestamp, Some(json!("2026-01-01T00:00:00Z")));
    }

    #[test]
    fn record_serializes_flat() {
        let mut record = ExecutionRecord::new("exec-1");
        record.merge(&object(json!({ "status": "done" })));

        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({ "message_id": "exec-1", "status": "done" })
        );
    }
}
