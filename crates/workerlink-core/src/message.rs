//! Plain message records exchanged between contexts.

use serde::{Deserialize, Serialize};

/// Reserved message type used for failures raised in the worker context.
pub const REMOTE_ERROR_TYPE: &str = "@@workerlink/error";

/// A typed, structurally cloneable message.
///
/// Messages carry no identity and no markers; everything that decides how a
/// message travels lives on the [`Envelope`](crate::envelope::Envelope).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Discriminant, e.g. `"counter/increment"`.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Message payload (JSON).
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Optional metadata (JSON).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl Message {
    /// Create a new message.
    pub fn new(message_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
            meta: None,
        }
    }

    /// Create a message with no payload.
    pub fn signal(message_type: impl Into<String>) -> Self {
        Self::new(message_type, serde_json::Value::Null)
    }

    /// Attach metadata.
    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn is(&self, message_type: &str) -> bool {
        self.message_type == message_type
    }

    /// Deserialize the payload as a specific type.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

/// A failure raised in the worker context outside any message handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Human readable description.
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Translate a remote failure into a message with the reserved error type.
pub fn error_message(error: &RemoteError) -> Message {
    Message::new(
        REMOTE_ERROR_TYPE,
        serde_json::json!({ "message": error.message }),
    )
}

/// Checks whether a message is a translated remote failure.
pub fn is_error_message(message: &Message) -> bool {
    message.is(REMOTE_ERROR_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_shape() {
        let msg = Message::new("counter/add", json!({"by": 2}));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "counter/add", "payload": {"by": 2}}));

        let with_meta = msg.with_meta(json!({"source": "test"}));
        let value = serde_json::to_value(&with_meta).unwrap();
        assert_eq!(value["meta"]["source"], "test");
    }

    #[test]
    fn test_message_missing_payload_defaults_to_null() {
        let msg: Message = serde_json::from_value(json!({"type": "ping"})).unwrap();
        assert_eq!(msg, Message::signal("ping"));
    }

    #[test]
    fn test_payload_as() {
        #[derive(Deserialize)]
        struct Add {
            by: i64,
        }

        let msg = Message::new("counter/add", json!({"by": 5}));
        let add: Add = msg.payload_as().unwrap();
        assert_eq!(add.by, 5);
        assert!(msg.payload_as::<Vec<String>>().is_err());
    }

    #[test]
    fn test_error_message_translation() {
        let msg = error_message(&RemoteError::new("boom"));
        assert!(is_error_message(&msg));
        assert_eq!(msg.payload["message"], "boom");
        assert!(!is_error_message(&Message::signal("ping")));
    }
}
