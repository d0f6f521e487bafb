//! The channel send primitive and the wire shapes it carries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Message;
use crate::transfer::TransferSet;

/// Errors raised by a channel send.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The destination context is gone or the channel was closed.
    #[error("channel is disconnected")]
    Disconnected,

    /// The payload could not be copied into a frame.
    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),

    /// A received frame could not be decoded.
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
}

/// The value carried by one channel delivery.
///
/// On the wire a batch is a JSON array and a single message is a bare object,
/// so a receiver can tell them apart without an extra tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Batch(Vec<Message>),
    Single(Message),
}

impl Payload {
    /// Build the payload for a run of plain messages.
    ///
    /// A run of one is sent bare, never as a one-element list. Returns `None`
    /// for an empty run.
    pub fn from_run(mut run: Vec<Message>) -> Option<Self> {
        match run.len() {
            0 => None,
            1 => run.pop().map(Payload::Single),
            _ => Some(Payload::Batch(run)),
        }
    }

    /// Number of logical messages in this payload.
    pub fn len(&self) -> usize {
        match self {
            Payload::Batch(messages) => messages.len(),
            Payload::Single(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Payload::Batch(_))
    }

    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Payload::Batch(messages) => messages,
            Payload::Single(message) => vec![message],
        }
    }
}

/// One delivery as seen by the receiving context.
#[derive(Debug)]
pub struct Delivery {
    pub payload: Payload,
    pub transfer: Option<TransferSet>,
}

/// Sending half of a channel between two contexts.
///
/// Both calls are fire-and-forget: `Ok` means the channel accepted the data,
/// not that the other side observed it.
pub trait Channel: Send + Sync {
    /// Copy `payload` to the other context.
    fn post(&self, payload: Payload) -> Result<(), ChannelError>;

    /// Copy `payload` and move the handles in `transfer` to the other context.
    ///
    /// On error the handles are released; they are never handed back.
    fn post_with_transfer(
        &self,
        payload: Payload,
        transfer: TransferSet,
    ) -> Result<(), ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_run() {
        assert!(Payload::from_run(Vec::new()).is_none());

        let single = Payload::from_run(vec![Message::signal("a")]).unwrap();
        assert_eq!(single, Payload::Single(Message::signal("a")));
        assert!(!single.is_batch());

        let batch = Payload::from_run(vec![Message::signal("a"), Message::signal("b")]).unwrap();
        assert!(batch.is_batch());
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_wire_shapes() {
        let single = serde_json::to_value(Payload::Single(Message::signal("a"))).unwrap();
        assert!(single.is_object());

        let batch = Payload::Batch(vec![Message::signal("a"), Message::signal("b")]);
        let value = serde_json::to_value(&batch).unwrap();
        assert_eq!(value, json!([{"type": "a", "payload": null}, {"type": "b", "payload": null}]));
    }

    #[test]
    fn test_decode_distinguishes_batch_from_single() {
        let batch: Payload = serde_json::from_value(json!([{"type": "a"}, {"type": "b"}])).unwrap();
        assert_eq!(batch.into_messages().len(), 2);

        let single: Payload = serde_json::from_value(json!({"type": "a", "payload": 1})).unwrap();
        assert_eq!(single, Payload::Single(Message::new("a", json!(1))));
    }
}
