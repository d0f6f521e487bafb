//! Envelopes: a message plus the out-of-band markers that decide how it travels.

use crate::message::Message;
use crate::transfer::{TransferError, TransferHandle, TransferSet};

/// Where an envelope's transfer set currently is.
#[derive(Debug, Default)]
enum TransferSlot {
    #[default]
    Absent,
    Attached(TransferSet),
    Taken,
}

/// A message together with its boundary tag and optional transfer set.
///
/// Not `Clone`: cloning an envelope would duplicate its handles.
#[derive(Debug)]
pub struct Envelope {
    message: Message,
    crossing: bool,
    transfer: TransferSlot,
}

impl Envelope {
    /// Wrap a message that stays local unless the filter forwards everything.
    pub fn new(message: Message) -> Self {
        Self {
            message,
            crossing: false,
            transfer: TransferSlot::Absent,
        }
    }

    /// Wrap a message marked to cross the boundary.
    pub fn crossing(message: Message) -> Self {
        Self::new(message).mark_crossing()
    }

    /// Mark this envelope to cross the boundary.
    pub fn mark_crossing(mut self) -> Self {
        self.crossing = true;
        self
    }

    pub fn is_crossing(&self) -> bool {
        self.crossing
    }

    /// Attach a transfer set built from `handles`.
    ///
    /// Consumes the envelope and returns the annotated one; the message itself
    /// is untouched.
    pub fn with_transfer(mut self, handles: Vec<TransferHandle>) -> Result<Self, TransferError> {
        match self.transfer {
            TransferSlot::Absent => {}
            TransferSlot::Attached(_) => return Err(TransferError::AlreadyAttached),
            TransferSlot::Taken => return Err(TransferError::AlreadyTaken),
        }
        self.transfer = TransferSlot::Attached(TransferSet::new(handles)?);
        Ok(self)
    }

    /// Attach an already built transfer set.
    pub(crate) fn with_transfer_set(mut self, set: TransferSet) -> Self {
        debug_assert!(matches!(self.transfer, TransferSlot::Absent));
        self.transfer = TransferSlot::Attached(set);
        self
    }

    pub fn has_transfer_set(&self) -> bool {
        matches!(self.transfer, TransferSlot::Attached(_))
    }

    /// Move the transfer set out of the envelope. Succeeds at most once.
    pub fn take_transfer_set(&mut self) -> Result<TransferSet, TransferError> {
        match std::mem::take(&mut self.transfer) {
            TransferSlot::Attached(set) => {
                self.transfer = TransferSlot::Taken;
                Ok(set)
            }
            TransferSlot::Taken => {
                self.transfer = TransferSlot::Taken;
                Err(TransferError::AlreadyTaken)
            }
            TransferSlot::Absent => Err(TransferError::NoTransferSet),
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_type(&self) -> &str {
        &self.message.message_type
    }

    /// Drop the markers and keep the message. Any attached handles are released.
    pub fn into_message(self) -> Message {
        self.message
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        Envelope::new(message)
    }
}

/// Builds messages of one type, optionally marked to cross the boundary.
#[derive(Debug, Clone)]
pub struct Creator {
    message_type: String,
    crossing: bool,
}

impl Creator {
    /// Creator for messages that are forwarded to the other context.
    pub fn crossing(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            crossing: true,
        }
    }

    /// Creator for messages that stay in the local store.
    pub fn local(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            crossing: false,
        }
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn create(&self, payload: serde_json::Value) -> Envelope {
        self.wrap(Message::new(self.message_type.clone(), payload))
    }

    pub fn create_with_meta(
        &self,
        payload: serde_json::Value,
        meta: serde_json::Value,
    ) -> Envelope {
        self.wrap(Message::new(self.message_type.clone(), payload).with_meta(meta))
    }

    fn wrap(&self, message: Message) -> Envelope {
        let envelope = Envelope::new(message);
        if self.crossing {
            envelope.mark_crossing()
        } else {
            envelope
        }
    }
}
