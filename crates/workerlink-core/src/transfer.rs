//! Exclusive resource handles that move between contexts instead of being copied.
//!
//! A [`TransferHandle`] is deliberately not `Clone`: the only way to hand it to
//! the other context is to move it into a [`TransferSet`], move the set onto an
//! envelope, and let the outbound buffer move it into exactly one send call.

use thiserror::Error;
use uuid::Uuid;

/// Misuse of the transfer annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransferError {
    /// A transfer set must hold at least one handle.
    #[error("transfer set must contain at least one handle")]
    EmptyTransferSet,

    /// The envelope already carries a transfer set.
    #[error("envelope already carries a transfer set")]
    AlreadyAttached,

    /// The transfer set was already taken from this envelope.
    #[error("transfer set was already taken")]
    AlreadyTaken,

    /// The envelope never carried a transfer set.
    #[error("envelope carries no transfer set")]
    NoTransferSet,
}

/// An owned, exclusively transferable buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct TransferHandle {
    id: Uuid,
    bytes: Vec<u8>,
}

impl TransferHandle {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bytes,
        }
    }

    /// Allocate a zero-filled buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Give up the handle and keep the underlying buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<Vec<u8>> for TransferHandle {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// A non-empty, ordered sequence of handles travelling with one message.
#[derive(Debug, PartialEq, Eq)]
pub struct TransferSet {
    handles: Vec<TransferHandle>,
}

impl TransferSet {
    pub fn new(handles: Vec<TransferHandle>) -> Result<Self, TransferError> {
        if handles.is_empty() {
            return Err(TransferError::EmptyTransferSet);
        }
        Ok(Self { handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Always false; kept for the `len`/`is_empty` pair.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Total size of all buffers in bytes.
    pub fn byte_len(&self) -> usize {
        self.handles.iter().map(TransferHandle::len).sum()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.handles.iter().map(TransferHandle::id).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TransferHandle> {
        self.handles.iter()
    }

    pub fn into_handles(self) -> Vec<TransferHandle> {
        self.handles
    }
}

impl IntoIterator for TransferSet {
    type Item = TransferHandle;
    type IntoIter = std::vec::IntoIter<TransferHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.handles.into_iter()
    }
}
