//! Crate-level error type.

use thiserror::Error;

/// Errors raised while wiring or running a link endpoint.
///
/// Send failures never surface here: the outbound buffer logs and drops them.
#[derive(Debug, Error)]
pub enum LinkError {
    /// A ticker or inbound task was requested outside a tokio runtime.
    #[error("no tokio runtime is running on this thread")]
    NoRuntime,

    /// The drain period must be non-zero.
    #[error("tick interval must be greater than zero")]
    InvalidTickInterval,

    /// A reducer or listener panicked while applying an inbound message.
    #[error("inbound task panicked: {0}")]
    InboundPanicked(String),

    /// The worker thread or its runtime could not be created.
    #[error("failed to spawn worker context: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}
