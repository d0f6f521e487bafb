//! workerlink - batched message transport between two isolated contexts.
//!
//! A controller context and a worker context each own a [`Store`] and talk
//! over a [`Channel`] that copies payloads and moves transferable handles.
//! Outbound traffic is coalesced by an [`OutboundBuffer`] that drains on a
//! fixed tick; the receiving side expands batches back into single messages.
//!
//! # Architecture
//!
//! - `Envelope`: a `Message` plus its boundary tag and optional `TransferSet`
//! - `BoundaryFilter`: decides which local dispatches cross
//! - `OutboundBuffer`: FIFO queue, drain algorithm and ticker
//! - `inbound::expand`: turns a delivery back into envelopes
//! - `Endpoint`: store + link + inbound task for one side
//! - `spawn_worker`: runs a worker context on its own thread and runtime
//!
//! # Example
//!
//! ```no_run
//! use workerlink_core::{port_pair, spawn_worker, Creator, Endpoint, Envelope};
//! use workerlink_config::LinkSettings;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (controller_port, worker_port) = port_pair();
//!
//! let worker = spawn_worker("worker", worker_port, |port| async move {
//!     let settings = LinkSettings::default();
//!     let endpoint = Endpoint::start(port, |_: &mut (), _: &mut Envelope| {}, (), &settings)?;
//!     endpoint.closed().await?;
//!     Ok::<_, anyhow::Error>(())
//! })?;
//!
//! let controller = Endpoint::start(
//!     controller_port,
//!     |count: &mut usize, _: &mut Envelope| *count += 1,
//!     0usize,
//!     &LinkSettings::default(),
//! )?;
//! controller.dispatch(Creator::crossing("work/start").create(serde_json::json!({"n": 1})));
//!
//! controller.terminate();
//! worker.join();
//! # Ok(())
//! # }
//! ```

pub mod boundary;
pub mod channel;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod inbound;
pub mod link;
pub mod message;
pub mod outbound;
pub mod port;
pub mod store;
pub mod transfer;
pub mod worker_host;

// Re-exports for convenient access
pub use boundary::BoundaryFilter;
pub use channel::{Channel, ChannelError, Delivery, Payload};
pub use endpoint::Endpoint;
pub use envelope::{Creator, Envelope};
pub use error::LinkError;
pub use link::Link;
pub use message::{error_message, is_error_message, Message, RemoteError, REMOTE_ERROR_TYPE};
pub use outbound::{DrainReport, OutboundBuffer};
pub use port::{port_pair, ErrorReporter, Port, PortEvent, PortReceiver, PortSender, Side};
pub use store::{Listener, Reducer, Store};
pub use transfer::{TransferError, TransferHandle, TransferSet};
pub use worker_host::{spawn_worker, WorkerHandle};
