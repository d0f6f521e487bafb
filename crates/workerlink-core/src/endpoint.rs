//! One side of a link: store, outbound buffer and inbound task wired together.
//!
//! The controller and the worker run the same endpoint. The only asymmetry is
//! that error events (which only the worker side produces) arrive at the
//! controller and are dispatched as messages with the reserved error type.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};
use workerlink_config::LinkSettings;

use crate::boundary::BoundaryFilter;
use crate::envelope::Envelope;
use crate::error::LinkError;
use crate::inbound;
use crate::link::Link;
use crate::message::error_message;
use crate::outbound::OutboundBuffer;
use crate::port::{Port, PortEvent, PortReceiver, PortSender, Side};
use crate::store::{Reducer, Store};
use crate::worker_host::panic_message;

/// A running link endpoint.
pub struct Endpoint<S> {
    side: Side,
    store: Store<S>,
    link: Arc<Link>,
    sender: PortSender,
    inbound: Mutex<Option<JoinHandle<()>>>,
    inbound_abort: AbortHandle,
}

impl<S: Send + 'static> Endpoint<S> {
    /// Start an endpoint on the current tokio runtime using `settings`.
    pub fn start<R>(
        port: Port,
        reducer: R,
        initial: S,
        settings: &LinkSettings,
    ) -> Result<Self, LinkError>
    where
        R: Reducer<S> + 'static,
    {
        Self::start_with_filter(
            port,
            reducer,
            initial,
            settings.tick_interval(),
            BoundaryFilter::from_settings(settings),
        )
    }

    /// Start an endpoint with an explicit drain period and boundary filter.
    pub fn start_with_filter<R>(
        port: Port,
        reducer: R,
        initial: S,
        tick: Duration,
        filter: BoundaryFilter,
    ) -> Result<Self, LinkError>
    where
        R: Reducer<S> + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| LinkError::NoRuntime)?;
        let side = port.side();
        let (sender, receiver) = port.into_parts();

        let outbound = OutboundBuffer::start(side.to_string(), Arc::new(sender.clone()), tick)?;
        let link = Arc::new(Link::new(filter, outbound));
        let store = Store::with_link(reducer, initial, Arc::clone(&link));

        let inbound = runtime.spawn(inbound_loop(receiver, store.clone()));
        let inbound_abort = inbound.abort_handle();

        info!(
            side = %side,
            tick_ms = tick.as_millis() as u64,
            filter = ?link.filter(),
            "Endpoint started"
        );

        Ok(Self {
            side,
            store,
            link,
            sender,
            inbound: Mutex::new(Some(inbound)),
            inbound_abort,
        })
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn store(&self) -> &Store<S> {
        &self.store
    }

    /// Dispatch a locally produced envelope into this side's store.
    pub fn dispatch(&self, envelope: impl Into<Envelope>) {
        self.store.dispatch(envelope);
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    /// Envelopes waiting for the next drain.
    pub fn pending_outbound(&self) -> usize {
        self.link.outbound().len()
    }

    pub fn is_active(&self) -> bool {
        self.link.is_active() && !self.sender.is_closed()
    }

    /// Stop forwarding, discard pending output, close the channel in both
    /// directions and stop the inbound task. Idempotent.
    pub fn terminate(&self) {
        if self.link.is_active() {
            info!(side = %self.side, "Terminating endpoint");
        }
        self.link.deactivate();
        self.sender.close();
        self.inbound_abort.abort();
    }

    /// Wait until the inbound stream ends (the channel closed or the peer went
    /// away).
    ///
    /// Returns an error if a reducer or listener panicked while applying an
    /// inbound message. Subsequent calls return immediately.
    pub async fn closed(&self) -> Result<(), LinkError> {
        let handle = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else { return Ok(()) };
        match handle.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => {
                let message = panic_message(e.into_panic().as_ref());
                Err(LinkError::InboundPanicked(message))
            }
        }
    }
}

impl<S> Drop for Endpoint<S> {
    fn drop(&mut self) {
        self.link.deactivate();
        self.sender.close();
        self.inbound_abort.abort();
    }
}

async fn inbound_loop<S: Send + 'static>(mut receiver: PortReceiver, store: Store<S>) {
    let side = receiver.side();
    while let Some(event) = receiver.recv().await {
        match event {
            PortEvent::Delivery(delivery) => {
                for envelope in inbound::expand(delivery) {
                    store.apply_inbound(envelope);
                }
            }
            PortEvent::Error(error) => {
                warn!(side = %side, error = %error, "Remote context reported a failure");
                store.apply_inbound(Envelope::new(error_message(&error)));
            }
        }
    }
    debug!(side = %side, "Inbound stream ended");
}
