//! Routes locally dispatched envelopes into the outbound buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::boundary::BoundaryFilter;
use crate::envelope::Envelope;
use crate::outbound::OutboundBuffer;

/// Boundary filter plus outbound buffer for one side of the channel.
pub struct Link {
    filter: BoundaryFilter,
    outbound: Arc<OutboundBuffer>,
    active: AtomicBool,
}

impl Link {
    pub fn new(filter: BoundaryFilter, outbound: Arc<OutboundBuffer>) -> Self {
        Self {
            filter,
            outbound,
            active: AtomicBool::new(true),
        }
    }

    /// Forward `envelope` if the filter lets it cross and return the envelope
    /// the local reducer should see.
    ///
    /// A forwarded envelope keeps its transfer set; the local copy carries the
    /// same message without handles.
    pub fn route(&self, envelope: Envelope) -> Envelope {
        if !self.is_active() || !self.filter.should_cross(&envelope) {
            return envelope;
        }
        let local = Envelope::new(envelope.message().clone());
        trace!(
            message_type = %envelope.message_type(),
            transfer = envelope.has_transfer_set(),
            "Forwarding message"
        );
        self.outbound.enqueue(envelope);
        local
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop forwarding and shut the outbound buffer down. Idempotent.
    pub fn deactivate(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            debug!(buffer = %self.outbound.name(), "Deactivating link");
            self.outbound.shutdown();
        }
    }

    pub fn filter(&self) -> &BoundaryFilter {
        &self.filter
    }

    pub fn outbound(&self) -> &Arc<OutboundBuffer> {
        &self.outbound
    }
}
