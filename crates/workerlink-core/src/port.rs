//! In-process channel connecting a controller context and a worker context.
//!
//! Payloads are copied by encoding them to JSON frames; transfer sets are
//! moved alongside the frame untouched. Each direction is an unbounded tokio
//! queue, so posting never blocks. Closing either port closes both.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelError, Delivery, Payload};
use crate::message::RemoteError;
use crate::transfer::TransferSet;

/// Which context a port belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Controller,
    Worker,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Controller => f.write_str("controller"),
            Side::Worker => f.write_str("worker"),
        }
    }
}

/// What travels through a queue.
enum Wire {
    Frame {
        bytes: Vec<u8>,
        transfer: Option<TransferSet>,
    },
    Error(RemoteError),
}

/// Events observed by a receiving port.
#[derive(Debug)]
pub enum PortEvent {
    /// One channel delivery (a bare message or a batch).
    Delivery(Delivery),
    /// The worker context failed outside any message handler.
    Error(RemoteError),
}

/// Sending half of a port. Cheap to clone.
#[derive(Clone)]
pub struct PortSender {
    side: Side,
    tx: mpsc::UnboundedSender<Wire>,
    closed: CancellationToken,
}

impl PortSender {
    pub fn side(&self) -> Side {
        self.side
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Close the channel in both directions.
    pub fn close(&self) {
        self.closed.cancel();
    }

    fn push(&self, payload: &Payload, transfer: Option<TransferSet>) -> Result<(), ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::Disconnected);
        }
        let bytes = serde_json::to_vec(payload).map_err(ChannelError::Encode)?;
        self.tx
            .send(Wire::Frame { bytes, transfer })
            .map_err(|_| ChannelError::Disconnected)
    }
}

impl Channel for PortSender {
    fn post(&self, payload: Payload) -> Result<(), ChannelError> {
        self.push(&payload, None)
    }

    fn post_with_transfer(
        &self,
        payload: Payload,
        transfer: TransferSet,
    ) -> Result<(), ChannelError> {
        self.push(&payload, Some(transfer))
    }
}

/// Receiving half of a port.
pub struct PortReceiver {
    side: Side,
    rx: mpsc::UnboundedReceiver<Wire>,
    closed: CancellationToken,
}

impl PortReceiver {
    pub fn side(&self) -> Side {
        self.side
    }

    /// Wait for the next event. Returns `None` once the channel is closed or
    /// the other context is gone.
    ///
    /// Frames that fail to decode are logged and skipped.
    pub async fn recv(&mut self) -> Option<PortEvent> {
        loop {
            let wire = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return None,
                wire = self.rx.recv() => wire?,
            };
            match wire {
                Wire::Frame { bytes, transfer } => match serde_json::from_slice::<Payload>(&bytes) {
                    Ok(payload) => return Some(PortEvent::Delivery(Delivery { payload, transfer })),
                    Err(e) => {
                        let error = ChannelError::Decode(e);
                        warn!(side = %self.side, error = %error, "Dropping undecodable frame");
                    }
                },
                Wire::Error(error) => return Some(PortEvent::Error(error)),
            }
        }
    }

    /// Close the channel in both directions.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

/// Surfaces worker failures to the controller as error events.
#[derive(Clone)]
pub struct ErrorReporter {
    tx: mpsc::UnboundedSender<Wire>,
    closed: CancellationToken,
}

impl ErrorReporter {
    pub fn report(&self, error: RemoteError) -> Result<(), ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::Disconnected);
        }
        self.tx
            .send(Wire::Error(error))
            .map_err(|_| ChannelError::Disconnected)
    }
}

/// One end of an in-process channel.
pub struct Port {
    sender: PortSender,
    receiver: PortReceiver,
}

/// Create a connected `(controller, worker)` port pair.
pub fn port_pair() -> (Port, Port) {
    let closed = CancellationToken::new();
    let (to_worker, worker_rx) = mpsc::unbounded_channel();
    let (to_controller, controller_rx) = mpsc::unbounded_channel();

    let controller = Port {
        sender: PortSender {
            side: Side::Controller,
            tx: to_worker,
            closed: closed.clone(),
        },
        receiver: PortReceiver {
            side: Side::Controller,
            rx: controller_rx,
            closed: closed.clone(),
        },
    };
    let worker = Port {
        sender: PortSender {
            side: Side::Worker,
            tx: to_controller,
            closed: closed.clone(),
        },
        receiver: PortReceiver {
            side: Side::Worker,
            rx: worker_rx,
            closed,
        },
    };
    debug!("Created port pair");
    (controller, worker)
}

impl Port {
    pub fn side(&self) -> Side {
        self.sender.side
    }

    /// A clone of the sending half.
    pub fn sender(&self) -> PortSender {
        self.sender.clone()
    }

    /// Error reporter for the worker side; `None` on the controller side.
    pub fn error_reporter(&self) -> Option<ErrorReporter> {
        match self.side() {
            Side::Worker => Some(ErrorReporter {
                tx: self.sender.tx.clone(),
                closed: self.sender.closed.clone(),
            }),
            Side::Controller => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Close the channel in both directions.
    pub fn close(&self) {
        self.sender.close();
    }

    pub fn into_parts(self) -> (PortSender, PortReceiver) {
        (self.sender, self.receiver)
    }
}
