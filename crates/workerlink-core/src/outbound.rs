//! Time-windowed outbound batching.
//!
//! Locally produced envelopes are queued by [`OutboundBuffer::enqueue`] and
//! leave on a fixed cadence. Each drain removes one *segment* from the front
//! of the queue: the run of plain messages up to the first transfer-bearing
//! envelope, plus that envelope. The run goes out in one send (a bare message
//! when it has length one, a list otherwise) and the transfer-bearing
//! envelope goes out alone with its handles. Order is strictly FIFO.
//!
//! Delivery is at-most-once: a failed send is logged and its messages are
//! dropped, never requeued.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::channel::{Channel, Payload};
use crate::envelope::Envelope;
use crate::error::LinkError;
use crate::message::Message;
use crate::transfer::TransferSet;

/// What one drain did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Channel calls that succeeded.
    pub sends: usize,
    /// Messages accepted by the channel.
    pub delivered: usize,
    /// Handles moved to the other context.
    pub transferred: usize,
    /// Messages lost to send failures or a concurrent shutdown.
    pub dropped: usize,
    /// The buffer was shut down; nothing was attempted.
    pub stopped: bool,
}

impl DrainReport {
    fn stopped() -> Self {
        Self {
            stopped: true,
            ..Default::default()
        }
    }

    /// True when the drain found nothing to do.
    pub fn is_idle(&self) -> bool {
        self.sends == 0 && self.dropped == 0 && !self.stopped
    }
}

/// The front of the queue removed by one drain.
#[derive(Debug, Default)]
struct Segment {
    run: Vec<Message>,
    transfer: Option<(Message, TransferSet)>,
}

/// Pop plain envelopes until the first transfer-bearing one, which is popped
/// too and ends the segment.
fn take_segment(pending: &mut VecDeque<Envelope>) -> Segment {
    let mut run = Vec::new();
    while let Some(mut envelope) = pending.pop_front() {
        match envelope.take_transfer_set() {
            Ok(set) => {
                return Segment {
                    run,
                    transfer: Some((envelope.into_message(), set)),
                }
            }
            Err(_) => run.push(envelope.into_message()),
        }
    }
    Segment {
        run,
        transfer: None,
    }
}

/// Clears the draining flag even if a channel panics mid-send.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Per-channel queue of outbound envelopes with its drain ticker.
pub struct OutboundBuffer {
    name: String,
    channel: Arc<dyn Channel>,
    pending: Mutex<VecDeque<Envelope>>,
    active: AtomicBool,
    draining: AtomicBool,
    stop: CancellationToken,
}

impl OutboundBuffer {
    /// Create a buffer without a ticker; the owner calls [`drain`](Self::drain).
    pub fn new(name: impl Into<String>, channel: Arc<dyn Channel>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            channel,
            pending: Mutex::new(VecDeque::new()),
            active: AtomicBool::new(true),
            draining: AtomicBool::new(false),
            stop: CancellationToken::new(),
        })
    }

    /// Create a buffer and start draining it every `period` on the current
    /// tokio runtime. The first drain happens one period after start.
    pub fn start(
        name: impl Into<String>,
        channel: Arc<dyn Channel>,
        period: Duration,
    ) -> Result<Arc<Self>, LinkError> {
        if period.is_zero() {
            return Err(LinkError::InvalidTickInterval);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| LinkError::NoRuntime)?;
        let buffer = Self::new(name, channel);
        let weak = Arc::downgrade(&buffer);
        let stop = buffer.stop.clone();
        debug!(
            buffer = %buffer.name,
            period_ms = period.as_millis() as u64,
            "Starting outbound ticker"
        );
        runtime.spawn(Self::tick_loop(weak, stop, period));
        Ok(buffer)
    }

    async fn tick_loop(buffer: Weak<Self>, stop: CancellationToken, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = interval.tick() => {}
            }
            let Some(buffer) = buffer.upgrade() else { break };
            buffer.drain();
        }
        trace!("Outbound ticker stopped");
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue an envelope for the next drain. Never blocks.
    ///
    /// Safe to call from inside a send or any callback a drain triggers.
    /// After [`shutdown`](Self::shutdown) the envelope is discarded.
    pub fn enqueue(&self, envelope: Envelope) {
        let mut pending = self.lock();
        // Checked under the lock so a concurrent shutdown cannot strand it.
        if !self.is_active() {
            drop(pending);
            debug!(
                buffer = %self.name,
                message_type = %envelope.message_type(),
                "Discarding message enqueued after shutdown"
            );
            return;
        }
        pending.push_back(envelope);
    }

    /// Run one drain cycle.
    ///
    /// A drain that is already running (on the ticker or further up the same
    /// call stack) makes this call a no-op.
    pub fn drain(&self) -> DrainReport {
        if !self.is_active() {
            return DrainReport::stopped();
        }
        if self.draining.swap(true, Ordering::AcqRel) {
            trace!(buffer = %self.name, "Drain already in progress");
            return DrainReport::default();
        }
        let _guard = DrainGuard(&self.draining);
        self.drain_segment()
    }

    fn drain_segment(&self) -> DrainReport {
        // The lock is released before any send so callbacks may enqueue.
        let segment = take_segment(&mut self.lock());
        let mut report = DrainReport::default();

        if let Some(payload) = Payload::from_run(segment.run) {
            let count = payload.len();
            match self.channel.post(payload) {
                Ok(()) => {
                    report.sends += 1;
                    report.delivered += count;
                }
                Err(e) => {
                    error!(
                        buffer = %self.name,
                        messages = count,
                        error = %e,
                        "Failed to post batch"
                    );
                    report.dropped += count;
                }
            }
        }

        if let Some((message, set)) = segment.transfer {
            if !self.is_active() {
                debug!(buffer = %self.name, "Shut down mid-drain, discarding transfer message");
                report.dropped += 1;
                return report;
            }
            let handles = set.len();
            let message_type = message.message_type.clone();
            match self.channel.post_with_transfer(Payload::Single(message), set) {
                Ok(()) => {
                    report.sends += 1;
                    report.delivered += 1;
                    report.transferred += handles;
                }
                Err(e) => {
                    error!(
                        buffer = %self.name,
                        message_type = %message_type,
                        handles,
                        error = %e,
                        "Failed to post transfer message"
                    );
                    report.dropped += 1;
                }
            }
        }

        if !report.is_idle() {
            trace!(buffer = %self.name, ?report, "Drained");
        }
        report
    }

    /// Stop the ticker for good and discard pending envelopes. Idempotent.
    pub fn shutdown(&self) {
        let discarded = {
            let mut pending = self.lock();
            if !self.active.swap(false, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *pending)
        };
        self.stop.cancel();
        debug!(buffer = %self.name, discarded = discarded.len(), "Outbound buffer shut down");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Number of pending envelopes.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Envelope>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for OutboundBuffer {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelError;
    use crate::transfer::TransferHandle;
    use serde_json::json;

    type Sent = (Payload, Option<Vec<uuid::Uuid>>);

    /// Records every send; optionally fails or panics on them.
    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<Sent>>,
        fail_post: AtomicBool,
        fail_transfer: AtomicBool,
        panic_post: AtomicBool,
    }

    impl RecordingChannel {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn fail_all(&self, fail: bool) {
            self.fail_post.store(fail, Ordering::SeqCst);
            self.fail_transfer.store(fail, Ordering::SeqCst);
        }
    }

    impl Channel for RecordingChannel {
        fn post(&self, payload: Payload) -> Result<(), ChannelError> {
            if self.panic_post.load(Ordering::SeqCst) {
                panic!("channel exploded");
            }
            if self.fail_post.load(Ordering::SeqCst) {
                return Err(ChannelError::Disconnected);
            }
            self.sent.lock().unwrap().push((payload, None));
            Ok(())
        }

        fn post_with_transfer(
            &self,
            payload: Payload,
            transfer: TransferSet,
        ) -> Result<(), ChannelError> {
            if self.fail_transfer.load(Ordering::SeqCst) {
                return Err(ChannelError::Disconnected);
            }
            self.sent.lock().unwrap().push((payload, Some(transfer.ids())));
            Ok(())
        }
    }

    fn plain(name: &str) -> Envelope {
        Envelope::new(Message::signal(name))
    }

    fn with_handle(name: &str) -> (Envelope, uuid::Uuid) {
        let handle = TransferHandle::zeroed(4);
        let id = handle.id();
        let envelope = Envelope::new(Message::signal(name)).with_transfer(vec![handle]).unwrap();
        (envelope, id)
    }

    fn setup() -> (Arc<RecordingChannel>, Arc<OutboundBuffer>) {
        let channel = Arc::new(RecordingChannel::default());
        let buffer = OutboundBuffer::new("test", channel.clone());
        (channel, buffer)
    }

    #[test]
    fn test_take_segment_stops_after_transfer() {
        let mut pending = VecDeque::new();
        pending.push_back(plain("a"));
        pending.push_back(with_handle("t").0);
        pending.push_back(plain("b"));

        let segment = take_segment(&mut pending);
        assert_eq!(segment.run, vec![Message::signal("a")]);
        assert_eq!(segment.transfer.map(|(m, _)| m), Some(Message::signal("t")));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_empty_drain_is_idle() {
        let (channel, buffer) = setup();
        let report = buffer.drain();
        assert!(report.is_idle());
        assert!(channel.sent().is_empty());
    }

    #[test]
    fn test_single_message_is_sent_bare() {
        let (channel, buffer) = setup();
        buffer.enqueue(Envelope::new(Message::new("a", json!(1))));
        buffer.drain();
        assert_eq!(channel.sent(), vec![(Payload::Single(Message::new("a", json!(1))), None)]);
    }

    #[test]
    fn test_plain_messages_batched_in_order() {
        let (channel, buffer) = setup();
        for name in ["a", "b", "c"] {
            buffer.enqueue(plain(name));
        }
        assert_eq!(buffer.len(), 3);

        let report = buffer.drain();
        assert_eq!(report.sends, 1);
        assert_eq!(report.delivered, 3);
        assert!(buffer.is_empty());
        assert_eq!(
            channel.sent()[0].0,
            Payload::Batch(vec![Message::signal("a"), Message::signal("b"), Message::signal("c")])
        );
    }

    #[test]
    fn test_mixed_scenario() {
        let (channel, buffer) = setup();
        let (t, h1) = with_handle("t");
        buffer.enqueue(plain("a"));
        buffer.enqueue(plain("b"));
        buffer.enqueue(t);
        buffer.enqueue(plain("c"));

        let report = buffer.drain();
        assert_eq!(report.sends, 2);
        assert_eq!(report.transferred, 1);
        assert_eq!(buffer.len(), 1);

        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        let batch = Payload::Batch(vec![Message::signal("a"), Message::signal("b")]);
        assert_eq!(sent[0], (batch, None));
        assert_eq!(sent[1], (Payload::Single(Message::signal("t")), Some(vec![h1])));

        buffer.drain();
        let sent = channel.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2], (Payload::Single(Message::signal("c")), None));
    }

    #[test]
    fn test_consecutive_transfers_sent_separately() {
        let (channel, buffer) = setup();
        let (t1, h1) = with_handle("t1");
        let (t2, h2) = with_handle("t2");
        buffer.enqueue(t1);
        buffer.enqueue(t2);

        buffer.drain();
        buffer.drain();
        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], (Payload::Single(Message::signal("t1")), Some(vec![h1])));
        assert_eq!(sent[1], (Payload::Single(Message::signal("t2")), Some(vec![h2])));
    }

    #[test]
    fn test_failed_send_is_not_retried() {
        let (channel, buffer) = setup();
        buffer.enqueue(plain("a"));
        buffer.enqueue(plain("b"));
        channel.fail_all(true);

        let report = buffer.drain();
        assert_eq!(report.dropped, 2);
        assert_eq!(report.sends, 0);
        assert!(buffer.is_empty());

        channel.fail_all(false);
        assert!(buffer.drain().is_idle());
        assert!(channel.sent().is_empty());
    }

    #[test]
    fn test_failed_transfer_send_is_dropped() {
        let (channel, buffer) = setup();
        let (t, _) = with_handle("t");
        buffer.enqueue(plain("a"));
        buffer.enqueue(t);
        buffer.enqueue(plain("c"));
        channel.fail_transfer.store(true, Ordering::SeqCst);

        let report = buffer.drain();
        assert_eq!(report.sends, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.transferred, 0);
        assert_eq!(report.dropped, 1);
        assert_eq!(buffer.len(), 1);
        assert_eq!(channel.sent(), vec![(Payload::Single(Message::signal("a")), None)]);

        channel.fail_transfer.store(false, Ordering::SeqCst);
        let report = buffer.drain();
        assert_eq!(report.sends, 1);
        assert!(buffer.is_empty());

        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], (Payload::Single(Message::signal("c")), None));
        assert!(sent.iter().all(|(_, transfer)| transfer.is_none()));
    }

    #[test]
    fn test_failed_batch_still_sends_transfer() {
        let (channel, buffer) = setup();
        let (t, h1) = with_handle("t");
        buffer.enqueue(plain("a"));
        buffer.enqueue(plain("b"));
        buffer.enqueue(t);
        channel.fail_post.store(true, Ordering::SeqCst);

        let report = buffer.drain();
        assert_eq!(report.sends, 1);
        assert_eq!(report.dropped, 2);
        assert_eq!(report.transferred, 1);
        assert!(buffer.is_empty());
        assert_eq!(
            channel.sent(),
            vec![(Payload::Single(Message::signal("t")), Some(vec![h1]))]
        );
    }

    #[test]
    fn test_panicking_channel_does_not_wedge_drain() {
        let (channel, buffer) = setup();
        buffer.enqueue(plain("a"));
        channel.panic_post.store(true, Ordering::SeqCst);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| buffer.drain()));
        assert!(outcome.is_err());

        channel.panic_post.store(false, Ordering::SeqCst);
        buffer.enqueue(plain("b"));
        let report = buffer.drain();
        assert_eq!(report.sends, 1);
        assert_eq!(channel.sent(), vec![(Payload::Single(Message::signal("b")), None)]);
    }

    #[test]
    fn test_concurrent_enqueue_and_shutdown_leave_nothing_behind() {
        for _ in 0..50 {
            let (_channel, buffer) = setup();
            let producers: Vec<_> = (0..4)
                .map(|_| {
                    let buffer = Arc::clone(&buffer);
                    std::thread::spawn(move || {
                        for _ in 0..200 {
                            buffer.enqueue(plain("x"));
                        }
                    })
                })
                .collect();
            buffer.shutdown();
            for producer in producers {
                producer.join().unwrap();
            }
            assert!(buffer.is_empty());
        }
    }

    #[test]
    fn test_shutdown_discards_and_stops() {
        let (channel, buffer) = setup();
        buffer.enqueue(plain("a"));
        buffer.shutdown();
        buffer.shutdown();

        assert!(!buffer.is_active());
        assert!(buffer.is_empty());
        assert!(buffer.drain().stopped);

        buffer.enqueue(plain("late"));
        assert!(buffer.is_empty());
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_start_requires_nonzero_period() {
        let channel = Arc::new(RecordingChannel::default());
        let result = OutboundBuffer::start("test", channel, Duration::ZERO);
        assert!(matches!(result, Err(LinkError::InvalidTickInterval)));
    }

    #[test]
    fn test_start_outside_runtime() {
        let channel = Arc::new(RecordingChannel::default());
        let result = OutboundBuffer::start("test", channel, Duration::from_millis(33));
        assert!(matches!(result, Err(LinkError::NoRuntime)));
    }
}
