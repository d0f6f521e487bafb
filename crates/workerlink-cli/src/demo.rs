//! End-to-end demo: a controller hands work items to a worker context and
//! collects the replies.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use workerlink_config::{Config, LinkSettings};
use workerlink_core::{
    is_error_message, port_pair, spawn_worker, Creator, Endpoint, Envelope, Message, Port,
    TransferHandle,
};

pub const WORK_TYPE: &str = "demo/work";
pub const RESULT_TYPE: &str = "demo/result";

/// Knobs for [`run_demo`].
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Work items the controller sends.
    pub messages: usize,
    /// Every n-th reply carries a transferred buffer. Zero disables transfers.
    pub transfer_every: usize,
    /// Size of each transferred buffer.
    pub payload_bytes: usize,
    /// Upper bound on how long to wait for replies.
    pub settle: Duration,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            messages: 100,
            transfer_every: 10,
            payload_bytes: 4096,
            settle: Duration::from_millis(2000),
        }
    }
}

/// What the controller observed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DemoSummary {
    pub sent: usize,
    pub replies: usize,
    /// Replies whose sequence numbers arrived out of order.
    pub out_of_order: usize,
    pub buffers: usize,
    pub bytes: usize,
    pub errors: Vec<String>,
}

impl DemoSummary {
    fn record(&mut self, envelope: &mut Envelope) {
        let message = envelope.message();
        if is_error_message(message) {
            let text = message.payload["message"].as_str().unwrap_or("unknown error");
            self.errors.push(text.to_string());
            return;
        }
        if !message.is(RESULT_TYPE) {
            return;
        }
        let seq = message.payload["seq"].as_u64().unwrap_or(u64::MAX);
        if seq != self.replies as u64 {
            self.out_of_order += 1;
        }
        self.replies += 1;
        if let Ok(set) = envelope.take_transfer_set() {
            self.buffers += set.len();
            self.bytes += set.byte_len();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.replies >= self.sent
    }
}

/// Run the demo on the current runtime and return what the controller saw.
pub async fn run_demo(config: &Config, options: &DemoOptions) -> Result<DemoSummary> {
    let (controller_port, worker_port) = port_pair();

    let worker_settings = config.worker.clone();
    let worker_options = options.clone();
    let worker = spawn_worker("workerlink-demo", worker_port, move |port| async move {
        worker_main(port, &worker_settings, &worker_options).await
    })?;

    let controller = Endpoint::start(
        controller_port,
        |summary: &mut DemoSummary, envelope: &mut Envelope| summary.record(envelope),
        DemoSummary::default(),
        &config.controller,
    )?;

    let work = Creator::crossing(WORK_TYPE);
    let started = Instant::now();
    for seq in 0..options.messages {
        controller.dispatch(work.create(json!({ "seq": seq })));
    }
    let sent = options.messages;
    info!(messages = sent, "Work dispatched");

    let deadline = started + options.settle;
    let poll = config.controller.tick_interval();
    loop {
        let done = controller.store().with_state(|s| s.replies >= sent || !s.errors.is_empty());
        if done || Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(poll).await;
    }

    let mut summary = controller.store().state();
    summary.sent = sent;
    if !summary.is_complete() {
        warn!(
            expected = sent,
            received = summary.replies,
            "Not every reply arrived before the settle deadline"
        );
    }
    info!(
        replies = summary.replies,
        buffers = summary.buffers,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Demo finished"
    );

    controller.terminate();
    tokio::task::spawn_blocking(move || worker.join())
        .await
        .context("worker join task failed")?;
    controller.closed().await?;

    Ok(summary)
}

async fn worker_main(port: Port, settings: &LinkSettings, options: &DemoOptions) -> Result<()> {
    let endpoint = Endpoint::start(port, |_: &mut (), _: &mut Envelope| {}, (), settings)?;

    let store = endpoint.store().clone();
    let reply = Creator::crossing(RESULT_TYPE);
    let transfer_every = options.transfer_every;
    let payload_bytes = options.payload_bytes;
    endpoint.store().subscribe(move |message: &Message| {
        if !message.is(WORK_TYPE) {
            return;
        }
        let seq = message.payload["seq"].as_u64().unwrap_or(0);
        let envelope = reply.create(json!({ "seq": seq }));
        if transfer_every > 0 && (seq + 1) % transfer_every as u64 == 0 {
            match envelope.with_transfer(vec![TransferHandle::zeroed(payload_bytes)]) {
                Ok(envelope) => store.dispatch(envelope),
                Err(e) => warn!(seq, error = %e, "Could not attach buffer"),
            }
        } else {
            store.dispatch(envelope);
        }
    });

    debug!("Demo worker ready");
    endpoint.closed().await?;
    Ok(())
}
