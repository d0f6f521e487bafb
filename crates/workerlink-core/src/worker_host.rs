//! Runs a worker context on its own thread with its own event loop.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::thread;

use tracing::{debug, error, warn};

use crate::error::LinkError;
use crate::message::RemoteError;
use crate::port::{ErrorReporter, Port};

/// Handle to a running worker context.
pub struct WorkerHandle {
    name: String,
    thread: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Block until the worker thread exits.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(worker = %self.name, "Worker thread panicked outside its runtime");
            }
        }
    }
}

/// Spawn `body` on a new thread driving a current-thread tokio runtime.
///
/// If the body returns an error or panics, the failure is reported to the
/// controller as an error event on the port's error channel. It never unwinds
/// into the caller.
pub fn spawn_worker<F, Fut>(
    name: impl Into<String>,
    port: Port,
    body: F,
) -> Result<WorkerHandle, LinkError>
where
    F: FnOnce(Port) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + 'static,
{
    let name = name.into();
    let reporter = port.error_reporter();
    let thread_name = name.clone();

    let thread = thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let message = format!("failed to start worker runtime: {}", e);
                    report(&thread_name, reporter.as_ref(), message);
                    return;
                }
            };

            let outcome =
                std::panic::catch_unwind(AssertUnwindSafe(|| runtime.block_on(body(port))));
            match outcome {
                Ok(Ok(())) => debug!(worker = %thread_name, "Worker context finished"),
                Ok(Err(e)) => report(&thread_name, reporter.as_ref(), format!("{:#}", e)),
                Err(panic) => report(
                    &thread_name,
                    reporter.as_ref(),
                    format!("worker panicked: {}", panic_message(panic.as_ref())),
                ),
            }
        })
        .map_err(LinkError::WorkerSpawn)?;

    debug!(worker = %name, "Spawned worker context");
    Ok(WorkerHandle {
        name,
        thread: Some(thread),
    })
}

fn report(worker: &str, reporter: Option<&ErrorReporter>, message: String) {
    error!(worker = %worker, error = %message, "Worker context failed");
    let Some(reporter) = reporter else { return };
    if let Err(e) = reporter.report(RemoteError::new(message)) {
        warn!(worker = %worker, error = %e, "Could not surface worker failure");
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
