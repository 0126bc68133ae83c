//! Inference execution unit
//!
//! The unit runs on its own OS thread so model loading and inference never
//! block the async runtime. It announces itself with a single `Ready` message,
//! then handles requests strictly one at a time in arrival order. Every request
//! ends with exactly one `Done` or `Error`, including when the inference
//! provider panics.

use crate::{
    config::WorkerConfig,
    error::{BgRemovalError, Result},
    inference::InferenceProvider,
    processor::BackgroundRemovalProcessor,
    protocol::{WorkerMessage, WorkerRequest},
    services::ChannelProgressReporter,
    tracing_config::spans,
};
use log::{debug, warn};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Handle to a running execution unit
///
/// Dropping the handle closes the request channel, after which the unit
/// finishes its queue and exits.
#[derive(Debug)]
pub struct WorkerHandle {
    requests: UnboundedSender<WorkerRequest>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a new execution unit thread
    ///
    /// All messages the unit emits, starting with `Ready`, are sent to
    /// `events`. If the provider fails to initialize, the unit exits without
    /// sending anything.
    ///
    /// # Errors
    /// Returns [`BgRemovalError::Worker`] when the OS refuses to create the
    /// thread.
    pub fn spawn(
        provider: Arc<dyn InferenceProvider>,
        config: &WorkerConfig,
        events: UnboundedSender<WorkerMessage>,
    ) -> Result<Self> {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let processor = BackgroundRemovalProcessor::new(provider, config);

        let thread = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run_unit(processor, request_rx, &events))
            .map_err(|e| {
                BgRemovalError::worker(format!("Failed to spawn execution unit thread: {}", e))
            })?;

        Ok(Self {
            requests,
            thread: Some(thread),
        })
    }

    /// Queue a request for the unit
    ///
    /// # Errors
    /// Returns [`BgRemovalError::Worker`] if the unit has stopped.
    pub fn send(&self, request: WorkerRequest) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|e| BgRemovalError::worker(format!("Execution unit is not running ({})", e.0.id)))
    }

    /// Whether the unit thread is still accepting requests
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.requests.is_closed()
    }

    /// Close the request channel and wait for queued requests to finish
    ///
    /// Blocks the calling thread; call from `spawn_blocking` inside a runtime.
    pub fn shutdown(mut self) {
        let thread = self.thread.take();
        drop(self);
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!("Execution unit thread terminated abnormally");
            }
        }
    }
}

fn run_unit(
    mut processor: BackgroundRemovalProcessor,
    mut requests: UnboundedReceiver<WorkerRequest>,
    events: &UnboundedSender<WorkerMessage>,
) {
    if let Err(e) = processor.initialize() {
        tracing::error!(error = %e, "Execution unit failed to initialize");
        return;
    }
    if events.send(WorkerMessage::Ready).is_err() {
        debug!("Supervisor went away before the unit became ready");
        return;
    }
    tracing::info!("Execution unit ready");

    while let Some(request) = requests.blocking_recv() {
        let id = request.id;
        let message = handle_request(&mut processor, &request, events);
        if events.send(message).is_err() {
            debug!("Result for {} dropped: supervisor is gone", id);
        }
    }

    tracing::info!("Execution unit stopped");
}

/// Process one request and build its terminal message
fn handle_request(
    processor: &mut BackgroundRemovalProcessor,
    request: &WorkerRequest,
    events: &UnboundedSender<WorkerMessage>,
) -> WorkerMessage {
    let _span = spans::request(request.id, request.model).entered();
    let reporter = ChannelProgressReporter::new(request.id, events.clone());
    let outcome = catch_unwind(AssertUnwindSafe(|| processor.process(request, &reporter)));

    match outcome {
        Ok(Ok(processed)) => WorkerMessage::Done {
            id: request.id,
            output: processed.output,
        },
        Ok(Err(err)) => {
            tracing::warn!(id = %request.id, error = %err, "Request failed");
            WorkerMessage::Error {
                id: request.id,
                error: err.to_string(),
            }
        },
        Err(payload) => {
            // The backend may be half-updated after a panic
            processor.reset();
            let error = format!("Internal error: {}", panic_message(payload.as_ref()));
            tracing::error!(id = %request.id, %error, "Request panicked");
            WorkerMessage::Error {
                id: request.id,
                error,
            }
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "execution unit panicked".to_string()
    }
}
