//! Worker supervisor
//!
//! Owns the single execution unit. The unit is started lazily on first use,
//! and concurrent first callers all wait on the same start. Messages coming
//! back from the unit are routed by a background task, in arrival order, to
//! the processing registry, the record sink and the notification channel.

use crate::{
    config::WorkerConfig,
    error::{BgRemovalError, Result},
    inference::InferenceProvider,
    models::ModelId,
    protocol::{RequestId, WorkerMessage, WorkerRequest},
    registry::{ProcessingEntry, ProcessingRegistry},
    storage::{PersistedRecord, RecordSink},
    worker::WorkerHandle,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// User-facing text of the failure notification
pub const PROCESSING_FAILED_MESSAGE: &str =
    "There was an error processing your image. More info on the console.";

/// Transient, user-facing notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The execution unit reported an error for a submission
    ProcessingFailed {
        id: RequestId,
        message: String,
        /// Error text sent by the unit
        detail: String,
    },
    /// A result was produced but could not be stored
    PersistFailed { id: RequestId, detail: String },
}

impl Notification {
    #[must_use]
    pub fn id(&self) -> RequestId {
        match self {
            Self::ProcessingFailed { id, .. } | Self::PersistFailed { id, .. } => *id,
        }
    }
}

/// A started unit together with the task routing its messages
#[derive(Debug)]
struct RunningUnit {
    handle: WorkerHandle,
    router: JoinHandle<()>,
}

/// Supervises the single execution unit and routes its messages
pub struct WorkerSupervisor {
    provider: Arc<dyn InferenceProvider>,
    config: WorkerConfig,
    registry: ProcessingRegistry,
    sink: Arc<dyn RecordSink>,
    notifications: broadcast::Sender<Notification>,
    messages: broadcast::Sender<WorkerMessage>,
    unit: OnceCell<RunningUnit>,
    units_started: AtomicUsize,
}

impl std::fmt::Debug for WorkerSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSupervisor")
            .field("config", &self.config)
            .field("ready", &self.is_ready())
            .field("pending", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl WorkerSupervisor {
    /// Create a supervisor; no unit is started until it is first needed
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(
        config: WorkerConfig,
        provider: Arc<dyn InferenceProvider>,
        registry: ProcessingRegistry,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self> {
        config.validate()?;
        let (notifications, _) = broadcast::channel(config.notification_capacity);
        let (messages, _) = broadcast::channel(config.message_capacity);

        Ok(Self {
            provider,
            config,
            registry,
            sink,
            notifications,
            messages,
            unit: OnceCell::new(),
            units_started: AtomicUsize::new(0),
        })
    }

    /// Make sure the execution unit exists and has signalled readiness
    ///
    /// Safe to call concurrently: all callers wait for the same start. A
    /// failed start leaves no unit behind, and the next call tries again.
    ///
    /// # Errors
    /// Returns [`BgRemovalError::Worker`] if the unit cannot be spawned,
    /// exits, or misses the readiness deadline.
    pub async fn ensure_ready(&self) -> Result<()> {
        self.running_unit().await.map(|_| ())
    }

    /// Submit an image for background removal
    ///
    /// Registers the submission and hands it to the unit without waiting for
    /// the result. Progress and the outcome arrive through the registry, the
    /// record sink and the notification channel.
    ///
    /// # Errors
    /// - The unit could not be started; nothing is registered
    /// - The unit stopped accepting requests; the entry is withdrawn
    #[instrument(skip(self, image, name), fields(bytes = image.len()))]
    pub async fn submit(
        &self,
        image: Vec<u8>,
        name: impl Into<String>,
        model: ModelId,
    ) -> Result<ProcessingEntry> {
        let unit = self.running_unit().await?;

        let id = RequestId::new();
        let entry = ProcessingEntry::new(id, image.clone(), model, name);
        self.registry.add(entry.clone());

        if let Err(e) = unit.handle.send(WorkerRequest { id, image, model }) {
            self.registry.remove(id);
            error!(%id, error = %e, "Failed to dispatch request");
            return Err(e);
        }

        debug!(%id, name = %entry.name, "Request dispatched");
        Ok(entry)
    }

    /// Whether the unit has been started and signalled readiness
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.unit.initialized()
    }

    /// Number of execution units spawned so far
    #[must_use]
    pub fn units_started(&self) -> usize {
        self.units_started.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn registry(&self) -> &ProcessingRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Receive user-facing notifications
    #[must_use]
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Receive every message from the unit once it has been routed
    #[must_use]
    pub fn subscribe_messages(&self) -> broadcast::Receiver<WorkerMessage> {
        self.messages.subscribe()
    }

    /// Stop the unit after its queue drains, then wait for routing to finish
    pub async fn shutdown(mut self) {
        let Some(RunningUnit { handle, router }) = self.unit.take() else {
            return;
        };

        if tokio::task::spawn_blocking(move || handle.shutdown())
            .await
            .is_err()
        {
            warn!("Execution unit shutdown task failed");
        }
        if router.await.is_err() {
            warn!("Message routing task failed");
        }
        info!("Worker supervisor stopped");
    }

    async fn running_unit(&self) -> Result<&RunningUnit> {
        self.unit.get_or_try_init(|| self.start_unit()).await
    }

    /// Spawn the unit, wait for its `Ready`, then start routing its messages
    #[instrument(skip(self))]
    async fn start_unit(&self) -> Result<RunningUnit> {
        let (events, mut event_rx) = mpsc::unbounded_channel();

        let handle = WorkerHandle::spawn(Arc::clone(&self.provider), &self.config, events)
            .map_err(|e| {
                error!(error = %e, "Failed to create execution unit");
                e
            })?;
        self.units_started.fetch_add(1, Ordering::SeqCst);

        let timeout = self.config.ready_timeout();
        let failure = match tokio::time::timeout(timeout, event_rx.recv()).await {
            Ok(Some(WorkerMessage::Ready)) => None,
            Ok(Some(other)) => Some(format!(
                "Execution unit sent {} before signalling readiness",
                other.kind()
            )),
            Ok(None) => Some("Execution unit exited before signalling readiness".to_string()),
            Err(_) => Some(format!(
                "Execution unit not ready after {} ms",
                timeout.as_millis()
            )),
        };
        if let Some(reason) = failure {
            error!(%reason, "Execution unit initialization failed");
            // Dropping the handle closes the request channel so the thread exits
            drop(handle);
            return Err(BgRemovalError::worker(reason));
        }

        let router = MessageRouter {
            registry: self.registry.clone(),
            sink: Arc::clone(&self.sink),
            table: self.config.records_table.clone(),
            notifications: self.notifications.clone(),
            messages: self.messages.clone(),
        };
        let router = tokio::spawn(router.run(event_rx));

        info!("Execution unit ready");
        Ok(RunningUnit { handle, router })
    }
}

/// Routes unit messages to the registry, the record sink and subscribers
struct MessageRouter {
    registry: ProcessingRegistry,
    sink: Arc<dyn RecordSink>,
    table: String,
    notifications: broadcast::Sender<Notification>,
    messages: broadcast::Sender<WorkerMessage>,
}

impl MessageRouter {
    async fn run(self, mut event_rx: mpsc::UnboundedReceiver<WorkerMessage>) {
        while let Some(message) = event_rx.recv().await {
            self.route(&message).await;
            // No subscribers is fine
            let _ = self.messages.send(message);
        }
        debug!("Message routing stopped");
    }

    async fn route(&self, message: &WorkerMessage) {
        match message {
            WorkerMessage::Ready => warn!("Ignoring repeated readiness signal"),
            WorkerMessage::Progress { id, status } => {
                if self.registry.record_progress(*id, status) {
                    debug!(%id, %status, "Progress");
                } else {
                    debug!(%id, "Ignoring progress for unknown or finished request");
                }
            },
            WorkerMessage::Done { id, output } => self.complete(*id, output).await,
            WorkerMessage::Error { id, error } => {
                if !self.registry.contains(*id) {
                    debug!(%id, "Ignoring error for unknown request");
                    return;
                }
                error!(%id, %error, "Background removal failed");
                let _ = self.notifications.send(Notification::ProcessingFailed {
                    id: *id,
                    message: PROCESSING_FAILED_MESSAGE.to_string(),
                    detail: error.clone(),
                });
            },
        }
    }

    async fn complete(&self, id: RequestId, output: &[u8]) {
        let Some(entry) = self.registry.remove(id) else {
            debug!(%id, "Dropping result for unknown request");
            return;
        };

        let record = PersistedRecord::new(entry.name, entry.model, &entry.input, output);
        match self.sink.append(&self.table, record).await {
            Ok(()) => info!(%id, table = %self.table, bytes = output.len(), "Result stored"),
            Err(e) => {
                error!(%id, error = %e, "Failed to store result");
                let _ = self.notifications.send(Notification::PersistFailed {
                    id,
                    detail: e.to_string(),
                });
            },
        }
    }
}
