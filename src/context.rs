//! Application context
//!
//! Bundles the model selector, the processing registry and the worker
//! supervisor behind one explicitly created and torn down object.

use crate::{
    config::WorkerConfig,
    error::Result,
    inference::InferenceProvider,
    models::ModelId,
    registry::{ProcessingEntry, ProcessingRegistry},
    selector::ModelSelector,
    storage::{KeyValueStore, RecordSink},
    supervisor::{Notification, WorkerSupervisor},
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Owns everything a background removal session needs
#[derive(Debug)]
pub struct AppContext {
    selector: ModelSelector,
    registry: ProcessingRegistry,
    supervisor: WorkerSupervisor,
}

impl AppContext {
    /// Wire up a context; the execution unit starts on first submission
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(
        config: WorkerConfig,
        provider: Arc<dyn InferenceProvider>,
        settings: Arc<dyn KeyValueStore>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self> {
        let selector = ModelSelector::load(settings, config.settings_key.clone());
        let registry = ProcessingRegistry::new();
        let supervisor = WorkerSupervisor::new(config, provider, registry.clone(), sink)?;

        Ok(Self {
            selector,
            registry,
            supervisor,
        })
    }

    /// Submit an image using the currently selected model
    ///
    /// # Errors
    /// - The execution unit could not be started or is gone
    pub async fn submit(&self, image: Vec<u8>, name: impl Into<String>) -> Result<ProcessingEntry> {
        self.supervisor
            .submit(image, name, self.selector.get())
            .await
    }

    /// Submit an image with an explicit model, leaving the selection untouched
    ///
    /// # Errors
    /// - The execution unit could not be started or is gone
    pub async fn submit_with_model(
        &self,
        image: Vec<u8>,
        name: impl Into<String>,
        model: ModelId,
    ) -> Result<ProcessingEntry> {
        self.supervisor.submit(image, name, model).await
    }

    #[must_use]
    pub fn selected_model(&self) -> ModelId {
        self.selector.get()
    }

    /// Select and persist the model for later submissions
    ///
    /// # Errors
    /// - The settings store write fails
    pub fn select_model(&self, model: ModelId) -> Result<()> {
        self.selector.set(model)
    }

    #[must_use]
    pub fn selector(&self) -> &ModelSelector {
        &self.selector
    }

    #[must_use]
    pub fn registry(&self) -> &ProcessingRegistry {
        &self.registry
    }

    #[must_use]
    pub fn supervisor(&self) -> &WorkerSupervisor {
        &self.supervisor
    }

    #[must_use]
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.supervisor.subscribe_notifications()
    }

    /// Stop the execution unit and message routing
    pub async fn shutdown(self) {
        self.supervisor.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockProvider;
    use crate::config::DEFAULT_SETTINGS_KEY;
    use crate::storage::{MemoryKeyValueStore, MemoryRecordStore};

    fn context(settings: Arc<dyn KeyValueStore>) -> AppContext {
        AppContext::new(
            WorkerConfig::default(),
            Arc::new(MockProvider::new()),
            settings,
            Arc::new(MemoryRecordStore::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_uses_selected_model() {
        let settings: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        settings.set(DEFAULT_SETTINGS_KEY, "Xenova/modnet").unwrap();
        let ctx = context(settings);
        assert_eq!(ctx.selected_model(), ModelId::Modnet);

        let entry = ctx.submit(vec![0; 4], "a.png").await.unwrap();
        assert_eq!(entry.model, ModelId::Modnet);

        ctx.select_model(ModelId::Rmbg14).unwrap();
        let entry = ctx
            .submit_with_model(vec![0; 4], "b.png", ModelId::Rmbg20)
            .await
            .unwrap();
        assert_eq!(entry.model, ModelId::Rmbg20);
        assert_eq!(ctx.selected_model(), ModelId::Rmbg14);

        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_without_submissions() {
        let ctx = context(Arc::new(MemoryKeyValueStore::new()));
        assert!(!ctx.supervisor().is_ready());
        assert!(ctx.registry().is_empty());
        ctx.shutdown().await;
    }
}
