//! Persisted model selection

use crate::{
    error::{BgRemovalError, Result},
    models::ModelId,
    storage::KeyValueStore,
};
use std::sync::{Arc, Mutex};

/// Currently selected model, backed by a key-value store
///
/// The store is written before the in-memory value changes, so a failed write
/// leaves the previous selection in place.
pub struct ModelSelector {
    store: Arc<dyn KeyValueStore>,
    key: String,
    current: Mutex<ModelId>,
}

impl std::fmt::Debug for ModelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSelector")
            .field("key", &self.key)
            .field("current", &self.get())
            .finish_non_exhaustive()
    }
}

impl ModelSelector {
    /// Restore the selection from `store`
    ///
    /// Missing, unreadable or unknown values fall back to the default model.
    #[must_use]
    pub fn load(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let current = match store.get(&key) {
            Ok(Some(value)) => value.parse().unwrap_or_else(|_| {
                log::warn!(
                    "Ignoring unknown persisted model '{}', using {}",
                    value,
                    ModelId::default()
                );
                ModelId::default()
            }),
            Ok(None) => ModelId::default(),
            Err(e) => {
                log::warn!("Failed to read model selection: {}", e);
                ModelId::default()
            },
        };
        log::debug!("Model selection restored: {}", current);

        Self {
            store,
            key,
            current: Mutex::new(current),
        }
    }

    /// Currently selected model
    ///
    /// A poisoned lock still holds the last stored selection, which is returned.
    #[must_use]
    pub fn get(&self) -> ModelId {
        match self.current.lock() {
            Ok(current) => *current,
            Err(poisoned) => {
                let current = **poisoned.get_ref();
                log::warn!("Model selection lock poisoned, using last value {}", current);
                current
            },
        }
    }

    /// Select and persist a model
    ///
    /// # Errors
    /// - The store write fails; the previous selection is kept
    pub fn set(&self, model: ModelId) -> Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| BgRemovalError::internal("Model selection lock poisoned"))?;
        self.store.set(&self.key, model.as_str())?;
        *current = model;
        tracing::info!(%model, "Model selected");
        Ok(())
    }

    /// Parse, select and persist a model identifier
    ///
    /// # Errors
    /// - Identifier is not one of the known models
    /// - The store write fails
    pub fn set_from_str(&self, model: &str) -> Result<()> {
        self.set(model.parse()?)
    }
}
