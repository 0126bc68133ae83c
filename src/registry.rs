//! Processing registry
//!
//! Transient, observable list of submissions that have not completed yet.
//! Entries keep insertion order. Every mutation is published through a
//! [`tokio::sync::watch`] channel so UIs can re-render from a snapshot.

use crate::{models::ModelId, protocol::RequestId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle status of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Processing,
    Done,
    Error,
}

impl ProcessingStatus {
    /// Whether the status can no longer change
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Processing)
    }

    /// Only `processing` may move, and terminal states are final
    #[must_use]
    pub fn can_transition_to(self, _next: Self) -> bool {
        self == Self::Processing
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// A tracked submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingEntry {
    pub id: RequestId,
    pub status: ProcessingStatus,
    /// Encoded input image as submitted
    pub input: Vec<u8>,
    pub model: ModelId,
    /// Caller-supplied display name
    pub name: String,
    /// Latest status text reported by the execution unit
    pub progress: Option<String>,
}

impl ProcessingEntry {
    /// Create a new entry in the `processing` state
    #[must_use]
    pub fn new(id: RequestId, input: Vec<u8>, model: ModelId, name: impl Into<String>) -> Self {
        Self {
            id,
            status: ProcessingStatus::Processing,
            input,
            model,
            name: name.into(),
            progress: None,
        }
    }
}

/// Shared registry of in-flight submissions
///
/// Cloning is cheap; all clones see the same entries.
#[derive(Debug, Clone)]
pub struct ProcessingRegistry {
    entries: Arc<watch::Sender<Vec<ProcessingEntry>>>,
}

impl Default for ProcessingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingRegistry {
    #[must_use]
    pub fn new() -> Self {
        let (entries, _) = watch::channel(Vec::new());
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Append an entry. An entry with the same id is replaced in place.
    pub fn add(&self, entry: ProcessingEntry) {
        self.entries.send_modify(|entries| {
            match entries.iter_mut().find(|existing| existing.id == entry.id) {
                Some(existing) => *existing = entry,
                None => entries.push(entry),
            }
        });
    }

    #[must_use]
    pub fn get(&self, id: RequestId) -> Option<ProcessingEntry> {
        self.entries
            .borrow()
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
    }

    #[must_use]
    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.borrow().iter().any(|entry| entry.id == id)
    }

    /// Remove an entry, returning it if it was present
    pub fn remove(&self, id: RequestId) -> Option<ProcessingEntry> {
        let mut removed = None;
        self.entries.send_if_modified(|entries| {
            match entries.iter().position(|entry| entry.id == id) {
                Some(index) => {
                    removed = Some(entries.remove(index));
                    true
                },
                None => false,
            }
        });
        removed
    }

    /// Snapshot of all entries in insertion order
    #[must_use]
    pub fn list(&self) -> Vec<ProcessingEntry> {
        self.entries.borrow().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Move an entry to a new status
    ///
    /// Returns `false` when the entry is absent or already terminal.
    pub fn set_status(&self, id: RequestId, status: ProcessingStatus) -> bool {
        self.entries.send_if_modified(|entries| {
            match entries.iter_mut().find(|entry| entry.id == id) {
                Some(entry) if entry.status.can_transition_to(status) => {
                    entry.status = status;
                    true
                },
                _ => false,
            }
        })
    }

    /// Record progress text for a running entry
    ///
    /// Returns `false` when the entry is absent or already terminal.
    pub fn record_progress(&self, id: RequestId, status_text: &str) -> bool {
        self.entries.send_if_modified(|entries| {
            match entries.iter_mut().find(|entry| entry.id == id) {
                Some(entry) if !entry.status.is_terminal() => {
                    entry.status = ProcessingStatus::Processing;
                    entry.progress = Some(status_text.to_string());
                    true
                },
                _ => false,
            }
        })
    }

    /// Watch the entry list; the receiver sees the snapshot after each change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<ProcessingEntry>> {
        self.entries.subscribe()
    }
}
