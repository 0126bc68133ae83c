//! Message protocol between the worker supervisor and the execution unit
//!
//! Requests flow supervisor → unit, everything else flows unit → supervisor.
//! Every message that carries an id refers to exactly one earlier request, and
//! the unit emits exactly one terminal message (`Done` or `Error`) per request.

use crate::models::ModelId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque unique identifier of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh random identifier
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Work item sent to the execution unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub id: RequestId,
    /// Encoded input image (PNG, JPEG, ...)
    pub image: Vec<u8>,
    pub model: ModelId,
}

/// Messages emitted by the execution unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Sent once, unprompted, before any request is accepted
    Ready,
    /// Human-readable status of a request that is still running
    Progress { id: RequestId, status: String },
    /// Terminal success carrying the encoded PNG output
    Done { id: RequestId, output: Vec<u8> },
    /// Terminal failure carrying a description of the cause
    Error { id: RequestId, error: String },
}

impl WorkerMessage {
    /// Request this message refers to (`None` for the readiness signal)
    #[must_use]
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Self::Ready => None,
            Self::Progress { id, .. } | Self::Done { id, .. } | Self::Error { id, .. } => Some(*id),
        }
    }

    /// Wire tag of the message, as it appears in the `type` field
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Progress { .. } => "PROGRESS",
            Self::Done { .. } => "DONE",
            Self::Error { .. } => "ERROR",
        }
    }

    /// Whether this message ends the lifecycle of its request
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
