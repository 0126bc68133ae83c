//! Progress reporting service
//!
//! Separates progress reporting from the processing pipeline. The execution
//! unit reports through a [`ChannelProgressReporter`], which turns every stage
//! transition into a `Progress` protocol message.

use crate::protocol::{RequestId, WorkerMessage};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

/// Non-terminal stages of a single request inside the execution unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Loading the requested model through the inference provider
    LoadingModel,
    /// Decoding the submitted image bytes
    Decoding,
    /// Converting the image into the model's input tensor
    Preprocessing,
    /// Running the model
    Inferring,
    /// Turning the output tensor into a mask at image resolution
    Postprocessing,
    /// Applying the mask and encoding the result
    Compositing,
}

impl ProcessingStage {
    /// Human-readable status text sent with the `Progress` message
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::LoadingModel => "Loading model...",
            ProcessingStage::Decoding => "Converting image...",
            ProcessingStage::Preprocessing => "Pre-processing image...",
            ProcessingStage::Inferring => "Generating mask...",
            ProcessingStage::Postprocessing => "Processing output...",
            ProcessingStage::Compositing => "Applying mask to image...",
        }
    }

    /// Short stage name for logs and error context
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ProcessingStage::LoadingModel => "model loading",
            ProcessingStage::Decoding => "decoding",
            ProcessingStage::Preprocessing => "preprocessing",
            ProcessingStage::Inferring => "inference",
            ProcessingStage::Postprocessing => "postprocessing",
            ProcessingStage::Compositing => "compositing",
        }
    }
}

/// Trait for reporting progress of a single request
pub trait ProgressReporter: Send + Sync {
    /// Report entry into a new stage
    fn report_stage(&self, stage: ProcessingStage);

    /// Report free-form status text, e.g. from the inference provider while a model downloads
    fn report_status(&self, status: &str);
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_stage(&self, _stage: ProcessingStage) {
        // Intentionally empty - discards stage updates
    }

    fn report_status(&self, _status: &str) {
        // Intentionally empty - discards status text
    }
}

/// Reporter that forwards every update as a `Progress` message for one request
pub struct ChannelProgressReporter {
    id: RequestId,
    sender: UnboundedSender<WorkerMessage>,
}

impl ChannelProgressReporter {
    #[must_use]
    pub fn new(id: RequestId, sender: UnboundedSender<WorkerMessage>) -> Self {
        Self { id, sender }
    }
}

impl ProgressReporter for ChannelProgressReporter {
    fn report_stage(&self, stage: ProcessingStage) {
        self.report_status(stage.description());
    }

    fn report_status(&self, status: &str) {
        let message = WorkerMessage::Progress {
            id: self.id,
            status: status.to_string(),
        };
        if self.sender.send(message).is_err() {
            log::debug!("Progress for {} dropped: supervisor is gone", self.id);
        }
    }
}

/// Reporter that records every status string, used by tests and diagnostics
#[derive(Debug, Default)]
pub struct RecordingProgressReporter {
    statuses: Mutex<Vec<String>>,
}

impl RecordingProgressReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far
    #[must_use]
    pub fn statuses(&self) -> Vec<String> {
        self.statuses
            .lock()
            .map(|statuses| statuses.clone())
            .unwrap_or_default()
    }
}

impl ProgressReporter for RecordingProgressReporter {
    fn report_stage(&self, stage: ProcessingStage) {
        self.report_status(stage.description());
    }

    fn report_status(&self, status: &str) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.push(status.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_stage_descriptions() {
        assert_eq!(ProcessingStage::LoadingModel.description(), "Loading model...");
        assert_eq!(
            ProcessingStage::Preprocessing.description(),
            "Pre-processing image..."
        );
        assert_eq!(ProcessingStage::Inferring.description(), "Generating mask...");
        assert_eq!(
            ProcessingStage::Postprocessing.description(),
            "Processing output..."
        );
        assert_eq!(
            ProcessingStage::Compositing.description(),
            "Applying mask to image..."
        );
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(ProcessingStage::LoadingModel.name(), "model loading");
        assert_eq!(ProcessingStage::Decoding.name(), "decoding");
        assert_eq!(ProcessingStage::Compositing.name(), "compositing");
    }

    #[test]
    fn test_channel_reporter_emits_progress_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = RequestId::new();
        let reporter = ChannelProgressReporter::new(id, tx);

        reporter.report_stage(ProcessingStage::LoadingModel);
        reporter.report_status("download 50%");

        assert_eq!(
            rx.try_recv().unwrap(),
            WorkerMessage::Progress {
                id,
                status: "Loading model...".to_string()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            WorkerMessage::Progress {
                id,
                status: "download 50%".to_string()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_reporter_tolerates_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let reporter = ChannelProgressReporter::new(RequestId::new(), tx);
        reporter.report_stage(ProcessingStage::Inferring);
    }

    #[test]
    fn test_recording_reporter() {
        let reporter = RecordingProgressReporter::new();
        reporter.report_stage(ProcessingStage::Decoding);
        reporter.report_status("custom");
        assert_eq!(reporter.statuses(), vec!["Converting image...", "custom"]);

        let noop = NoOpProgressReporter;
        noop.report_stage(ProcessingStage::Compositing);
    }
}
