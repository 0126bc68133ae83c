#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Background Removal Worker
//!
//! Orchestrates background removal inference on a dedicated execution unit
//! and composites the predicted mask into an RGBA PNG.
//!
//! ## Features
//!
//! - **Single Execution Unit**: started lazily, exactly once, with a readiness handshake
//! - **Typed Protocol**: `Request`, `Ready`, `Progress`, `Done` and `Error` messages
//! - **Processing Registry**: observable list of in-flight submissions
//! - **Compositing**: gray, RGB and RGBA inputs combined with a soft mask
//! - **Model Selection**: persisted through a pluggable key-value store
//! - **Result Persistence**: base64 records appended to a pluggable sink
//!
//! Model runtimes are not bundled. The embedding application implements
//! [`InferenceProvider`] for its runtime of choice.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgremove_worker::{
//!     backends::MockProvider, AppContext, MemoryKeyValueStore, MemoryRecordStore, WorkerConfig,
//! };
//! use std::sync::Arc;
//!
//! # async fn example(image_bytes: Vec<u8>) -> bgremove_worker::Result<()> {
//! let ctx = AppContext::new(
//!     WorkerConfig::default(),
//!     Arc::new(MockProvider::new()),
//!     Arc::new(MemoryKeyValueStore::new()),
//!     Arc::new(MemoryRecordStore::new()),
//! )?;
//!
//! let mut notifications = ctx.subscribe_notifications();
//! let entry = ctx.submit(image_bytes, "photo.jpg").await?;
//! println!("{} is {}", entry.name, entry.status);
//! # let _ = notifications.try_recv();
//!
//! ctx.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `tracing-init`: [`TracingConfig::init`] installs a `tracing-subscriber` registry
//! - `tracing-json`: JSON output format for [`TracingConfig`]

pub mod backends;
pub mod compositor;
pub mod config;
pub mod context;
pub mod error;
pub mod inference;
pub mod models;
pub mod processor;
pub mod protocol;
pub mod registry;
pub mod selector;
pub mod services;
pub mod storage;
pub mod supervisor;
pub mod tracing_config;
pub mod utils;
pub mod worker;

// Public API exports
pub use compositor::{apply_mask, PixelBuffer, SegmentationMask};
pub use config::{MaskFilter, WorkerConfig, WorkerConfigBuilder};
pub use context::AppContext;
pub use error::{BgRemovalError, Result};
pub use inference::{InferenceBackend, InferenceProvider};
pub use models::{ModelId, PreprocessingConfig};
pub use processor::{BackgroundRemovalProcessor, ProcessedImage, ProcessingTimings};
pub use protocol::{RequestId, WorkerMessage, WorkerRequest};
pub use registry::{ProcessingEntry, ProcessingRegistry, ProcessingStatus};
pub use selector::ModelSelector;
pub use services::{
    ChannelProgressReporter, ImageIOService, NoOpProgressReporter, ProcessingStage,
    ProgressReporter, RecordingProgressReporter,
};
pub use storage::{
    JsonFileKeyValueStore, JsonLinesRecordStore, KeyValueStore, MemoryKeyValueStore,
    MemoryRecordStore, PersistedRecord, RecordSink,
};
pub use supervisor::{Notification, WorkerSupervisor, PROCESSING_FAILED_MESSAGE};
pub use tracing_config::{spans, TracingConfig, TracingFormat};
pub use utils::ImagePreprocessor;
pub use worker::WorkerHandle;

/// Remove the background of an encoded image on the current thread
///
/// Runs the same pipeline as the execution unit without a supervisor, which
/// is convenient for one-off conversions and tests.
///
/// # Errors
/// - Model loading, decoding, inference or encoding failures
pub fn remove_background_from_bytes(
    image_bytes: &[u8],
    model: ModelId,
    provider: std::sync::Arc<dyn InferenceProvider>,
) -> Result<Vec<u8>> {
    let mut processor = BackgroundRemovalProcessor::new(provider, &WorkerConfig::default());
    let request = WorkerRequest {
        id: RequestId::new(),
        image: image_bytes.to_vec(),
        model,
    };
    processor
        .process(&request, &NoOpProgressReporter)
        .map(|processed| processed.output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::Arc;

    #[test]
    fn test_remove_background_from_bytes() {
        let mut input = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 4, Rgb([10, 20, 30])))
            .write_to(&mut Cursor::new(&mut input), ImageFormat::Png)
            .unwrap();

        let output =
            remove_background_from_bytes(&input, ModelId::Rmbg14, Arc::new(backends::MockProvider::new()))
                .unwrap();

        let decoded = image::load_from_memory(&output).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (6, 4));
        assert!(decoded.pixels().all(|p| p.0 == [10, 20, 30, 255]));
    }
}
