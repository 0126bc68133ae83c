//! Background removal processor
//!
//! Drives a single request through the execution unit's stages: model
//! loading, decoding, preprocessing, inference, mask postprocessing and
//! compositing. Every stage transition is reported before the stage runs, and
//! any failure aborts the request with the stage's error.

use crate::{
    compositor::{apply_mask, PixelBuffer, SegmentationMask},
    config::{MaskFilter, WorkerConfig},
    error::Result,
    inference::{InferenceBackend, InferenceProvider},
    models::ModelId,
    protocol::WorkerRequest,
    services::{ImageIOService, ProcessingStage, ProgressReporter},
    tracing_config::spans,
};
use instant::Instant;
use log::debug;
use std::sync::Arc;
use tracing::{info as trace_info, instrument, span, Level};

/// Wall-clock time spent in each stage of one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingTimings {
    pub model_load_ms: u64,
    pub decode_ms: u64,
    pub preprocessing_ms: u64,
    pub inference_ms: u64,
    pub postprocessing_ms: u64,
    pub compositing_ms: u64,
    pub total_ms: u64,
}

/// Result of a successfully processed request
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    /// PNG-encoded RGBA output
    pub output: Vec<u8>,
    /// Width and height of the input (and output) image
    pub dimensions: (u32, u32),
    pub timings: ProcessingTimings,
}

/// Per-unit processor holding the provider and the currently loaded model
pub struct BackgroundRemovalProcessor {
    provider: Arc<dyn InferenceProvider>,
    mask_filter: MaskFilter,
    reuse_loaded_model: bool,
    backend: Option<Box<dyn InferenceBackend>>,
}

impl BackgroundRemovalProcessor {
    #[must_use]
    pub fn new(provider: Arc<dyn InferenceProvider>, config: &WorkerConfig) -> Self {
        Self {
            provider,
            mask_filter: config.mask_filter,
            reuse_loaded_model: config.reuse_loaded_model,
            backend: None,
        }
    }

    /// Prepare the inference runtime
    ///
    /// # Errors
    /// - Provider runtime initialization failures
    pub fn initialize(&self) -> Result<()> {
        self.provider.initialize()
    }

    /// Model currently held by the processor, if any
    #[must_use]
    pub fn loaded_model(&self) -> Option<ModelId> {
        self.backend.as_ref().map(|backend| backend.model())
    }

    /// Drop the loaded model so the next request loads it again
    pub fn reset(&mut self) {
        self.backend = None;
    }

    /// Process one request end to end
    ///
    /// # Errors
    /// Returns the error of the first stage that fails: model loading,
    /// decoding, preprocessing, inference, mask postprocessing or encoding.
    #[instrument(
        skip(self, request, reporter),
        fields(input_bytes = request.image.len())
    )]
    pub fn process(
        &mut self,
        request: &WorkerRequest,
        reporter: &dyn ProgressReporter,
    ) -> Result<ProcessedImage> {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();

        reporter.report_stage(ProcessingStage::LoadingModel);
        let stage_start = Instant::now();
        let mut backend = self.take_backend(request.model, reporter)?;
        timings.model_load_ms = elapsed_ms(stage_start);

        let result = Self::run_stages(
            backend.as_mut(),
            &request.image,
            self.mask_filter,
            reporter,
            &mut timings,
        );

        if self.reuse_loaded_model {
            self.backend = Some(backend);
        }

        let (output, dimensions) = result?;
        timings.total_ms = elapsed_ms(total_start);

        trace_info!(
            width = dimensions.0,
            height = dimensions.1,
            output_bytes = output.len(),
            total_ms = timings.total_ms,
            "Background removed"
        );
        debug!("Stage timings for {}: {:?}", request.id, timings);

        Ok(ProcessedImage {
            output,
            dimensions,
            timings,
        })
    }

    /// Reuse the loaded backend when it matches, otherwise load the model
    fn take_backend(
        &mut self,
        model: ModelId,
        reporter: &dyn ProgressReporter,
    ) -> Result<Box<dyn InferenceBackend>> {
        match self.backend.take() {
            Some(backend) if backend.model() == model => {
                debug!("Reusing loaded model {}", model);
                Ok(backend)
            },
            previous => {
                drop(previous);
                let _span = spans::model_loading(model).entered();
                self.provider
                    .load_model(model, &|status| reporter.report_status(status))
            },
        }
    }

    fn run_stages(
        backend: &mut dyn InferenceBackend,
        image_bytes: &[u8],
        mask_filter: MaskFilter,
        reporter: &dyn ProgressReporter,
        timings: &mut ProcessingTimings,
    ) -> Result<(Vec<u8>, (u32, u32))> {
        reporter.report_stage(ProcessingStage::Decoding);
        let stage_start = Instant::now();
        let image = ImageIOService::decode(image_bytes)?;
        let dimensions = (image.width(), image.height());
        timings.decode_ms = elapsed_ms(stage_start);

        reporter.report_stage(ProcessingStage::Preprocessing);
        let input_tensor = {
            let _span = span!(
                Level::DEBUG,
                "preprocessing",
                width = dimensions.0,
                height = dimensions.1
            )
            .entered();
            let stage_start = Instant::now();
            let tensor = backend.preprocess(&image)?;
            timings.preprocessing_ms = elapsed_ms(stage_start);
            tensor
        };

        reporter.report_stage(ProcessingStage::Inferring);
        let output_tensor = {
            let _span = span!(Level::INFO, "inference", model = %backend.model()).entered();
            let stage_start = Instant::now();
            let tensor = backend.infer(&input_tensor)?;
            timings.inference_ms = elapsed_ms(stage_start);
            tensor
        };

        reporter.report_stage(ProcessingStage::Postprocessing);
        let mask = {
            let _span = spans::postprocessing("mask_resize", dimensions).entered();
            let stage_start = Instant::now();
            let mask = SegmentationMask::from_tensor(&output_tensor)?.resize(
                dimensions.0,
                dimensions.1,
                mask_filter.filter_type(),
            )?;
            timings.postprocessing_ms = elapsed_ms(stage_start);
            mask
        };

        reporter.report_stage(ProcessingStage::Compositing);
        let _span = spans::postprocessing("compositing", dimensions).entered();
        let stage_start = Instant::now();
        let original = PixelBuffer::from_image(&image);
        let composited = apply_mask(&original, &mask)?;
        let output = ImageIOService::encode_png(composited)?;
        timings.compositing_ms = elapsed_ms(stage_start);

        Ok((output, dimensions))
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
