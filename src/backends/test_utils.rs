//! Test utilities and mock inference provider
//!
//! This module provides a mock implementation of [`InferenceProvider`] so the
//! worker pipeline can be exercised without model files or an inference
//! runtime. The mock records every call and can be told to fail or panic at a
//! chosen stage.

use crate::{
    error::{BgRemovalError, Result},
    inference::{InferenceBackend, InferenceProvider},
    models::{ModelId, PreprocessingConfig},
};
use image::DynamicImage;
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Stage at which the mock should misbehave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockStage {
    LoadModel,
    Preprocess,
    Inference,
}

/// Shape of the mask the mock backend predicts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockMask {
    /// Same probability everywhere
    Uniform(f32),
    /// Soft-edged disc in the centre, background elsewhere
    Circle,
}

/// Mock inference provider for testing
#[derive(Debug, Clone)]
pub struct MockProvider {
    /// Predicted mask pattern
    mask: MockMask,
    /// Side length of the square model input and output
    output_size: u32,
    /// Stage that returns an error
    fail_at: Option<MockStage>,
    /// Stage that panics
    panic_at: Option<MockStage>,
    /// Artificial inference latency
    infer_delay: Option<Duration>,
    /// Remaining `initialize` calls that fail
    init_failures: Arc<AtomicUsize>,
    /// Remaining `initialize` calls that stall for `init_delay`
    slow_inits: Arc<AtomicUsize>,
    init_delay: Duration,
    /// Call history for verification in tests
    call_history: Arc<Mutex<Vec<String>>>,
}

impl MockProvider {
    /// Create a mock provider predicting a fully opaque mask
    #[must_use]
    pub fn new() -> Self {
        Self {
            mask: MockMask::Uniform(1.0),
            output_size: 32,
            fail_at: None,
            panic_at: None,
            infer_delay: None,
            init_failures: Arc::new(AtomicUsize::new(0)),
            slow_inits: Arc::new(AtomicUsize::new(0)),
            init_delay: Duration::ZERO,
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn with_mask(mut self, mask: MockMask) -> Self {
        self.mask = mask;
        self
    }

    #[must_use]
    pub fn with_output_size(mut self, size: u32) -> Self {
        self.output_size = size.max(1);
        self
    }

    /// Return an error at the given stage
    #[must_use]
    pub fn failing_at(mut self, stage: MockStage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    /// Panic at the given stage
    #[must_use]
    pub fn panicking_at(mut self, stage: MockStage) -> Self {
        self.panic_at = Some(stage);
        self
    }

    #[must_use]
    pub fn with_infer_delay(mut self, delay: Duration) -> Self {
        self.infer_delay = Some(delay);
        self
    }

    /// Fail the next `count` runtime initializations
    #[must_use]
    pub fn with_init_failures(self, count: usize) -> Self {
        self.init_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Stall the next `count` runtime initializations for `delay`
    #[must_use]
    pub fn with_slow_inits(mut self, count: usize, delay: Duration) -> Self {
        self.slow_inits.store(count, Ordering::SeqCst);
        self.init_delay = delay;
        self
    }

    /// Get the call history for verification in tests
    #[must_use]
    pub fn call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    /// Number of `load_model` calls so far
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.call_history()
            .iter()
            .filter(|call| call.starts_with("load_model"))
            .count()
    }

    fn record_call(&self, call: String) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(call);
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceProvider for MockProvider {
    fn initialize(&self) -> Result<()> {
        self.record_call("initialize".to_string());
        if take_one(&self.slow_inits) {
            std::thread::sleep(self.init_delay);
        }
        if take_one(&self.init_failures) {
            return Err(BgRemovalError::model("Mock runtime failed to initialize"));
        }
        Ok(())
    }

    fn load_model(
        &self,
        model: ModelId,
        progress: &dyn Fn(&str),
    ) -> Result<Box<dyn InferenceBackend>> {
        self.record_call(format!("load_model:{}", model));
        check_stage(self.fail_at, self.panic_at, MockStage::LoadModel, model)?;
        progress("Model ready");

        Ok(Box::new(MockBackend {
            model,
            provider: self.clone(),
        }))
    }
}

/// Mock backend returned by [`MockProvider`]
#[derive(Debug)]
pub struct MockBackend {
    model: ModelId,
    provider: MockProvider,
}

impl MockBackend {
    /// Generate the configured mask at the model's output resolution
    fn generate_mock_output(&self) -> Array4<f32> {
        let size = self.provider.output_size as usize;
        match self.provider.mask {
            MockMask::Uniform(value) => Array4::from_elem((1, 1, size, size), value),
            MockMask::Circle => {
                let center = size as f32 / 2.0;
                let radius = (size as f32 / 3.0).max(1.0);
                Array4::from_shape_fn((1, 1, size, size), |(_, _, y, x)| {
                    let dx = x as f32 - center;
                    let dy = y as f32 - center;
                    let distance = (dx * dx + dy * dy).sqrt();
                    ((radius - distance) / radius).clamp(0.0, 1.0)
                })
            },
        }
    }
}

impl InferenceBackend for MockBackend {
    fn model(&self) -> ModelId {
        self.model
    }

    fn preprocessing_config(&self) -> PreprocessingConfig {
        PreprocessingConfig {
            target_size: [self.provider.output_size, self.provider.output_size],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [0.5, 0.5, 0.5],
        }
    }

    fn preprocess(&self, image: &DynamicImage) -> Result<Array4<f32>> {
        self.provider.record_call("preprocess".to_string());
        check_stage(
            self.provider.fail_at,
            self.provider.panic_at,
            MockStage::Preprocess,
            self.model,
        )?;
        crate::utils::ImagePreprocessor::preprocess_for_inference(
            image,
            &self.preprocessing_config(),
        )
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.provider.record_call("infer".to_string());
        check_stage(
            self.provider.fail_at,
            self.provider.panic_at,
            MockStage::Inference,
            self.model,
        )?;

        if input.dim().1 != 3 {
            return Err(BgRemovalError::inference(
                "Input tensor must have 3 channels (NCHW)",
            ));
        }
        if let Some(delay) = self.provider.infer_delay {
            std::thread::sleep(delay);
        }

        Ok(self.generate_mock_output())
    }
}

/// Decrement `counter` unless it is already zero
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
            remaining.checked_sub(1)
        })
        .is_ok()
}

fn check_stage(
    fail_at: Option<MockStage>,
    panic_at: Option<MockStage>,
    stage: MockStage,
    model: ModelId,
) -> Result<()> {
    if panic_at == Some(stage) {
        panic!("mock provider panicked during {:?}", stage);
    }
    if fail_at == Some(stage) {
        return Err(match stage {
            MockStage::LoadModel => {
                BgRemovalError::model_load_error(model.as_str(), "mock weights are unavailable")
            },
            MockStage::Preprocess => {
                BgRemovalError::processing("Mock preprocessing rejected the image")
            },
            MockStage::Inference => BgRemovalError::inference("Mock inference failed"),
        });
    }
    Ok(())
}
