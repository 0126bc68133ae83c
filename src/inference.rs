//! Inference provider abstraction
//!
//! Model loading and tensor inference live outside this crate. A provider
//! loads a model by identifier and hands back a backend that can turn an
//! image into a `[1, 1, H, W]` foreground probability tensor.

use crate::{
    error::Result,
    models::{ModelId, PreprocessingConfig},
    utils::ImagePreprocessor,
};
use image::DynamicImage;
use ndarray::Array4;

/// Loads models for the execution unit
///
/// Implementations are shared with the execution unit thread, so they must be
/// `Send + Sync`. Loading may report free-form status text (download
/// progress and the like) through `progress`.
pub trait InferenceProvider: Send + Sync {
    /// Prepare the runtime on the execution unit thread, before it signals
    /// readiness
    ///
    /// # Errors
    /// - Runtime could not be set up; the unit exits without becoming ready
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Load the given model
    ///
    /// # Errors
    /// - Model files missing or unreadable
    /// - Runtime initialization failures
    fn load_model(
        &self,
        model: ModelId,
        progress: &dyn Fn(&str),
    ) -> Result<Box<dyn InferenceBackend>>;
}

/// A loaded model ready to run inference
pub trait InferenceBackend: Send {
    /// Model this backend was loaded for
    fn model(&self) -> ModelId;

    /// Input layout and normalization expected by the model
    fn preprocessing_config(&self) -> PreprocessingConfig {
        self.model().preprocessing_config()
    }

    /// Convert a decoded image into the model input tensor
    ///
    /// # Errors
    /// - Invalid preprocessing configuration
    /// - Images the model cannot accept
    fn preprocess(&self, image: &DynamicImage) -> Result<Array4<f32>> {
        ImagePreprocessor::preprocess_for_inference(image, &self.preprocessing_config())
    }

    /// Run inference, producing a `[1, 1, H, W]` probability tensor in 0-1
    ///
    /// # Errors
    /// - Model inference failures
    /// - Invalid input tensor dimensions
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;
}
