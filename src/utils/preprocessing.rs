//! Shared image preprocessing utilities
//!
//! Converts a decoded image into the normalized NCHW tensor a segmentation
//! model expects.

use crate::{
    error::{BgRemovalError, Result},
    models::PreprocessingConfig,
    services::ProcessingStage,
};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::Array4;

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Preprocess image for model inference
    ///
    /// This function handles:
    /// - RGB conversion
    /// - Resize to the model input size (aspect ratio is not preserved; the
    ///   resulting mask is stretched back to the original size afterwards)
    /// - Normalization to tensor format (NCHW)
    ///
    /// # Errors
    /// - Zero-sized target in the preprocessing configuration
    /// - Zero-sized input image
    /// - Zero normalization standard deviation
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<Array4<f32>> {
        let [target_width, target_height] = preprocessing_config.target_size;
        if target_width == 0 || target_height == 0 {
            return Err(BgRemovalError::invalid_config(format!(
                "Model target size {}x{} is empty",
                target_width, target_height
            )));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(BgRemovalError::processing_stage_error(
                ProcessingStage::Preprocessing.name(),
                "image has no pixels",
                Some(&format!("{}x{}", image.width(), image.height())),
            ));
        }
        if preprocessing_config.normalization_std.iter().any(|s| *s == 0.0) {
            return Err(BgRemovalError::invalid_config(
                "Normalization standard deviation must be non-zero",
            ));
        }

        let rgb_image = image.to_rgb8();
        let resized = if rgb_image.dimensions() == (target_width, target_height) {
            rgb_image
        } else {
            image::imageops::resize(
                &rgb_image,
                target_width,
                target_height,
                FilterType::Triangle,
            )
        };

        Ok(Self::canvas_to_tensor(&resized, preprocessing_config))
    }

    /// Convert canvas to normalized tensor
    fn canvas_to_tensor(canvas: &RgbImage, preprocessing_config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match canvas size
        for (y, row) in canvas.rows().enumerate() {
            for (x, pixel) in row.enumerate() {
                for channel in 0..3 {
                    tensor[[0, channel, y, x]] = (f32::from(pixel[channel]) / 255.0
                        - preprocessing_config.normalization_mean[channel])
                        / preprocessing_config.normalization_std[channel];
                }
            }
        }

        tensor
    }
}
