//! Image and payload encoding service
//!
//! Keeps byte-level concerns (decoding submissions, PNG encoding of results,
//! base64 text encoding for the record store) out of the pipeline itself.

use crate::{
    error::{BgRemovalError, Result},
    services::ProcessingStage,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;

/// Service for decoding inputs and encoding outputs
pub struct ImageIOService;

impl ImageIOService {
    /// Decode an encoded image (format detected from content)
    ///
    /// # Errors
    /// Returns a processing error describing the input when decoding fails
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(BgRemovalError::processing_stage_error(
                ProcessingStage::Decoding.name(),
                "image data is empty",
                None,
            ));
        }

        image::load_from_memory(bytes).map_err(|e| {
            let format = image::guess_format(bytes)
                .map(|f| format!("{:?}", f))
                .unwrap_or_else(|_| "unknown".to_string());
            BgRemovalError::processing_stage_error(
                ProcessingStage::Decoding.name(),
                &format!("Failed to decode image: {}", e),
                Some(&format!("format: {}, size: {} bytes", format, bytes.len())),
            )
        })
    }

    /// Encode an RGBA image as PNG
    ///
    /// # Errors
    /// Returns an encoding error if the PNG writer fails
    pub fn encode_png(image: RgbaImage) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .map_err(|e| BgRemovalError::encoding(format!("Failed to encode PNG: {}", e)))?;
        Ok(buffer)
    }

    /// Encode bytes as standard base64 text
    #[must_use]
    pub fn to_base64(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    /// Decode standard base64 text back into bytes
    ///
    /// # Errors
    /// Returns a storage error if the text is not valid base64
    pub fn from_base64(text: &str) -> Result<Vec<u8>> {
        STANDARD
            .decode(text)
            .map_err(|e| BgRemovalError::storage(format!("Invalid base64 payload: {}", e)))
    }
}
