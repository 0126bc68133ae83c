//! Mask compositing
//!
//! Turns an original pixel buffer and a single-channel opacity mask into an
//! RGBA image whose alpha channel is the mask. Pure functions, no state.

use crate::{
    error::{BgRemovalError, Result},
    services::ProcessingStage,
};
use image::{DynamicImage, GrayImage, RgbaImage};
use ndarray::Array4;

/// Raw interleaved pixel data with 1 (gray), 3 (RGB) or 4 (RGBA) channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap raw bytes, checking that the length matches the layout
    ///
    /// # Errors
    /// - Channel count outside {1, 3, 4}
    /// - Data length different from `width * height * channels`
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self> {
        if !matches!(channels, 1 | 3 | 4) {
            return Err(BgRemovalError::unsupported_format(format!(
                "{} channel pixel buffers (expected 1, 3 or 4)",
                channels
            )));
        }
        let expected = width as usize * height as usize * usize::from(channels);
        if data.len() != expected {
            return Err(BgRemovalError::processing(format!(
                "Pixel buffer holds {} bytes but {}x{}x{} needs {}",
                data.len(),
                width,
                height,
                channels,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Take the pixels of a decoded image without changing its channel layout
    ///
    /// 8-bit gray, RGB and RGBA images are used as-is. Gray+alpha and
    /// higher bit depths are converted to 8-bit RGBA or RGB.
    #[must_use]
    pub fn from_image(image: &DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        let (channels, data) = match image {
            DynamicImage::ImageLuma8(gray) => (1, gray.as_raw().clone()),
            DynamicImage::ImageRgb8(rgb) => (3, rgb.as_raw().clone()),
            DynamicImage::ImageRgba8(rgba) => (4, rgba.as_raw().clone()),
            other if other.color().has_alpha() => (4, other.to_rgba8().into_raw()),
            other => (3, other.to_rgb8().into_raw()),
        };
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Single-channel foreground opacity mask (0 = background, 255 = foreground)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    pub data: Vec<u8>,
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// Build a mask from a `[1, 1, H, W]` probability tensor
    ///
    /// Values are clamped to 0-1 and scaled to 0-255.
    ///
    /// # Errors
    /// Returns a processing error for any other tensor shape
    pub fn from_tensor(tensor: &Array4<f32>) -> Result<Self> {
        let (batch, channels, height, width) = tensor.dim();
        if batch != 1 || channels != 1 || height == 0 || width == 0 {
            return Err(BgRemovalError::processing_stage_error(
                ProcessingStage::Postprocessing.name(),
                &format!(
                    "Invalid output tensor shape [{}, {}, {}, {}], expected [1, 1, H, W]",
                    batch, channels, height, width
                ),
                None,
            ));
        }

        let data = tensor
            .iter()
            .map(|value| (value.clamp(0.0, 1.0) * 255.0) as u8)
            .collect();

        Ok(Self::new(data, (width as u32, height as u32)))
    }

    /// Resize the mask with the given filter
    ///
    /// # Errors
    /// Returns a processing error if the mask data does not match its dimensions
    pub fn resize(
        &self,
        new_width: u32,
        new_height: u32,
        filter: image::imageops::FilterType,
    ) -> Result<SegmentationMask> {
        if self.dimensions == (new_width, new_height) {
            return Ok(self.clone());
        }
        let current = self.to_image()?;
        let resized = image::imageops::resize(&current, new_width, new_height, filter);
        Ok(Self::new(resized.into_raw(), (new_width, new_height)))
    }

    /// View the mask as a grayscale image
    ///
    /// # Errors
    /// Returns a processing error if the mask data does not match its dimensions
    pub fn to_image(&self) -> Result<GrayImage> {
        let (width, height) = self.dimensions;
        GrayImage::from_raw(width, height, self.data.clone()).ok_or_else(|| {
            BgRemovalError::processing(format!(
                "Mask holds {} bytes, which does not fit {}x{}",
                self.data.len(),
                width,
                height
            ))
        })
    }
}

/// Composite `original` with `mask` into an RGBA image
///
/// Color channels are expanded to RGBA (gray is replicated into R, G and B),
/// then every alpha byte is replaced by the corresponding mask byte. Any
/// original alpha is discarded.
///
/// # Errors
/// - Unsupported channel count
/// - Mask dimensions differ from the original
/// - Buffer lengths inconsistent with their dimensions
pub fn apply_mask(original: &PixelBuffer, mask: &SegmentationMask) -> Result<RgbaImage> {
    if mask.dimensions != original.dimensions() {
        return Err(BgRemovalError::processing(format!(
            "Mask is {}x{} but image is {}x{}",
            mask.dimensions.0, mask.dimensions.1, original.width, original.height
        )));
    }

    if !matches!(original.channels, 1 | 3 | 4) {
        return Err(BgRemovalError::unsupported_format(format!(
            "{} channel pixel buffers (expected 1, 3 or 4)",
            original.channels
        )));
    }

    let pixel_count = original.pixel_count();
    let channels = usize::from(original.channels);
    if original.data.len() != pixel_count * channels || mask.data.len() != pixel_count {
        return Err(BgRemovalError::processing(
            "Pixel or mask buffer length does not match its dimensions",
        ));
    }

    let mut rgba = Vec::with_capacity(pixel_count * 4);
    let pixels = original.data.chunks_exact(channels);
    for (pixel, &alpha) in pixels.zip(&mask.data) {
        match *pixel {
            [gray] => rgba.extend_from_slice(&[gray, gray, gray, alpha]),
            [r, g, b] | [r, g, b, _] => rgba.extend_from_slice(&[r, g, b, alpha]),
            _ => {
                return Err(BgRemovalError::unsupported_format(format!(
                    "{} channel pixel buffers (expected 1, 3 or 4)",
                    original.channels
                )))
            },
        }
    }

    RgbaImage::from_raw(original.width, original.height, rgba)
        .ok_or_else(|| BgRemovalError::internal("Composited buffer does not fit its dimensions"))
}
