//! Segmentation model identifiers and their preprocessing parameters

use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of segmentation models the inference provider can load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelId {
    /// `briaai/RMBG-2.0`
    #[serde(rename = "briaai/RMBG-2.0")]
    Rmbg20,
    /// `briaai/RMBG-1.4`
    #[serde(rename = "briaai/RMBG-1.4")]
    Rmbg14,
    /// `Xenova/modnet`
    #[serde(rename = "Xenova/modnet")]
    Modnet,
}

impl ModelId {
    /// Every known model, in selection order. The first entry is the default.
    pub const ALL: [ModelId; 3] = [ModelId::Rmbg20, ModelId::Rmbg14, ModelId::Modnet];

    /// Repository-style identifier handed to the inference provider
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ModelId::Rmbg20 => "briaai/RMBG-2.0",
            ModelId::Rmbg14 => "briaai/RMBG-1.4",
            ModelId::Modnet => "Xenova/modnet",
        }
    }

    /// Preprocessing parameters the model was trained with
    #[must_use]
    pub fn preprocessing_config(self) -> PreprocessingConfig {
        match self {
            ModelId::Rmbg20 => PreprocessingConfig {
                target_size: [1024, 1024],
                normalization_mean: [0.485, 0.456, 0.406],
                normalization_std: [0.229, 0.224, 0.225],
            },
            ModelId::Rmbg14 => PreprocessingConfig {
                target_size: [1024, 1024],
                normalization_mean: [0.5, 0.5, 0.5],
                normalization_std: [1.0, 1.0, 1.0],
            },
            ModelId::Modnet => PreprocessingConfig {
                target_size: [512, 512],
                normalization_mean: [0.5, 0.5, 0.5],
                normalization_std: [0.5, 0.5, 0.5],
            },
        }
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self::ALL[0]
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|model| model.as_str() == s)
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Unknown model '{}'. Known models: {}",
                    s,
                    Self::ALL.map(ModelId::as_str).join(", ")
                ))
            })
    }
}

/// Input tensor layout and normalization expected by a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Model input size as `[width, height]`
    pub target_size: [u32; 2],
    /// Per-channel mean subtracted after scaling to 0-1
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation divided after mean subtraction
    pub normalization_std: [f32; 3],
}
