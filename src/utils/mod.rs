//! Utility modules

pub mod preprocessing;

pub use preprocessing::ImagePreprocessor;
