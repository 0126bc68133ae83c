//! Inference provider implementations
//!
//! Real model runtimes are supplied by the embedding application through
//! [`InferenceProvider`](crate::inference::InferenceProvider). This module
//! ships the mock provider used by the test suite and benchmarks.

pub mod test_utils;

pub use self::test_utils::{MockMask, MockProvider, MockStage};
