//! Service layer
//!
//! Byte encoding and progress reporting, kept apart from the processing
//! pipeline so both can be swapped or observed in tests.

pub mod io;
pub mod progress;

pub use io::ImageIOService;
pub use progress::{
    ChannelProgressReporter, NoOpProgressReporter, ProcessingStage, ProgressReporter,
    RecordingProgressReporter,
};
