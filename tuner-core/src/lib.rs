//! Streaming pitch detection for instrument tuning.
//!
//! Captured audio is cycled through a small [`BufferPool`]; each filled
//! buffer is windowed, transformed, band-pass filtered in the frequency domain
//! and reduced to a fundamental frequency with a harmonic product spectrum.
//! The result is mapped to the nearest equal-tempered note. This crate is
//! headless and contains no UI code.

pub mod analyzer;
pub mod audio;
pub mod buffer_pool;
pub mod config;
pub mod error;
pub mod fft;
pub mod fir;
pub mod float;
pub mod math;
pub mod pipeline;
pub mod pitch;
pub mod plan_store;
pub mod tuning;
pub mod window;

pub use analyzer::{AnalyzerState, AnalyzerStats, PitchAnalyzer};
pub use buffer_pool::{BufferPool, Occupancy, PooledBuffer};
pub use config::{Dispatch, TunerConfig};
pub use error::{Result, TunerError};
pub use fft::{FftContext, FftEngine, PlanFlags};
pub use float::Float;
pub use pipeline::Tuner;
pub use plan_store::{DirectoryPlanStore, MemoryPlanStore, PlanStore};
pub use tuning::{CentZone, NoteTable};
pub use window::WindowType;

/// A single reading: the nearest note to the detected pitch.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult<T> {
    /// Name of the nearest note (e.g., "A4")
    pub note: String,
    /// Detected frequency in Hz
    pub frequency: T,
    /// Deviation from the note in cents (positive = sharp)
    pub cents: T,
}
