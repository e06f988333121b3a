//! Error types for the tuner core.

use thiserror::Error;

/// Tuner core errors
#[derive(Debug, Error)]
pub enum TunerError {
    /// Configuration value out of its allowed domain
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Base tone is not strictly inside the analysed range
    #[error("Invalid frequency range: {min} - {max} Hz with base tone {base} Hz")]
    InvalidFrequencyRange { min: f64, max: f64, base: f64 },

    /// Sampling frequency cannot represent the requested range
    #[error("Invalid sampling frequency: {0} Hz")]
    InvalidSamplingFrequency(f64),

    /// Wisdom-only planning was requested but no cached wisdom covers this length
    #[error("No cached FFT plan for {precision} transform of length {len}")]
    PlanUnavailable { precision: &'static str, len: usize },

    /// Plan cache blob was written by an incompatible version
    #[error("Unsupported plan cache format version {0}")]
    PlanCacheFormat(u32),

    /// FFT buffers did not match the plan
    #[error("FFT execution failed: {0}")]
    Fft(#[from] realfft::FftError),

    /// Plan cache or config file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Plan cache or config blob could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No capture device or no usable stream format
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// The capture stream could not be built, started or stopped
    #[error("Audio stream error: {0}")]
    AudioStream(String),
}

/// Result type for tuner core operations
pub type Result<T> = std::result::Result<T, TunerError>;
