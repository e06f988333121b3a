//! # Configuration Module
//!
//! Settings for the analysis pipeline. Everything here is fixed for the
//! lifetime of an analyzer except the frequency bounds, base tone and sampling
//! frequency, which can be changed through the analyzer's setters.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunerError};
use crate::math::is_positive_power_of_two;
use crate::window::WindowType;

/// Highest number of harmonics the HPS estimator multiplies.
pub const MAX_HARMONICS: usize = 5;

/// How filled buffers reach the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dispatch {
    /// Analyse on the producer's thread before returning.
    Inline,
    /// Hand the buffer to a background worker and return immediately.
    Worker,
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Lowest frequency reported, in Hz
    pub min_frequency: f64,
    /// Highest frequency reported, in Hz
    pub max_frequency: f64,
    /// Reference tone A4, in Hz
    pub base_frequency: f64,
    /// Samples per analysed buffer; a power of two
    pub buffer_len: usize,
    /// Band-pass filter taps; defaults to `buffer_len / 4 + 1`
    pub filter_len: Option<usize>,
    /// Number of buffers cycling between capture and analysis (2..=4)
    pub pool_depth: usize,
    /// Window applied to each analysed buffer
    pub window: WindowType,
    /// Window used to design the band-pass filter
    pub filter_window: WindowType,
    /// Harmonics multiplied by the HPS estimator (1..=5)
    pub harmonics: usize,
    /// Threads used to apply the analysis window
    pub window_threads: usize,
    /// Interpolate the estimate between FFT bins
    pub refine_peak: bool,
    /// File name of the FFT wisdom blob in the plan store
    pub plan_cache_key: String,
    pub dispatch: Dispatch,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            min_frequency: 80.0,
            max_frequency: 1200.0,
            base_frequency: 440.0,
            buffer_len: 1 << 16,
            filter_len: None,
            pool_depth: 3,
            window: WindowType::BlackmanHarris,
            filter_window: WindowType::BlackmanHarris,
            harmonics: 3,
            window_threads: 1,
            refine_peak: true,
            plan_cache_key: "fft_wisdom.json".to_owned(),
            dispatch: Dispatch::Worker,
        }
    }
}

impl TunerConfig {
    /// Number of band-pass filter taps.
    pub fn filter_len(&self) -> usize {
        self.filter_len.unwrap_or(self.buffer_len / 4 + 1)
    }

    /// Transform length: buffer plus filter tail, so the frequency-domain
    /// product is a linear rather than circular convolution.
    pub fn transform_len(&self) -> usize {
        self.buffer_len + self.filter_len() - 1
    }

    /// Checks every field against its allowed domain.
    pub fn validate(&self) -> Result<()> {
        check_range(self.min_frequency, self.max_frequency, self.base_frequency)?;

        if !is_positive_power_of_two(self.buffer_len) || self.buffer_len < 2 {
            return invalid(format!(
                "buffer_len must be a power of two >= 2, got {}",
                self.buffer_len
            ));
        }
        if self.filter_len() < 2 {
            return invalid(format!("filter_len must be >= 2, got {}", self.filter_len()));
        }
        if !(2..=4).contains(&self.pool_depth) {
            return invalid(format!("pool_depth must be in 2..=4, got {}", self.pool_depth));
        }
        if !(1..=MAX_HARMONICS).contains(&self.harmonics) {
            return invalid(format!(
                "harmonics must be in 1..={MAX_HARMONICS}, got {}",
                self.harmonics
            ));
        }
        let threads = self.window_threads;
        if threads == 0 || self.buffer_len % threads != 0 || self.buffer_len <= threads {
            return invalid(format!(
                "window_threads {threads} must divide buffer_len {} and be smaller than it",
                self.buffer_len
            ));
        }
        if self.plan_cache_key.is_empty() {
            return invalid("plan_cache_key must not be empty".to_owned());
        }
        Ok(())
    }

    /// Reads a JSON config file. Missing fields take their default values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the config as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Requires `0 < min < base < max`.
pub(crate) fn check_range(min: f64, max: f64, base: f64) -> Result<()> {
    if min > 0.0 && min < base && base < max && max.is_finite() {
        Ok(())
    } else {
        Err(TunerError::InvalidFrequencyRange { min, max, base })
    }
}

fn invalid(message: String) -> Result<()> {
    Err(TunerError::InvalidConfig(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TunerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.filter_len(), 16385);
        assert_eq!(config.transform_len(), 81920);
    }

    #[test]
    fn base_tone_must_be_inside_the_range() {
        let config = TunerConfig {
            base_frequency: 60.0,
            ..TunerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TunerError::InvalidFrequencyRange { .. })
        ));
    }

    #[test]
    fn rejects_out_of_domain_fields() {
        let cases = [
            TunerConfig { buffer_len: 48000, ..TunerConfig::default() },
            TunerConfig { pool_depth: 1, ..TunerConfig::default() },
            TunerConfig { harmonics: 6, ..TunerConfig::default() },
            TunerConfig { window_threads: 3, ..TunerConfig::default() },
            TunerConfig { filter_len: Some(1), ..TunerConfig::default() },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(TunerError::InvalidConfig(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn partial_json_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tuner.json");
        fs::write(&path, r#"{ "base_frequency": 442.0, "window": "Hann" }"#).unwrap();

        let config = TunerConfig::load(&path).unwrap();
        assert_eq!(config.base_frequency, 442.0);
        assert_eq!(config.window, WindowType::Hann);
        assert_eq!(config.buffer_len, TunerConfig::default().buffer_len);

        config.save(&path).unwrap();
        assert_eq!(TunerConfig::load(&path).unwrap(), config);
    }
}
