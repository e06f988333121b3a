//! # Pitch Analyzer Module
//!
//! Turns filled sample buffers into note readings.
//!
//! ## Pipeline
//! 1. Window the buffer and zero-pad it to the transform length
//! 2. Forward FFT
//! 3. Multiply by the band-pass filter's frequency response
//! 4. Harmonic product spectrum over the configured range, optionally refined between bins
//! 5. Nearest note and cent deviation, delivered to the registered callback
//!
//! The transform length is `buffer_len + filter_len - 1`, so the spectral
//! product equals a linear convolution with the filter.

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use rustfft::num_complex::Complex;

use crate::AnalysisResult;
use crate::config::{TunerConfig, check_range};
use crate::error::{Result, TunerError};
use crate::fft::{FftContext, FftEngine, PlanFlags};
use crate::fir;
use crate::float::Float;
use crate::pitch::{bin_to_frequency, harmonic_product_spectrum, refine_peak};
use crate::plan_store::PlanStore;
use crate::tuning::NoteTable;
use crate::window;

/// Result sink registered with [`PitchAnalyzer::set_sound_analyzed_callback`].
pub type SoundAnalyzedCallback<T> = Box<dyn FnMut(AnalysisResult<T>) + Send>;

/// Lifecycle of a [`PitchAnalyzer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerState {
    /// Constructed, or the last initialization failed
    Idle,
    Initializing,
    /// Filter, plan, window and note table are built
    Ready,
    /// A buffer is being analysed
    Analyzing,
    Destroyed,
}

/// Counters over the analyzer's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalyzerStats {
    /// Buffers that produced a reading
    pub analyzed: u64,
    /// Buffers without a usable in-range estimate
    pub skipped: u64,
}

/// Frequency bounds, base tone and sample rate the analyzer is built for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    pub min_frequency: f64,
    pub max_frequency: f64,
    pub base_frequency: f64,
    pub sampling_frequency: f64,
}

/// Everything `initialize` derives from the tuning.
struct Prepared<T: Float> {
    tuning: Tuning,
    notes: NoteTable<T>,
    window: Vec<T>,
    response: Vec<Complex<T>>,
    engine: FftEngine<T>,
    magnitudes: Vec<f64>,
    first_bin: usize,
    last_bin: usize,
}

/// Streaming pitch analyzer.
///
/// Call [`initialize`](Self::initialize) and register a callback before the
/// first [`analyze`](Self::analyze).
pub struct PitchAnalyzer<T: Float> {
    config: TunerConfig,
    store: Arc<dyn PlanStore>,
    state: AnalyzerState,
    base_frequency: f64,
    min_frequency: f64,
    max_frequency: f64,
    sampling_frequency: Option<f64>,
    prepared: Option<Prepared<T>>,
    callback: Option<SoundAnalyzedCallback<T>>,
    stats: AnalyzerStats,
}

impl<T: Float> PitchAnalyzer<T> {
    /// Creates an idle analyzer. FFT wisdom is loaded from and saved to `store`.
    ///
    /// # Errors
    /// * Any validation error of [`TunerConfig::validate`]
    pub fn new(config: TunerConfig, store: Arc<dyn PlanStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            base_frequency: config.base_frequency,
            min_frequency: config.min_frequency,
            max_frequency: config.max_frequency,
            sampling_frequency: None,
            config,
            store,
            state: AnalyzerState::Idle,
            prepared: None,
            callback: None,
            stats: AnalyzerStats::default(),
        })
    }

    /// Builds the note table, band-pass filter, FFT plan and window.
    ///
    /// The plan is taken from cached wisdom when possible; otherwise a new
    /// plan is measured and the wisdom saved. On error the analyzer is left
    /// [`Idle`](AnalyzerState::Idle).
    ///
    /// # Errors
    /// * [`TunerError::InvalidFrequencyRange`] unless `0 < min < base < max`
    /// * [`TunerError::InvalidSamplingFrequency`] unless `max` is below the Nyquist frequency
    /// * FFT plan construction failures
    pub fn initialize(
        &mut self,
        min_frequency: f64,
        max_frequency: f64,
        base_frequency: f64,
        sampling_frequency: f64,
    ) -> Result<()> {
        self.min_frequency = min_frequency;
        self.max_frequency = max_frequency;
        self.base_frequency = base_frequency;
        self.sampling_frequency = Some(sampling_frequency);

        self.state = AnalyzerState::Initializing;
        self.prepared = None;
        let tuning = Tuning {
            min_frequency,
            max_frequency,
            base_frequency,
            sampling_frequency,
        };
        match self.prepare(tuning) {
            Ok(prepared) => {
                info!(
                    "[ANALYZER] Ready: {}-{} Hz around {} Hz at {} Hz, transform length {}",
                    min_frequency,
                    max_frequency,
                    base_frequency,
                    sampling_frequency,
                    prepared.engine.len()
                );
                self.prepared = Some(prepared);
                self.state = AnalyzerState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!("[ANALYZER] Initialization failed: {}", e);
                self.state = AnalyzerState::Idle;
                Err(e)
            }
        }
    }

    fn prepare(&self, tuning: Tuning) -> Result<Prepared<T>> {
        check_range(
            tuning.min_frequency,
            tuning.max_frequency,
            tuning.base_frequency,
        )?;
        let fs = tuning.sampling_frequency;
        if !(fs.is_finite() && fs > 0.0) || tuning.max_frequency >= fs / 2.0 {
            return Err(TunerError::InvalidSamplingFrequency(fs));
        }

        let notes = NoteTable::build(
            T::cast(tuning.base_frequency),
            T::cast(tuning.min_frequency),
            T::cast(tuning.max_frequency),
        )?;

        let transform_len = self.config.transform_len();
        let mut engine = self.plan_engine(transform_len)?;

        let mut taps = vec![T::zero(); self.config.filter_len()];
        fir::band_pass(
            T::cast(tuning.min_frequency),
            T::cast(tuning.max_frequency),
            T::cast(fs),
            &mut taps,
            self.config.filter_window,
        );
        let input = engine.input_mut();
        input.fill(T::zero());
        input[..taps.len()].copy_from_slice(&taps);
        engine.execute()?;
        let response = engine.output().to_vec();
        assert_eq!(
            response.len(),
            engine.spectrum_len(),
            "filter response must match the transform's spectrum length"
        );

        let window = window::generate(self.config.window, self.config.buffer_len);
        let n = transform_len as f64;
        let first_bin = ((tuning.min_frequency * n / fs).ceil() as usize).max(1);
        let last_bin = (tuning.max_frequency * n / fs).floor() as usize;

        Ok(Prepared {
            tuning,
            notes,
            window,
            magnitudes: vec![0.0; response.len()],
            response,
            engine,
            first_bin,
            last_bin,
        })
    }

    /// Cached wisdom first; a measured and saved plan when the cache is
    /// missing, unreadable or does not cover `transform_len`.
    fn plan_engine(&self, transform_len: usize) -> Result<FftEngine<T>> {
        let context = FftContext::<T>::acquire();
        let key = self.plan_key();
        let store = self.store.as_ref();

        let loaded = match context.load_plan(store, &key) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("[ANALYZER] Plan cache {} unusable, measuring instead: {}", key, e);
                false
            }
        };

        if loaded {
            match FftEngine::with_context(Arc::clone(&context), transform_len, PlanFlags::WisdomOnly)
            {
                Ok(engine) => {
                    debug!("[ANALYZER] Using cached plan from {}", key);
                    return Ok(engine);
                }
                Err(TunerError::PlanUnavailable { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let engine = FftEngine::with_context(context, transform_len, PlanFlags::Measure)?;
        if let Err(e) = engine.save_plan(store, &key) {
            warn!("[ANALYZER] Could not save plan cache {}: {}", key, e);
        }
        Ok(engine)
    }

    /// Plan store key; one blob per precision.
    pub fn plan_key(&self) -> String {
        format!("{}-{}", T::PRECISION, self.config.plan_cache_key)
    }

    /// Registers the sink that receives every reading.
    ///
    /// # Panics
    /// If a callback is already registered.
    pub fn set_sound_analyzed_callback(
        &mut self,
        callback: impl FnMut(AnalysisResult<T>) + Send + 'static,
    ) {
        assert!(
            self.callback.is_none(),
            "a sound-analyzed callback is already registered"
        );
        self.callback = Some(Box::new(callback));
    }

    /// Analyses one buffer of `buffer_len` samples.
    ///
    /// Invokes the callback once if an in-range pitch is found and not at
    /// all otherwise.
    ///
    /// # Panics
    /// * If the analyzer is not initialized
    /// * If no callback is registered
    /// * If `samples` is not `buffer_len` long
    pub fn analyze(&mut self, samples: &[T]) -> Result<()> {
        assert_eq!(
            self.state,
            AnalyzerState::Ready,
            "analyze called on an analyzer that is not initialized"
        );
        assert!(
            self.callback.is_some(),
            "analyze called without a sound-analyzed callback"
        );
        assert_eq!(
            samples.len(),
            self.config.buffer_len,
            "buffer length does not match the configured buffer_len"
        );
        let Some(prepared) = self.prepared.as_mut() else {
            unreachable!("ready analyzer without prepared state");
        };

        self.state = AnalyzerState::Analyzing;
        let outcome = prepared.estimate(samples, &self.config);
        self.state = AnalyzerState::Ready;

        match outcome? {
            Some(result) => {
                self.stats.analyzed += 1;
                if let Some(callback) = self.callback.as_mut() {
                    callback(result);
                }
            }
            None => self.stats.skipped += 1,
        }
        Ok(())
    }

    /// Changes the sample rate, rebuilding everything if already initialized.
    pub fn set_sampling_frequency(&mut self, sampling_frequency: f64) -> Result<()> {
        self.sampling_frequency = Some(sampling_frequency);
        self.reinitialize()
    }

    /// Changes the base tone, rebuilding everything if already initialized.
    pub fn set_base_frequency(&mut self, base_frequency: f64) -> Result<()> {
        self.base_frequency = base_frequency;
        self.reinitialize()
    }

    /// Changes the reported range, rebuilding everything if already initialized.
    pub fn set_frequency_range(&mut self, min_frequency: f64, max_frequency: f64) -> Result<()> {
        self.min_frequency = min_frequency;
        self.max_frequency = max_frequency;
        self.reinitialize()
    }

    fn reinitialize(&mut self) -> Result<()> {
        if self.state != AnalyzerState::Ready {
            return Ok(());
        }
        match self.sampling_frequency {
            Some(fs) => self.initialize(
                self.min_frequency,
                self.max_frequency,
                self.base_frequency,
                fs,
            ),
            None => Ok(()),
        }
    }

    pub fn state(&self) -> AnalyzerState {
        self.state
    }

    pub fn stats(&self) -> AnalyzerStats {
        self.stats
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    /// The tuning the analyzer is currently built for.
    pub fn tuning(&self) -> Option<Tuning> {
        self.prepared.as_ref().map(|prepared| prepared.tuning)
    }

    pub fn notes(&self) -> Option<&NoteTable<T>> {
        self.prepared.as_ref().map(|prepared| &prepared.notes)
    }

    /// Precomputed band-pass filter response, `transform_len / 2 + 1` bins.
    pub fn filter_response(&self) -> Option<&[Complex<T>]> {
        self.prepared
            .as_ref()
            .map(|prepared| prepared.response.as_slice())
    }
}

impl<T: Float> Prepared<T> {
    fn estimate(
        &mut self,
        samples: &[T],
        config: &TunerConfig,
    ) -> Result<Option<AnalysisResult<T>>> {
        let input = self.engine.input_mut();
        let (signal, padding) = input.split_at_mut(samples.len());
        signal.copy_from_slice(samples);
        padding.fill(T::zero());
        window::apply(signal, &self.window, config.window_threads);

        self.engine.execute()?;
        for ((bin, response), magnitude) in self
            .engine
            .output()
            .iter()
            .zip(&self.response)
            .zip(self.magnitudes.iter_mut())
        {
            *magnitude = (*bin * *response).norm().as_f64();
        }

        let Some(bin) = harmonic_product_spectrum(
            &self.magnitudes,
            self.first_bin,
            self.last_bin,
            config.harmonics,
        ) else {
            debug!("[ANALYZER] No spectral peak in range");
            return Ok(None);
        };

        let position = if config.refine_peak {
            refine_peak(&self.magnitudes, bin)
        } else {
            bin as f64
        };
        let frequency = bin_to_frequency(
            position,
            self.tuning.sampling_frequency,
            self.engine.len(),
        );
        if !(frequency > 0.0
            && frequency >= self.tuning.min_frequency
            && frequency <= self.tuning.max_frequency)
        {
            debug!("[ANALYZER] Estimate {:.2} Hz out of range", frequency);
            return Ok(None);
        }

        let frequency = T::cast(frequency);
        let Some(found) = self.notes.nearest(frequency) else {
            return Ok(None);
        };
        debug!(
            "[ANALYZER] {:.2} Hz -> {} ({:+.1} cents)",
            frequency, found.name, found.cents
        );
        Ok(Some(AnalysisResult {
            note: found.name,
            frequency,
            cents: found.cents,
        }))
    }
}

impl<T: Float> fmt::Debug for PitchAnalyzer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PitchAnalyzer")
            .field("state", &self.state)
            .field("tuning", &self.tuning())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<T: Float> Drop for PitchAnalyzer<T> {
    fn drop(&mut self) {
        self.state = AnalyzerState::Destroyed;
        info!(
            "[ANALYZER] Destroyed after {} readings, {} skipped buffers",
            self.stats.analyzed, self.stats.skipped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan_store::MemoryPlanStore;
    use approx::assert_abs_diff_eq;
    use crossbeam_channel::{Receiver, unbounded};

    const FS: f64 = 8000.0;

    fn config() -> TunerConfig {
        TunerConfig {
            buffer_len: 8192,
            filter_len: Some(2049),
            plan_cache_key: "analyzer-tests.json".to_owned(),
            ..TunerConfig::default()
        }
    }

    fn sine(frequency: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|n| (2.0 * std::f64::consts::PI * frequency * n as f64 / FS).sin())
            .collect()
    }

    fn ready_analyzer() -> (PitchAnalyzer<f64>, Receiver<AnalysisResult<f64>>) {
        let mut analyzer = PitchAnalyzer::new(config(), Arc::new(MemoryPlanStore::new())).unwrap();
        analyzer.initialize(80.0, 1200.0, 440.0, FS).unwrap();
        let (tx, rx) = unbounded();
        analyzer.set_sound_analyzed_callback(move |result| {
            let _ = tx.send(result);
        });
        (analyzer, rx)
    }

    #[test]
    fn initialization_builds_a_matching_filter_response() {
        let (analyzer, _) = ready_analyzer();
        assert_eq!(analyzer.state(), AnalyzerState::Ready);
        let bins = analyzer.config().transform_len() / 2 + 1;
        assert_eq!(analyzer.filter_response().unwrap().len(), bins);
        assert_eq!(analyzer.notes().unwrap().frequency_of("A4"), Some(440.0));
    }

    #[test]
    fn a_tone_is_reported_once_as_its_note() {
        let (mut analyzer, rx) = ready_analyzer();
        analyzer.analyze(&sine(440.0, 8192)).unwrap();

        let results: Vec<_> = rx.try_iter().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].note, "A4");
        assert!(results[0].cents.abs() < 5.0);
        assert_abs_diff_eq!(results[0].frequency, 440.0, epsilon = 0.5);
        assert_eq!(analyzer.stats().analyzed, 1);
    }

    #[test]
    fn silence_is_skipped_without_a_callback() {
        let (mut analyzer, rx) = ready_analyzer();
        analyzer.analyze(&vec![0.0; 8192]).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(
            analyzer.stats(),
            AnalyzerStats {
                analyzed: 0,
                skipped: 1
            }
        );
    }

    #[test]
    fn measured_wisdom_is_saved_and_survives_a_corrupt_cache() {
        let store = Arc::new(MemoryPlanStore::new());
        let key = "f64-analyzer-tests.json";
        store.save(key, b"not wisdom").unwrap();

        let mut analyzer = PitchAnalyzer::<f64>::new(config(), store.clone()).unwrap();
        assert_eq!(analyzer.plan_key(), key);
        analyzer.initialize(80.0, 1200.0, 440.0, FS).unwrap();

        let blob = store.load(key).unwrap().unwrap();
        let context = FftContext::<f64>::acquire();
        assert!(context.import_wisdom(&blob).unwrap() > 0);
    }

    #[test]
    fn a_second_analyzer_reuses_saved_wisdom() {
        let store = Arc::new(MemoryPlanStore::new());
        let key = "f64-analyzer-tests.json";

        let mut first = PitchAnalyzer::<f64>::new(config(), store.clone()).unwrap();
        first.initialize(80.0, 1200.0, 440.0, FS).unwrap();
        let saved = store.load(key).unwrap().unwrap();

        let mut second = PitchAnalyzer::<f64>::new(config(), store.clone()).unwrap();
        second.initialize(100.0, 1000.0, 440.0, FS).unwrap();
        assert_eq!(store.load(key).unwrap().unwrap(), saved);
    }

    #[test]
    fn invalid_tunings_leave_the_analyzer_idle() {
        let mut analyzer =
            PitchAnalyzer::<f32>::new(config(), Arc::new(MemoryPlanStore::new())).unwrap();
        assert!(matches!(
            analyzer.initialize(80.0, 1200.0, 440.0, 2000.0),
            Err(TunerError::InvalidSamplingFrequency(_))
        ));
        assert_eq!(analyzer.state(), AnalyzerState::Idle);
        assert!(matches!(
            analyzer.initialize(500.0, 1200.0, 440.0, FS),
            Err(TunerError::InvalidFrequencyRange { .. })
        ));
        assert_eq!(analyzer.state(), AnalyzerState::Idle);
    }

    #[test]
    fn changing_the_base_tone_rebuilds_the_note_table() {
        let (mut analyzer, rx) = ready_analyzer();
        analyzer.set_base_frequency(442.0).unwrap();
        assert_eq!(analyzer.state(), AnalyzerState::Ready);
        assert_eq!(analyzer.tuning().unwrap().base_frequency, 442.0);

        analyzer.analyze(&sine(442.0, 8192)).unwrap();
        let result = rx.try_recv().unwrap();
        assert_eq!(result.note, "A4");
        assert!(result.cents.abs() < 2.0);
    }

    #[test]
    fn failed_reconfiguration_requires_a_new_initialize() {
        let (mut analyzer, _) = ready_analyzer();
        assert!(analyzer.set_sampling_frequency(1000.0).is_err());
        assert_eq!(analyzer.state(), AnalyzerState::Idle);
        assert!(analyzer.tuning().is_none());
    }

    #[test]
    fn setters_before_initialize_only_record_values() {
        let mut analyzer =
            PitchAnalyzer::<f64>::new(config(), Arc::new(MemoryPlanStore::new())).unwrap();
        analyzer.set_frequency_range(100.0, 1000.0).unwrap();
        assert_eq!(analyzer.state(), AnalyzerState::Idle);
    }

    #[test]
    #[should_panic(expected = "not initialized")]
    fn analyze_before_initialize_panics() {
        let mut analyzer =
            PitchAnalyzer::<f64>::new(config(), Arc::new(MemoryPlanStore::new())).unwrap();
        analyzer.set_sound_analyzed_callback(|_| {});
        let _ = analyzer.analyze(&vec![0.0; 8192]);
    }

    #[test]
    #[should_panic(expected = "without a sound-analyzed callback")]
    fn analyze_without_callback_panics() {
        let mut analyzer =
            PitchAnalyzer::<f64>::new(config(), Arc::new(MemoryPlanStore::new())).unwrap();
        analyzer.initialize(80.0, 1200.0, 440.0, FS).unwrap();
        let _ = analyzer.analyze(&vec![0.0; 8192]);
    }

    #[test]
    #[should_panic(expected = "buffer length")]
    fn wrong_buffer_length_panics() {
        let (mut analyzer, _) = ready_analyzer();
        let _ = analyzer.analyze(&vec![0.0; 100]);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn second_callback_panics() {
        let (mut analyzer, _) = ready_analyzer();
        analyzer.set_sound_analyzed_callback(|_| {});
    }

    #[test]
    fn invalid_configs_are_rejected_up_front() {
        let config = TunerConfig {
            harmonics: 9,
            ..config()
        };
        assert!(matches!(
            PitchAnalyzer::<f64>::new(config, Arc::new(MemoryPlanStore::new())),
            Err(TunerError::InvalidConfig(_))
        ));
    }
}
