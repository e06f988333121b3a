//! # Fast Fourier Transform (FFT) Module
//!
//! Forward real-to-complex transforms for the analysis pipeline, built on
//! RustFFT through `realfft`.
//!
//! ## Features
//! - [`FftEngine`]: owns a plan plus its input, output and scratch buffers
//! - [`FftContext`]: plan cache shared by every engine of one precision,
//!   created by the first engine and dropped with the last one
//! - Plan wisdom that can be exported to and imported from a [`PlanStore`]
//!
//! The plan itself is immutable and shared; only the buffers are per engine,
//! so two engines can execute the same plan concurrently.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Instant;

use log::{debug, info};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TunerError};
use crate::float::Float;
use crate::plan_store::PlanStore;

pub(crate) static F32_CONTEXT: Lazy<Mutex<Weak<FftContext<f32>>>> =
    Lazy::new(|| Mutex::new(Weak::new()));
pub(crate) static F64_CONTEXT: Lazy<Mutex<Weak<FftContext<f64>>>> =
    Lazy::new(|| Mutex::new(Weak::new()));

const WISDOM_FORMAT: u32 = 1;

/// How a plan may be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanFlags {
    /// Plan and time a trial transform, recording the result as wisdom.
    Measure,
    /// Only succeed when wisdom for this length was loaded or measured before.
    WisdomOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct WisdomEntry {
    len: usize,
    trial_nanos: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WisdomBlob {
    format: u32,
    precision: String,
    entries: Vec<WisdomEntry>,
}

/// Plans and wisdom shared by all engines of one precision.
///
/// Obtain it through [`FftContext::acquire`]. The registry only keeps a weak
/// reference, so the state lives exactly as long as some engine (or caller)
/// holds the returned `Arc`.
pub struct FftContext<T: Float> {
    plans: Mutex<HashMap<usize, Arc<dyn RealToComplex<T>>>>,
    wisdom: Mutex<BTreeMap<usize, WisdomEntry>>,
}

impl<T: Float> FftContext<T> {
    /// Returns the live context for `T`, creating it if none exists.
    pub fn acquire() -> Arc<Self> {
        let mut slot = T::fft_context_slot().lock();
        if let Some(context) = slot.upgrade() {
            return context;
        }

        info!("[FFT] Initializing {} transform context", T::PRECISION);
        let context = Arc::new(Self {
            plans: Mutex::new(HashMap::new()),
            wisdom: Mutex::new(BTreeMap::new()),
        });
        *slot = Arc::downgrade(&context);
        context
    }

    /// Number of live handles to the context for `T`.
    pub fn live_instances() -> usize {
        T::fft_context_slot().lock().strong_count()
    }

    /// Returns `true` if wisdom for a transform of `len` samples is known.
    pub fn has_wisdom(&self, len: usize) -> bool {
        self.wisdom.lock().contains_key(&len)
    }

    fn cached_plan(&self, len: usize) -> Arc<dyn RealToComplex<T>> {
        self.plans
            .lock()
            .entry(len)
            .or_insert_with(|| RealFftPlanner::<T>::new().plan_fft_forward(len))
            .clone()
    }

    fn plan(&self, len: usize, flags: PlanFlags) -> Result<Arc<dyn RealToComplex<T>>> {
        match flags {
            PlanFlags::WisdomOnly => {
                if !self.has_wisdom(len) {
                    return Err(TunerError::PlanUnavailable {
                        precision: T::PRECISION,
                        len,
                    });
                }
                debug!("[FFT] Reusing wisdom for {} plan of length {}", T::PRECISION, len);
                Ok(self.cached_plan(len))
            }
            PlanFlags::Measure => {
                let plan = self.cached_plan(len);

                let mut input = plan.make_input_vec();
                let mut output = plan.make_output_vec();
                let mut scratch = plan.make_scratch_vec();
                let started = Instant::now();
                plan.process_with_scratch(&mut input, &mut output, &mut scratch)?;
                let trial_nanos = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);

                info!(
                    "[FFT] Measured {} plan of length {}: {} ns per transform",
                    T::PRECISION,
                    len,
                    trial_nanos
                );
                self.wisdom
                    .lock()
                    .insert(len, WisdomEntry { len, trial_nanos });
                Ok(plan)
            }
        }
    }

    /// Serializes the known wisdom into an opaque blob.
    pub fn export_wisdom(&self) -> Result<Vec<u8>> {
        let blob = WisdomBlob {
            format: WISDOM_FORMAT,
            precision: T::PRECISION.to_owned(),
            entries: self.wisdom.lock().values().cloned().collect(),
        };
        Ok(serde_json::to_vec_pretty(&blob)?)
    }

    /// Merges wisdom from a blob produced by [`export_wisdom`](Self::export_wisdom).
    ///
    /// Returns the number of entries imported. Entries recorded for another
    /// precision are ignored.
    pub fn import_wisdom(&self, blob: &[u8]) -> Result<usize> {
        let blob: WisdomBlob = serde_json::from_slice(blob)?;
        if blob.format != WISDOM_FORMAT {
            return Err(TunerError::PlanCacheFormat(blob.format));
        }
        if blob.precision != T::PRECISION {
            debug!(
                "[FFT] Ignoring {} wisdom in {} context",
                blob.precision,
                T::PRECISION
            );
            return Ok(0);
        }

        let mut wisdom = self.wisdom.lock();
        let imported = blob.entries.len();
        for entry in blob.entries {
            wisdom.insert(entry.len, entry);
        }
        Ok(imported)
    }

    /// Loads wisdom saved under `name`. Returns `false` if nothing usable was found.
    pub fn load_plan(&self, store: &dyn PlanStore, name: &str) -> Result<bool> {
        match store.load(name)? {
            Some(blob) => {
                let imported = self.import_wisdom(&blob)?;
                info!("[FFT] Loaded {} wisdom entries from {}", imported, name);
                Ok(imported > 0)
            }
            None => Ok(false),
        }
    }

    /// Saves the current wisdom under `name`.
    pub fn save_plan(&self, store: &dyn PlanStore, name: &str) -> Result<()> {
        store.save(name, &self.export_wisdom()?)?;
        info!("[FFT] Saved {} wisdom to {}", T::PRECISION, name);
        Ok(())
    }
}

impl<T: Float> Drop for FftContext<T> {
    fn drop(&mut self) {
        info!("[FFT] Releasing {} transform context", T::PRECISION);
    }
}

/// A forward real-to-complex transform of fixed length with bound buffers.
///
/// [`execute`](Self::execute) transforms the engine's own input into its own
/// output. `realfft` uses the input as working storage, so its contents are
/// unspecified after a transform.
pub struct FftEngine<T: Float> {
    context: Arc<FftContext<T>>,
    plan: Arc<dyn RealToComplex<T>>,
    len: usize,
    input: Vec<T>,
    output: Vec<Complex<T>>,
    scratch: Vec<Complex<T>>,
}

impl<T: Float> FftEngine<T> {
    /// Builds an engine for transforms of `len` samples.
    pub fn new(len: usize, flags: PlanFlags) -> Result<Self> {
        Self::with_context(FftContext::acquire(), len, flags)
    }

    /// Builds an engine that shares an already acquired context.
    pub fn with_context(context: Arc<FftContext<T>>, len: usize, flags: PlanFlags) -> Result<Self> {
        if len < 2 {
            return Err(TunerError::InvalidConfig(format!(
                "transform length must be at least 2, got {len}"
            )));
        }

        let plan = context.plan(len, flags)?;
        let input = plan.make_input_vec();
        let output = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();

        Ok(Self {
            context,
            plan,
            len,
            input,
            output,
            scratch,
        })
    }

    /// Number of real input samples.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of complex output bins, `len / 2 + 1`.
    pub fn spectrum_len(&self) -> usize {
        self.len / 2 + 1
    }

    pub fn input_mut(&mut self) -> &mut [T] {
        &mut self.input
    }

    pub fn output(&self) -> &[Complex<T>] {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut [Complex<T>] {
        &mut self.output
    }

    pub fn context(&self) -> &Arc<FftContext<T>> {
        &self.context
    }

    /// Transforms the bound input into the bound output.
    pub fn execute(&mut self) -> Result<()> {
        self.plan
            .process_with_scratch(&mut self.input, &mut self.output, &mut self.scratch)?;
        Ok(())
    }

    /// Transforms caller-supplied buffers of the engine's shape.
    ///
    /// # Errors
    /// * [`TunerError::Fft`] if `input` is not `len()` long or `output` is not `spectrum_len()` long
    pub fn execute_with(&mut self, input: &mut [T], output: &mut [Complex<T>]) -> Result<()> {
        self.plan
            .process_with_scratch(input, output, &mut self.scratch)?;
        Ok(())
    }

    /// Saves the shared context's wisdom under `name`.
    pub fn save_plan(&self, store: &dyn PlanStore, name: &str) -> Result<()> {
        self.context.save_plan(store, name)
    }
}
