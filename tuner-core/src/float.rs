//! Generic [Float] type which acts as a stand-in for `f32` or `f64`.

use std::fmt::{Debug, Display};
use std::iter::Sum;

use parking_lot::Mutex;
use rustfft::FftNum;
use rustfft::num_traits::{Float as NumFloat, FloatConst};
use std::sync::Weak;

use crate::fft::FftContext;

/// Samples, window coefficients, filter taps and spectra are all stored as [Float]s.
/// A [Float] is either `f32` or `f64`.
pub trait Float: Display + Debug + Default + Sum + NumFloat + FloatConst + FftNum {
    /// Precision tag used as part of FFT plan-cache entries.
    const PRECISION: &'static str;

    /// Converts an `f64` constant or intermediate into this type.
    fn cast(value: f64) -> Self;

    /// Widens this value to `f64`.
    fn as_f64(self) -> f64;

    /// Slot holding the shared FFT context for this precision.
    #[doc(hidden)]
    fn fft_context_slot() -> &'static Mutex<Weak<FftContext<Self>>>;
}

impl Float for f32 {
    const PRECISION: &'static str = "f32";

    fn cast(value: f64) -> Self {
        value as f32
    }

    fn as_f64(self) -> f64 {
        self as f64
    }

    fn fft_context_slot() -> &'static Mutex<Weak<FftContext<Self>>> {
        &crate::fft::F32_CONTEXT
    }
}

impl Float for f64 {
    const PRECISION: &'static str = "f64";

    fn cast(value: f64) -> Self {
        value
    }

    fn as_f64(self) -> f64 {
        self
    }

    fn fft_context_slot() -> &'static Mutex<Weak<FftContext<Self>>> {
        &crate::fft::F64_CONTEXT
    }
}
