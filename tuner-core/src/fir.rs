//! # FIR Filter Design Module
//!
//! Windowed-sinc synthesis of low-pass, high-pass and band-pass FIR filters.
//! The caller provides the coefficient buffer; its length is the number of taps.
//! The window is written into the buffer first and each tap is then scaled by
//! the ideal filter kernel, delayed by half the filter length.

use crate::float::Float;
use crate::math::{omega_norm, sinc};
use crate::window::{self, WindowType};

/// Writes a low-pass filter with cutoff `fc` into `coefficients`.
///
/// # Arguments
/// * `fc` - Cutoff frequency in Hz
/// * `sampling_frequency` - Sample rate in Hz
/// * `coefficients` - Output taps
/// * `window` - Window used to truncate the ideal kernel
pub fn low_pass<T: Float>(fc: T, sampling_frequency: T, coefficients: &mut [T], window: WindowType) {
    let a = omega_norm(fc, sampling_frequency);
    window::generate_into(window, coefficients);
    for_each_delayed_tap(coefficients, |n_delayed| a / T::PI() * sinc(n_delayed * a));
}

/// Writes a high-pass filter with cutoff `fc` into `coefficients`.
///
/// Built by spectral inversion: a unit impulse at the centre tap minus the
/// low-pass kernel.
pub fn high_pass<T: Float>(fc: T, sampling_frequency: T, coefficients: &mut [T], window: WindowType) {
    let a = omega_norm(fc, sampling_frequency);
    window::generate_into(window, coefficients);
    for_each_delayed_tap(coefficients, |n_delayed| {
        sinc(n_delayed * T::PI()) - a / T::PI() * sinc(n_delayed * a)
    });
}

/// Writes a band-pass filter passing `fc1..fc2` into `coefficients`.
///
/// # Arguments
/// * `fc1` - Lower cutoff frequency in Hz
/// * `fc2` - Upper cutoff frequency in Hz, must be above `fc1`
/// * `sampling_frequency` - Sample rate in Hz
/// * `coefficients` - Output taps
/// * `window` - Window used to truncate the ideal kernel
///
/// # Panics
/// * If `fc1 >= fc2`
pub fn band_pass<T: Float>(
    fc1: T,
    fc2: T,
    sampling_frequency: T,
    coefficients: &mut [T],
    window: WindowType,
) {
    assert!(fc1 < fc2, "band-pass cutoffs must be increasing: {fc1} >= {fc2}");
    let a0 = omega_norm(fc1, sampling_frequency);
    let a1 = omega_norm(fc2, sampling_frequency);
    window::generate_into(window, coefficients);
    for_each_delayed_tap(coefficients, |n_delayed| {
        a1 / T::PI() * sinc(n_delayed * a1) - a0 / T::PI() * sinc(n_delayed * a0)
    });
}

fn for_each_delayed_tap<T: Float>(coefficients: &mut [T], kernel: impl Fn(T) -> T) {
    let half = (coefficients.len() / 2) as f64;
    for (n, value) in coefficients.iter_mut().enumerate() {
        let n_delayed = T::cast(n as f64 - half);
        *value = *value * kernel(n_delayed);
    }
}
