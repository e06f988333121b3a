//! # Window Functions Module
//!
//! Generates tables of window coefficients and applies them to sample buffers.
//! Used both for tapering the analysed audio frame and for windowing the
//! ideal sinc kernel when designing FIR filters.
//!
//! ## Features
//! - Gaussian, Triangular, Welch, Hann, Hamming, Blackman,
//!   Blackman-Nuttall and Blackman-Harris windows
//! - Pointwise application, optionally split across worker threads

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::float::Float;

/// Window shapes supported by [`generate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowType {
    Gauss,
    Triangular,
    Welch,
    Hann,
    Hamming,
    Blackman,
    BlackmanNuttall,
    BlackmanHarris,
}

impl WindowType {
    /// Every supported window, in declaration order.
    pub const ALL: [WindowType; 8] = [
        WindowType::Gauss,
        WindowType::Triangular,
        WindowType::Welch,
        WindowType::Hann,
        WindowType::Hamming,
        WindowType::Blackman,
        WindowType::BlackmanNuttall,
        WindowType::BlackmanHarris,
    ];
}

/// Generates `len` coefficients of the requested window.
///
/// # Panics
/// * If `len < 2`
pub fn generate<T: Float>(window: WindowType, len: usize) -> Vec<T> {
    let mut coefficients = vec![T::zero(); len];
    generate_into(window, &mut coefficients);
    coefficients
}

/// Fills `coefficients` with the requested window, overwriting its contents.
///
/// # Panics
/// * If `coefficients.len() < 2`
pub fn generate_into<T: Float>(window: WindowType, coefficients: &mut [T]) {
    assert!(
        coefficients.len() >= 2,
        "window length must be at least 2, got {}",
        coefficients.len()
    );

    match window {
        WindowType::Gauss => gaussian(coefficients),
        WindowType::Triangular => triangular(coefficients),
        WindowType::Welch => welch(coefficients),
        WindowType::Hann => hann(coefficients),
        WindowType::Hamming => cosine_sum(coefficients, &[25.0 / 46.0, 21.0 / 46.0]),
        WindowType::Blackman => cosine_sum(
            coefficients,
            &[7938.0 / 18608.0, 9240.0 / 18608.0, 1430.0 / 18608.0],
        ),
        WindowType::BlackmanNuttall => {
            cosine_sum(coefficients, &[0.3635819, 0.4891775, 0.1365995, 0.0106411])
        }
        WindowType::BlackmanHarris => {
            cosine_sum(coefficients, &[0.35875, 0.48829, 0.14128, 0.01168])
        }
    }
}

/// Multiplies `samples` by `window` elementwise.
///
/// With `thread_count > 1` the buffer is split into `thread_count` equal,
/// non-overlapping slices that are processed in parallel.
///
/// # Panics
/// * If the window and sample lengths differ
/// * If `thread_count` is zero, does not divide the length, or is not smaller than it
pub fn apply<T: Float>(samples: &mut [T], window: &[T], thread_count: usize) {
    assert_eq!(
        samples.len(),
        window.len(),
        "window length must match the number of samples"
    );
    let len = samples.len();
    assert!(
        thread_count > 0 && len % thread_count == 0 && len > thread_count,
        "{len} samples cannot be split across {thread_count} threads"
    );

    if thread_count == 1 {
        multiply(samples, window);
        return;
    }

    let step = len / thread_count;
    samples
        .par_chunks_mut(step)
        .zip(window.par_chunks(step))
        .for_each(|(slice, coefficients)| multiply(slice, coefficients));
}

fn multiply<T: Float>(samples: &mut [T], window: &[T]) {
    for (sample, &coefficient) in samples.iter_mut().zip(window) {
        *sample = *sample * coefficient;
    }
}

fn gaussian<T: Float>(out: &mut [T]) {
    let alpha = T::cast(2.5);
    let step = T::cast((out.len() - 1) as f64 / 2.0);
    let half = T::cast(-0.5);
    for (n, value) in out.iter_mut().enumerate() {
        let x = alpha * (T::cast(n as f64) - step) / step;
        *value = (half * x * x).exp();
    }
}

// Peak of 1 at N/2, falling to 0.5 at the edges.
fn triangular<T: Float>(out: &mut [T]) {
    let len = T::cast(out.len() as f64);
    let centre = len / T::cast(2.0);
    for (n, value) in out.iter_mut().enumerate() {
        *value = T::one() - ((T::cast(n as f64) - centre) / len).abs();
    }
}

fn welch<T: Float>(out: &mut [T]) {
    let centre = T::cast((out.len() - 1) as f64 / 2.0);
    for (n, value) in out.iter_mut().enumerate() {
        let x = (T::cast(n as f64) - centre) / centre;
        *value = T::one() - x * x;
    }
}

fn hann<T: Float>(out: &mut [T]) {
    let span = T::cast((out.len() - 1) as f64);
    for (n, value) in out.iter_mut().enumerate() {
        let s = (T::PI() * T::cast(n as f64) / span).sin();
        *value = s * s;
    }
}

/// Evaluates `a0 - a1*cos(2πn/(N-1)) + a2*cos(4πn/(N-1)) - ...`.
fn cosine_sum<T: Float>(out: &mut [T], coefficients: &[f64]) {
    let span = (out.len() - 1) as f64;
    for (n, value) in out.iter_mut().enumerate() {
        let phase = 2.0 * std::f64::consts::PI * n as f64 / span;
        let sum = coefficients
            .iter()
            .enumerate()
            .fold(0.0, |acc, (k, &a)| {
                let term = a * (k as f64 * phase).cos();
                if k % 2 == 0 { acc + term } else { acc - term }
            });
        *value = T::cast(sum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const LEN: usize = 1024;

    #[test]
    fn coefficients_stay_within_unit_interval() {
        for window in WindowType::ALL {
            let coefficients: Vec<f64> = generate(window, LEN);
            for (n, &c) in coefficients.iter().enumerate() {
                assert!(
                    (-1e-12..=1.0 + 1e-12).contains(&c),
                    "{window:?}[{n}] = {c} is outside [0, 1]"
                );
            }
        }
    }

    #[test]
    fn symmetric_windows_mirror_about_centre() {
        for window in WindowType::ALL {
            if window == WindowType::Triangular {
                continue;
            }
            let w: Vec<f64> = generate(window, LEN);
            for n in 0..LEN {
                assert_abs_diff_eq!(w[n], w[LEN - 1 - n], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn tapers_peak_at_the_centre() {
        for window in [
            WindowType::Hann,
            WindowType::Hamming,
            WindowType::Blackman,
            WindowType::BlackmanNuttall,
            WindowType::BlackmanHarris,
        ] {
            let w: Vec<f64> = generate(window, 257);
            assert_abs_diff_eq!(w[128], 1.0, epsilon = 1e-6);
            assert!(w[0] < 0.1, "{window:?} edge is {}", w[0]);
        }
    }

    #[test]
    fn triangular_follows_its_closed_form() {
        let w: Vec<f64> = generate(WindowType::Triangular, 8);
        assert_abs_diff_eq!(w[0], 0.5);
        assert_abs_diff_eq!(w[4], 1.0);
        assert_abs_diff_eq!(w[6], 0.75);
    }

    #[test]
    fn gaussian_edges_use_alpha() {
        let w: Vec<f64> = generate(WindowType::Gauss, 101);
        assert_abs_diff_eq!(w[50], 1.0);
        assert_abs_diff_eq!(w[0], (-0.5_f64 * 2.5 * 2.5).exp(), epsilon = 1e-12);
    }

    #[test]
    fn parallel_apply_matches_serial() {
        let window: Vec<f32> = generate(WindowType::BlackmanHarris, LEN);
        let signal: Vec<f32> = (0..LEN).map(|i| (i as f32 * 0.01).sin()).collect();

        let mut serial = signal.clone();
        apply(&mut serial, &window, 1);
        let mut parallel = signal.clone();
        apply(&mut parallel, &window, 4);

        assert_eq!(serial, parallel);
        assert_abs_diff_eq!(serial[100], signal[100] * window[100]);
    }

    #[test]
    #[should_panic]
    fn thread_count_must_divide_length() {
        let window: Vec<f64> = generate(WindowType::Hann, 10);
        let mut samples = vec![1.0; 10];
        apply(&mut samples, &window, 3);
    }

    #[test]
    #[should_panic]
    fn single_sample_window_is_rejected() {
        let _: Vec<f64> = generate(WindowType::Hann, 1);
    }
}
