//! # Pitch Detection Module
//!
//! Fundamental-frequency estimation on a magnitude spectrum.
//!
//! ## Features
//! - Harmonic product spectrum (HPS) over a bin range
//! - Sub-harmonic rejection for pure and near-pure tones
//! - Parabolic interpolation for sub-bin accuracy

/// Magnitudes are floored at this fraction of the peak before multiplying,
/// so a missing harmonic attenuates a candidate instead of zeroing it.
pub const HPS_FLOOR_RATIO: f64 = 1e-3;

/// A candidate bin must itself reach this fraction of the peak magnitude.
pub const HPS_GATE_RATIO: f64 = 0.1;

/// Half-width, in bins, of the neighbourhood searched by [`refine_peak`].
pub const REFINE_RADIUS: usize = 4;

/// Estimates the fundamental bin with a harmonic product spectrum.
///
/// For each candidate `n` in `first_bin..=last_bin` the magnitudes at
/// `n, 2n, ..., harmonics·n` are multiplied; the candidate with the largest
/// product wins, the first one on ties. Candidates whose highest harmonic
/// falls past the end of the spectrum are not considered.
///
/// # Arguments
/// * `magnitudes` - Magnitude spectrum, bin 0 being DC
/// * `first_bin` - Lowest candidate bin
/// * `last_bin` - Highest candidate bin
/// * `harmonics` - Number of harmonics in the product, at least 1
///
/// # Returns
/// * `Some(bin)` - Estimated fundamental bin
/// * `None` - Empty candidate range or a silent spectrum
pub fn harmonic_product_spectrum(
    magnitudes: &[f64],
    first_bin: usize,
    last_bin: usize,
    harmonics: usize,
) -> Option<usize> {
    assert!(harmonics >= 1, "harmonic product needs at least one harmonic");
    if magnitudes.is_empty() {
        return None;
    }

    let first = first_bin.max(1);
    let last = last_bin.min((magnitudes.len() - 1) / harmonics);
    if first > last {
        return None;
    }

    let peak = magnitudes[first..=last]
        .iter()
        .copied()
        .fold(0.0_f64, f64::max);
    if !(peak.is_finite() && peak > 0.0) {
        return None;
    }

    let floor = peak * HPS_FLOOR_RATIO;
    let gate = peak * HPS_GATE_RATIO;

    let mut best: Option<(usize, f64)> = None;
    for n in first..=last {
        if magnitudes[n] < gate {
            continue;
        }
        let product = (1..=harmonics)
            .map(|h| magnitudes[h * n].max(floor))
            .product::<f64>();
        if best.is_none_or(|(_, best_product)| product > best_product) {
            best = Some((n, product));
        }
    }

    best.map(|(bin, _)| bin)
}

/// Refines a bin estimate to a fractional bin.
///
/// Finds the strongest bin within [`REFINE_RADIUS`] of `bin` and fits a
/// parabola through the log magnitudes of it and its two neighbours.
///
/// # Returns
/// * The interpolated bin position; `bin` itself when no fit is possible
pub fn refine_peak(magnitudes: &[f64], bin: usize) -> f64 {
    if magnitudes.len() < 3 || bin >= magnitudes.len() {
        return bin as f64;
    }

    let start = bin.saturating_sub(REFINE_RADIUS).max(1);
    let end = (bin + REFINE_RADIUS).min(magnitudes.len() - 2);
    if start > end {
        return bin as f64;
    }

    let peak_bin = (start..=end)
        .max_by(|&a, &b| magnitudes[a].total_cmp(&magnitudes[b]))
        .unwrap_or(bin);

    let y1 = magnitudes[peak_bin - 1].ln();
    let y2 = magnitudes[peak_bin].ln();
    let y3 = magnitudes[peak_bin + 1].ln();
    if !y1.is_finite() || !y2.is_finite() || !y3.is_finite() {
        return peak_bin as f64;
    }

    let denominator = 2.0 * y2 - y1 - y3;
    if denominator.abs() < 1e-12 {
        return peak_bin as f64;
    }

    let shift = (y3 - y1) / (2.0 * denominator);
    if shift.abs() > 1.0 {
        return peak_bin as f64;
    }
    peak_bin as f64 + shift
}

/// Converts a (possibly fractional) bin index to Hz.
pub fn bin_to_frequency(bin: f64, sampling_frequency: f64, transform_len: usize) -> f64 {
    bin * sampling_frequency / transform_len as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Gaussian-shaped peaks at the given bins.
    fn spectrum(len: usize, peaks: &[(f64, f64)]) -> Vec<f64> {
        (0..len)
            .map(|k| {
                peaks
                    .iter()
                    .map(|&(centre, height)| {
                        let d = k as f64 - centre;
                        height * (-d * d / 4.0).exp()
                    })
                    .sum::<f64>()
                    + 1e-9
            })
            .collect()
    }

    #[test]
    fn harmonic_series_points_at_the_fundamental() {
        let magnitudes = spectrum(2048, &[(100.0, 0.6), (200.0, 1.0), (300.0, 0.7)]);
        assert_eq!(harmonic_product_spectrum(&magnitudes, 40, 600, 3), Some(100));
    }

    #[test]
    fn pure_tone_is_not_reported_at_its_subharmonic() {
        let magnitudes = spectrum(4096, &[(400.0, 1.0)]);
        assert_eq!(harmonic_product_spectrum(&magnitudes, 50, 1000, 3), Some(400));
    }

    #[test]
    fn five_harmonics_are_supported() {
        let magnitudes = spectrum(
            4096,
            &[(80.0, 1.0), (160.0, 0.8), (240.0, 0.6), (320.0, 0.5), (400.0, 0.4)],
        );
        assert_eq!(harmonic_product_spectrum(&magnitudes, 30, 700, 5), Some(80));
    }

    #[test]
    fn ties_resolve_to_the_first_candidate() {
        let magnitudes = vec![1.0; 64];
        assert_eq!(harmonic_product_spectrum(&magnitudes, 3, 10, 3), Some(3));
    }

    #[test]
    fn silence_and_empty_ranges_yield_nothing() {
        assert_eq!(harmonic_product_spectrum(&vec![0.0; 256], 10, 80, 3), None);
        assert_eq!(harmonic_product_spectrum(&vec![1.0; 256], 90, 80, 3), None);
        assert_eq!(harmonic_product_spectrum(&[], 0, 10, 3), None);
    }

    #[test]
    fn candidates_are_limited_by_the_highest_harmonic() {
        // Only bins up to 99 / 3 = 33 have a third harmonic inside the spectrum.
        let magnitudes = spectrum(100, &[(20.0, 1.0), (60.0, 1.0)]);
        assert_eq!(harmonic_product_spectrum(&magnitudes, 10, 90, 3), Some(20));
    }

    #[test]
    fn refinement_recovers_an_off_grid_peak() {
        let magnitudes = spectrum(512, &[(120.3, 1.0)]);
        assert_abs_diff_eq!(refine_peak(&magnitudes, 121), 120.3, epsilon = 1e-6);
    }

    #[test]
    fn refinement_handles_spectrum_edges() {
        let magnitudes = vec![1.0, 2.0, 1.0];
        assert_abs_diff_eq!(refine_peak(&magnitudes, 1), 1.0);
        assert_eq!(refine_peak(&magnitudes, 10), 10.0);
    }

    #[test]
    fn bins_convert_to_hertz() {
        assert_abs_diff_eq!(bin_to_frequency(512.0, 48000.0, 81920), 300.0);
    }
}
