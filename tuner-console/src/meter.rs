//! # Cent Meter
//!
//! One-line text rendering of a reading: note, frequency and a needle on a
//! ±50 cent scale, labelled with the tuning zone.

use tuner_core::{AnalysisResult, CentZone};

/// Maximum cent deviation shown on the scale.
const METER_RANGE: f32 = 50.0;

/// Scale width in characters, odd so there is a centre column.
const METER_WIDTH: usize = 41;

pub fn render(result: &AnalysisResult<f32>) -> String {
    let clamped = result.cents.clamp(-METER_RANGE, METER_RANGE);
    let needle = ((clamped + METER_RANGE) / (2.0 * METER_RANGE) * (METER_WIDTH - 1) as f32).round()
        as usize;

    let scale: String = (0..METER_WIDTH)
        .map(|i| {
            if i == needle {
                '|'
            } else if i == METER_WIDTH / 2 {
                '+'
            } else {
                '-'
            }
        })
        .collect();

    format!(
        "{:<4} {:>8.2} Hz [{}] {:+6.1} cents  {}",
        result.note,
        result.frequency,
        scale,
        result.cents,
        zone_label(CentZone::classify(result.cents))
    )
}

fn zone_label(zone: CentZone) -> &'static str {
    match zone {
        CentZone::InTune => "IN TUNE",
        CentZone::Close => "close",
        CentZone::Off => "off",
        CentZone::Far => "far",
    }
}
