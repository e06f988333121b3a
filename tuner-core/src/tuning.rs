//! # Musical Tuning Module
//!
//! Equal-temperament note tables and cent deviation measurements.
//!
//! ## Features
//! - Note table built outward from a configurable base tone (A4 = 440 Hz by default)
//! - Nearest-note lookup with cent deviation
//! - Note name to frequency lookups
//! - Cent zones for tuner displays

use std::collections::BTreeMap;

use crate::config::check_range;
use crate::error::Result;
use crate::float::Float;
use crate::math::cents_between;

/// Chromatic note names, starting from C.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Position of A, the base tone, within [`NOTE_NAMES`].
const BASE_NOTE_INDEX: i32 = 9;
/// Octave of the base tone.
const BASE_OCTAVE: i32 = 4;

/// A single musical note with its name and frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct Note<T> {
    /// Note name (e.g., "A4", "C#3")
    pub name: String,
    /// Frequency in Hz
    pub frequency: T,
}

/// The note nearest to a measured frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteMatch<T> {
    pub name: String,
    /// Frequency of the matched note in Hz
    pub frequency: T,
    /// Deviation of the measurement from the note (positive = sharp)
    pub cents: T,
}

/// Equal-temperament notes covering a frequency range, sorted by frequency.
///
/// The first entry lies below the range minimum and the last above the range
/// maximum, so every in-range frequency has a neighbour on both sides.
#[derive(Debug, Clone)]
pub struct NoteTable<T> {
    notes: Vec<Note<T>>,
    by_name: BTreeMap<String, usize>,
}

impl<T: Float> NoteTable<T> {
    /// Builds the table by stepping semitones outward from `base_frequency`.
    ///
    /// # Arguments
    /// * `base_frequency` - Frequency of A4 in Hz
    /// * `min_frequency` - Lowest frequency that will be looked up
    /// * `max_frequency` - Highest frequency that will be looked up
    ///
    /// # Errors
    /// * [`TunerError::InvalidFrequencyRange`](crate::TunerError::InvalidFrequencyRange)
    ///   unless `0 < min_frequency < base_frequency < max_frequency`
    pub fn build(base_frequency: T, min_frequency: T, max_frequency: T) -> Result<Self> {
        check_range(
            min_frequency.as_f64(),
            max_frequency.as_f64(),
            base_frequency.as_f64(),
        )?;

        let base = base_frequency.as_f64();
        let min = min_frequency.as_f64();
        let max = max_frequency.as_f64();

        let mut lowest = 0;
        while semitone_frequency(base, lowest) >= min {
            lowest -= 1;
        }
        let mut highest = 0;
        while semitone_frequency(base, highest) <= max {
            highest += 1;
        }

        let notes: Vec<Note<T>> = (lowest..=highest)
            .map(|k| Note {
                name: note_name(k),
                frequency: T::cast(semitone_frequency(base, k)),
            })
            .collect();
        let by_name = notes
            .iter()
            .enumerate()
            .map(|(i, note)| (note.name.clone(), i))
            .collect();

        Ok(Self { notes, by_name })
    }

    /// All notes in increasing frequency order.
    pub fn notes(&self) -> &[Note<T>] {
        &self.notes
    }

    /// Frequency of a note by name (e.g., "C#3").
    pub fn frequency_of(&self, name: &str) -> Option<T> {
        self.by_name.get(name).map(|&i| self.notes[i].frequency)
    }

    /// Finds the note closest to `frequency` and the deviation in cents.
    ///
    /// Returns `None` if `frequency` is not bracketed by two table entries.
    /// A frequency exactly between two notes resolves to the lower one.
    pub fn nearest(&self, frequency: T) -> Option<NoteMatch<T>> {
        if !frequency.is_finite() {
            return None;
        }
        // First entry not below `frequency`
        let high_index = self.notes.partition_point(|note| note.frequency < frequency);
        let high = self.notes.get(high_index)?;

        let chosen = if high.frequency == frequency {
            high
        } else {
            let low = self.notes.get(high_index.checked_sub(1)?)?;
            if high.frequency - frequency < frequency - low.frequency {
                high
            } else {
                low
            }
        };

        Some(NoteMatch {
            name: chosen.name.clone(),
            frequency: chosen.frequency,
            cents: cents_between(frequency, chosen.frequency),
        })
    }
}

fn semitone_frequency(base: f64, semitones: i32) -> f64 {
    base * 2.0_f64.powf(semitones as f64 / 12.0)
}

/// Name of the note `semitones` away from A4; octaves change between B and C.
fn note_name(semitones: i32) -> String {
    let position = BASE_NOTE_INDEX + semitones;
    let octave = BASE_OCTAVE + position.div_euclid(12);
    format!("{}{}", NOTE_NAMES[position.rem_euclid(12) as usize], octave)
}

/// Tuning accuracy bands for displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CentZone {
    /// Within ±2 cents
    InTune,
    /// Within ±5 cents
    Close,
    /// Within ±15 cents
    Off,
    /// More than 15 cents away
    Far,
}

impl CentZone {
    pub fn classify<T: Float>(cents: T) -> Self {
        let magnitude = cents.abs().as_f64();
        if magnitude <= 2.0 {
            CentZone::InTune
        } else if magnitude <= 5.0 {
            CentZone::Close
        } else if magnitude <= 15.0 {
            CentZone::Off
        } else {
            CentZone::Far
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunerError;
    use approx::assert_abs_diff_eq;

    fn table() -> NoteTable<f64> {
        NoteTable::build(440.0, 80.0, 1200.0).unwrap()
    }

    #[test]
    fn base_tone_maps_to_a4_without_deviation() {
        let found = table().nearest(440.0).unwrap();
        assert_eq!(found.name, "A4");
        assert_abs_diff_eq!(found.cents, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn one_semitone_up_is_a_sharp_4() {
        let found = table().nearest(440.0 * 2.0_f64.powf(1.0 / 12.0)).unwrap();
        assert_eq!(found.name, "A#4");
        assert_abs_diff_eq!(found.cents, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn octaves_change_between_b_and_c() {
        let table = table();
        assert_eq!(table.nearest(523.25).unwrap().name, "C5");
        assert_eq!(table.nearest(493.88).unwrap().name, "B4");
        assert_eq!(table.nearest(110.0).unwrap().name, "A2");
        assert_abs_diff_eq!(table.frequency_of("C4").unwrap(), 261.6256, epsilon = 1e-3);
    }

    #[test]
    fn table_brackets_the_whole_range() {
        let table = table();
        let notes = table.notes();
        assert!(notes.first().unwrap().frequency < 80.0);
        assert!(notes.last().unwrap().frequency > 1200.0);
        assert!(notes.windows(2).all(|w| w[0].frequency < w[1].frequency));
        assert!(table.nearest(80.0).is_some());
        assert!(table.nearest(1200.0).is_some());
    }

    #[test]
    fn cents_are_signed() {
        let table = table();
        let sharp = table.nearest(445.0).unwrap();
        assert_eq!(sharp.name, "A4");
        assert_abs_diff_eq!(sharp.cents, 1200.0 * (445.0_f64 / 440.0).log2(), epsilon = 1e-9);
        assert!(table.nearest(435.0).unwrap().cents < 0.0);
    }

    #[test]
    fn lookups_outside_the_table_return_none() {
        let table = table();
        assert!(table.nearest(10.0).is_none());
        assert!(table.nearest(20000.0).is_none());
        assert!(table.nearest(f64::NAN).is_none());
    }

    #[test]
    fn invalid_range_is_rejected() {
        assert!(matches!(
            NoteTable::<f32>::build(440.0, 500.0, 1200.0),
            Err(TunerError::InvalidFrequencyRange { .. })
        ));
    }

    #[test]
    fn zones_follow_display_bands() {
        assert_eq!(CentZone::classify(1.5_f32), CentZone::InTune);
        assert_eq!(CentZone::classify(-4.0_f32), CentZone::Close);
        assert_eq!(CentZone::classify(12.0_f64), CentZone::Off);
        assert_eq!(CentZone::classify(-40.0_f64), CentZone::Far);
    }
}
