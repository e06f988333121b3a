//! Small numeric helpers shared by the window, filter and analysis code.

use crate::float::Float;

/// Unnormalized sinc function, `sin(x) / x`.
///
/// The removable singularity at zero is defined as `1`.
pub fn sinc<T: Float>(x: T) -> T {
    if x == T::zero() { T::one() } else { x.sin() / x }
}

/// Converts a frequency in Hz to normalized angular frequency (radians per sample).
pub fn omega_norm<T: Float>(frequency: T, sampling_frequency: T) -> T {
    T::cast(2.0) * T::PI() * frequency / sampling_frequency
}

/// Returns `true` when `value` is a power of two greater than zero.
pub fn is_positive_power_of_two(value: usize) -> bool {
    value != 0 && value & (value - 1) == 0
}

/// Converts a frequency ratio into cents (1200 per octave).
pub fn cents_between<T: Float>(frequency: T, reference: T) -> T {
    T::cast(1200.0) * (frequency / reference).log2()
}
