//! Helpers for working with simulated time.
//!
//! Simulated time starts at [UNIX_EPOCH] and configuration values are expressed as
//! (possibly fractional) nanoseconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Convert a non-negative number of nanoseconds into a [Duration], rounding to the
/// nearest whole nanosecond.
///
/// Negative and non-finite values are clamped to zero.
pub fn nanos(value: f64) -> Duration {
    if !value.is_finite() || value <= 0.0 {
        return Duration::ZERO;
    }
    let rounded = value.round();
    if rounded >= u64::MAX as f64 {
        return Duration::from_nanos(u64::MAX);
    }
    Duration::from_nanos(rounded as u64)
}

/// Extension trait to express a [Duration] as fractional nanoseconds.
pub trait DurationExt {
    /// Number of nanoseconds as a float.
    fn as_nanos_f64(&self) -> f64;
}

impl DurationExt for Duration {
    fn as_nanos_f64(&self) -> f64 {
        self.as_nanos() as f64
    }
}

/// Extension trait to add methods to `std::time::SystemTime`
pub trait SystemTimeExt {
    /// Returns the duration since the Unix epoch.
    ///
    /// Panics if the system time is before the Unix epoch.
    fn epoch(&self) -> Duration;

    /// Returns the number of nanoseconds (rounded down) since the Unix epoch.
    ///
    /// Saturates at `u64::MAX`.
    fn epoch_nanos(&self) -> u64;
}

impl SystemTimeExt for SystemTime {
    fn epoch(&self) -> Duration {
        self.duration_since(UNIX_EPOCH)
            .expect("failed to get epoch time")
    }

    fn epoch_nanos(&self) -> u64 {
        self.epoch().as_nanos().min(u64::MAX as u128) as u64
    }
}
