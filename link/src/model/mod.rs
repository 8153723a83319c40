//! Entanglement generation attempt models.
//!
//! A [Model] turns link parameters into a sequence of discrete generation attempts. Each
//! [Attempt] has a duration and, if it succeeded, the offsets (from the start of the attempt) at
//! which the state and its label become available together with the announced [Herald].
//!
//! Models draw all of their randomness from the provided generator, so a seeded runtime produces
//! the same sequence of attempts on every run.

use crate::Herald;
use qnet_utils::{nanos, DurationExt};
use rand::RngCore;
use std::time::Duration;

mod depolarise;
pub use depolarise::Depolarise;
mod heralded;
pub use heralded::{Arm, Detector, Heralded};
mod perfect;
pub use perfect::{Perfect, DEFAULT_STATE_DELAY};

/// Result of a successful attempt.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Success {
    /// Offset from the start of the attempt at which the state is ready.
    pub state: Duration,

    /// Offset from the start of the attempt at which the label is ready.
    ///
    /// Never earlier than `state` and never later than the attempt duration.
    pub label: Duration,

    pub herald: Herald,
}

/// A single generation attempt.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Attempt {
    pub duration: Duration,
    pub success: Option<Success>,
}

impl Attempt {
    pub fn failure(duration: Duration) -> Self {
        Self {
            duration,
            success: None,
        }
    }
}

/// Generates entanglement between the two endpoints of a link.
pub trait Model: Send + Sync + 'static {
    /// Perform one attempt.
    ///
    /// `cycle` is the number of attempts already made for the request being served (0 for the
    /// first attempt of a request).
    fn attempt(&self, rng: &mut dyn RngCore, cycle: u64) -> Attempt;

    /// Probability that a single attempt succeeds.
    fn success_probability(&self) -> f64;

    /// Duration of a single attempt.
    fn cycle_time(&self) -> Duration;

    /// Expected time to produce one pair.
    ///
    /// Returns `None` if no pair can be produced or if the expectation does not fit in a
    /// [Duration].
    fn expected(&self) -> Option<Duration> {
        let probability = self.success_probability();
        if probability <= 0.0 {
            return None;
        }
        let expected = self.cycle_time().as_nanos_f64() / probability;
        if !expected.is_finite() || expected >= u64::MAX as f64 {
            return None;
        }
        Some(nanos(expected))
    }
}
