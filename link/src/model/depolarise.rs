use super::{Attempt, Model, Success};
use crate::{prob_max_mixed, BellState, Error, Herald};
use qnet_utils::DurationExt;
use rand::{Rng, RngCore};
use std::time::Duration;

/// Link that produces Φ+ pairs passed through a depolarising channel.
///
/// Every attempt lasts one cycle and succeeds independently with `prob_success`. When the first
/// cycle of a request succeeds, the state is ready halfway through the cycle and its label at the
/// end of it. Later successes make both ready at the end of their cycle.
#[derive(Clone, Debug)]
pub struct Depolarise {
    fidelity: f64,
    prob_success: f64,
    cycle: Duration,
}

impl Depolarise {
    pub fn new(fidelity: f64, prob_success: f64, cycle: Duration) -> Result<Self, Error> {
        if !(fidelity > 0.0 && fidelity <= 1.0) {
            return Err(Error::InvalidFidelity(fidelity));
        }
        if !(prob_success > 0.0 && prob_success <= 1.0) {
            return Err(Error::InvalidProbability(prob_success));
        }
        if cycle.is_zero() {
            return Err(Error::InvalidDuration(cycle.as_nanos_f64()));
        }
        Ok(Self {
            fidelity,
            prob_success,
            cycle,
        })
    }

    pub fn fidelity(&self) -> f64 {
        self.fidelity
    }

    /// Probability that the channel replaces the pair with the maximally mixed state.
    pub fn prob_max_mixed(&self) -> f64 {
        prob_max_mixed(self.fidelity)
    }
}

impl Model for Depolarise {
    fn attempt(&self, rng: &mut dyn RngCore, cycle: u64) -> Attempt {
        if !rng.gen_bool(self.prob_success) {
            return Attempt::failure(self.cycle);
        }
        let state = if cycle == 0 { self.cycle / 2 } else { self.cycle };
        Attempt {
            duration: self.cycle,
            success: Some(Success {
                state,
                label: self.cycle,
                herald: Herald::new(BellState::PhiPlus, self.fidelity),
            }),
        }
    }

    fn success_probability(&self) -> f64 {
        self.prob_success
    }

    fn cycle_time(&self) -> Duration {
        self.cycle
    }
}
