use super::{Attempt, Model, Success};
use crate::{Error, Herald};
use qnet_utils::DurationExt;
use rand::RngCore;
use std::time::Duration;

/// Default time to produce a perfect pair.
pub const DEFAULT_STATE_DELAY: Duration = Duration::from_nanos(1_000);

/// Idealized link that produces a perfect Φ+ pair on every attempt.
#[derive(Clone, Debug)]
pub struct Perfect {
    delay: Duration,
}

impl Perfect {
    pub fn new(delay: Duration) -> Result<Self, Error> {
        if delay.is_zero() {
            return Err(Error::InvalidDuration(delay.as_nanos_f64()));
        }
        Ok(Self { delay })
    }
}

impl Default for Perfect {
    fn default() -> Self {
        Self {
            delay: DEFAULT_STATE_DELAY,
        }
    }
}

impl Model for Perfect {
    fn attempt(&self, _: &mut dyn RngCore, _: u64) -> Attempt {
        Attempt {
            duration: self.delay,
            success: Some(Success {
                state: self.delay,
                label: self.delay,
                herald: Herald::perfect(),
            }),
        }
    }

    fn success_probability(&self) -> f64 {
        1.0
    }

    fn cycle_time(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_always_succeeds() {
        let mut rng = StdRng::seed_from_u64(0);
        let model = Perfect::default();
        for cycle in 0..10 {
            let attempt = model.attempt(&mut rng, cycle);
            let success = attempt.success.unwrap();
            assert_eq!(attempt.duration, DEFAULT_STATE_DELAY);
            assert_eq!(success.state, DEFAULT_STATE_DELAY);
            assert_eq!(success.label, DEFAULT_STATE_DELAY);
            assert_eq!(success.herald, Herald::perfect());
        }
        assert_eq!(model.expected(), Some(DEFAULT_STATE_DELAY));
    }

    #[test]
    fn test_zero_delay() {
        assert!(matches!(
            Perfect::new(Duration::ZERO),
            Err(Error::InvalidDuration(_))
        ));
    }
}
