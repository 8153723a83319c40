use super::{Attempt, Model, Success};
use crate::{BellState, Error, Herald};
use qnet_utils::nanos;
use rand::{Rng, RngCore};
use std::time::Duration;

/// Parameters of one arm of a heralded link (from an endpoint to the midpoint).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Arm {
    /// Fiber length to the midpoint (km).
    pub length: f64,

    /// Probability of losing the photon before it enters the fiber.
    pub p_loss_init: f64,

    /// Attenuation of the fiber (dB/km).
    pub p_loss_length: f64,

    /// Speed of light in the fiber (km/s).
    pub speed_of_light: f64,

    /// Fidelity of the emitted spin-photon state.
    pub emission_fidelity: f64,
}

impl Arm {
    fn validate(&self) -> Result<(), Error> {
        if !(self.length >= 0.0) {
            return Err(Error::InvalidLength(self.length));
        }
        if !(0.0..=1.0).contains(&self.p_loss_init) {
            return Err(Error::InvalidProbability(self.p_loss_init));
        }
        if !(self.p_loss_length >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "invalid attenuation: {}",
                self.p_loss_length
            )));
        }
        if !(self.speed_of_light > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "invalid speed of light: {}",
                self.speed_of_light
            )));
        }
        if !(self.emission_fidelity > 0.0 && self.emission_fidelity <= 1.0) {
            return Err(Error::InvalidFidelity(self.emission_fidelity));
        }
        Ok(())
    }

    /// Probability that a photon emitted on this arm reaches the midpoint and is detected.
    fn arrival(&self, detector_efficiency: f64) -> f64 {
        (1.0 - self.p_loss_init)
            * 10f64.powf(-self.p_loss_length * self.length / 10.0)
            * detector_efficiency
    }

    /// One-way travel time to the midpoint (ns).
    fn travel(&self) -> f64 {
        self.length / self.speed_of_light * 1e9
    }

    /// Werner parameter of the emitted state.
    fn werner(&self) -> f64 {
        (4.0 * self.emission_fidelity - 1.0) / 3.0
    }
}

/// Parameters of the Bell-state measurement performed at the midpoint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detector {
    /// Probability that a detector clicks without a photon.
    pub dark_count_probability: f64,

    /// Probability that an arriving photon is detected.
    pub detector_efficiency: f64,

    /// Indistinguishability of photons arriving from both arms.
    pub visibility: f64,

    /// Whether the detectors can tell one photon from two.
    pub num_resolving: bool,

    /// Number of modes attempted in parallel per round.
    pub num_multiplexing_modes: u32,
}

impl Detector {
    fn validate(&self) -> Result<(), Error> {
        for probability in [
            self.dark_count_probability,
            self.detector_efficiency,
            self.visibility,
        ] {
            if !(0.0..=1.0).contains(&probability) {
                return Err(Error::InvalidProbability(probability));
            }
        }
        if self.num_multiplexing_modes == 0 {
            return Err(Error::InvalidConfig(
                "number of multiplexing modes must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Link where both endpoints emit photons towards a midpoint station that performs a
/// double-click Bell-state measurement.
///
/// A round lasts as long as the slowest photon needs to reach the midpoint and have its herald
/// returned. A round succeeds when at least one of its modes yields a herald. The herald reports
/// Ψ+ or Ψ- (with equal probability). Heralds caused by both photons arriving have a fidelity set
/// by the emission fidelities and the visibility. Heralds involving a dark count carry no
/// entanglement.
#[derive(Clone, Debug)]
pub struct Heralded {
    cycle: Duration,

    /// Probability that one mode heralds (of any kind).
    p_mode: f64,

    /// Probability that a round heralds (any of its modes).
    p_round: f64,

    /// Probability that a herald comes from both photons arriving.
    p_photons: f64,

    /// Fidelity of a herald caused by both photons.
    fidelity: f64,
}

impl Heralded {
    pub fn new(a: Arm, b: Arm, detector: Detector) -> Result<Self, Error> {
        a.validate()?;
        b.validate()?;
        detector.validate()?;

        // Round duration
        let cycle = nanos(2.0 * a.travel().max(b.travel()));
        if cycle.is_zero() {
            return Err(Error::InvalidDuration(0.0));
        }

        // Herald probabilities of a single mode
        let eta_a = a.arrival(detector.detector_efficiency);
        let eta_b = b.arrival(detector.detector_efficiency);
        let p_dc = detector.dark_count_probability;
        let p_photons = eta_a * eta_b / 2.0;
        let mut p_dark = (eta_a * (1.0 - eta_b) + eta_b * (1.0 - eta_a)) * p_dc
            + (1.0 - eta_a) * (1.0 - eta_b) * p_dc * p_dc;
        if !detector.num_resolving {
            p_dark += eta_a * eta_b * (1.0 - detector.visibility) / 4.0;
        }
        let p_mode = (p_photons + p_dark).min(1.0);
        let p_round = 1.0 - (1.0 - p_mode).powi(detector.num_multiplexing_modes as i32);

        // Fidelity of a photon-photon herald
        let w = a.werner() * b.werner();
        let fidelity = w * (1.0 + detector.visibility) / 2.0 + (1.0 - w) / 4.0;
        Ok(Self {
            cycle,
            p_mode,
            p_round,
            p_photons: if p_mode > 0.0 { p_photons / p_mode } else { 0.0 },
            fidelity,
        })
    }

    /// Probability that a single mode heralds.
    pub fn mode_probability(&self) -> f64 {
        self.p_mode
    }

    /// Fidelity of a herald caused by both photons arriving.
    pub fn fidelity(&self) -> f64 {
        self.fidelity
    }
}

impl Model for Heralded {
    fn attempt(&self, rng: &mut dyn RngCore, _: u64) -> Attempt {
        if self.p_round <= 0.0 || !rng.gen_bool(self.p_round.min(1.0)) {
            return Attempt::failure(self.cycle);
        }
        let fidelity = if rng.gen_bool(self.p_photons.clamp(0.0, 1.0)) {
            self.fidelity
        } else {
            0.25
        };
        let bell_state = if rng.gen_bool(0.5) {
            BellState::PsiPlus
        } else {
            BellState::PsiMinus
        };
        Attempt {
            duration: self.cycle,
            success: Some(Success {
                state: self.cycle,
                label: self.cycle,
                herald: Herald::new(bell_state, fidelity),
            }),
        }
    }

    fn success_probability(&self) -> f64 {
        self.p_round
    }

    fn cycle_time(&self) -> Duration {
        self.cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn arm(length: f64) -> Arm {
        Arm {
            length,
            p_loss_init: 0.0,
            p_loss_length: 0.0,
            speed_of_light: 200_000.0,
            emission_fidelity: 1.0,
        }
    }

    fn detector() -> Detector {
        Detector {
            dark_count_probability: 0.0,
            detector_efficiency: 1.0,
            visibility: 1.0,
            num_resolving: false,
            num_multiplexing_modes: 1,
        }
    }

    #[test]
    fn test_lossless() {
        let model = Heralded::new(arm(10.0), arm(10.0), detector()).unwrap();

        // 10km at 200000km/s takes 50us, twice for the round trip
        assert_eq!(model.cycle_time(), Duration::from_nanos(100_000));
        assert_eq!(model.success_probability(), 0.5);
        assert_eq!(model.fidelity(), 1.0);
    }

    #[test]
    fn test_asymmetric_arms() {
        let model = Heralded::new(arm(10.0), arm(30.0), detector()).unwrap();
        assert_eq!(model.cycle_time(), Duration::from_nanos(300_000));
    }

    #[test]
    fn test_attenuation() {
        let mut lossy = arm(10.0);
        lossy.p_loss_length = 1.0;
        let model = Heralded::new(lossy, lossy, detector()).unwrap();

        // 10dB on each arm
        assert!((model.success_probability() - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_multiplexing() {
        let mut multiplexed = detector();
        multiplexed.num_multiplexing_modes = 3;
        let model = Heralded::new(arm(1.0), arm(1.0), multiplexed).unwrap();
        assert!((model.success_probability() - 0.875).abs() < 1e-12);
        assert_eq!(model.mode_probability(), 0.5);
    }

    #[test]
    fn test_emission_fidelity() {
        let mut noisy = arm(1.0);
        noisy.emission_fidelity = 0.85;
        let model = Heralded::new(noisy, arm(1.0), detector()).unwrap();

        // w = (4 * 0.85 - 1) / 3 = 0.8
        assert!((model.fidelity() - (0.8 + 0.2 / 4.0)).abs() < 1e-12);
    }

    #[test]
    fn test_dark_counts_only() {
        let mut dark = detector();
        dark.detector_efficiency = 0.0;
        dark.dark_count_probability = 0.1;
        let model = Heralded::new(arm(1.0), arm(1.0), dark).unwrap();
        assert!((model.success_probability() - 0.01).abs() < 1e-12);

        // Every herald is a dark count
        let mut rng = StdRng::seed_from_u64(0);
        let mut heralds = 0;
        while heralds < 10 {
            if let Some(success) = model.attempt(&mut rng, 0).success {
                assert_eq!(success.herald.fidelity, 0.25);
                heralds += 1;
            }
        }
    }

    #[test]
    fn test_heralds_psi_states() {
        let model = Heralded::new(arm(1.0), arm(1.0), detector()).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen = [0; 4];
        for _ in 0..1_000 {
            if let Some(success) = model.attempt(&mut rng, 0).success {
                seen[success.herald.bell_state.index()] += 1;
                assert_eq!(success.state, model.cycle_time());
                assert_eq!(success.label, model.cycle_time());
            }
        }
        assert_eq!(seen[BellState::PhiPlus.index()], 0);
        assert_eq!(seen[BellState::PhiMinus.index()], 0);
        assert!(seen[BellState::PsiPlus.index()] > 0);
        assert!(seen[BellState::PsiMinus.index()] > 0);
    }

    #[test]
    fn test_no_length() {
        assert_eq!(
            Heralded::new(arm(0.0), arm(0.0), detector()).err(),
            Some(Error::InvalidDuration(0.0))
        );
    }

    #[test]
    fn test_unreachable() {
        let mut blind = detector();
        blind.detector_efficiency = 0.0;
        let model = Heralded::new(arm(1.0), arm(1.0), blind).unwrap();
        assert_eq!(model.expected(), None);
    }
}
