//! Bell states and the Bell-diagonal pairs produced by generation attempts.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four maximally-entangled two-qubit states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BellState {
    PhiPlus = 0,
    PsiPlus = 1,
    PhiMinus = 2,
    PsiMinus = 3,
}

impl BellState {
    /// All Bell states in index order.
    pub const ALL: [BellState; 4] = [
        BellState::PhiPlus,
        BellState::PsiPlus,
        BellState::PhiMinus,
        BellState::PsiMinus,
    ];

    /// Index of the state (0-3).
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Returns the Bell state with the given index (if any).
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for BellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BellState::PhiPlus => "Φ+",
            BellState::PsiPlus => "Ψ+",
            BellState::PhiMinus => "Φ-",
            BellState::PsiMinus => "Ψ-",
        };
        f.write_str(name)
    }
}

/// Outcome announced by a successful attempt: the state the pair is expected to be in and
/// how close it is to that state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Herald {
    pub bell_state: BellState,
    pub fidelity: f64,
}

impl Herald {
    pub fn new(bell_state: BellState, fidelity: f64) -> Self {
        Self {
            bell_state,
            fidelity,
        }
    }

    /// A perfect Φ+ pair.
    pub fn perfect() -> Self {
        Self::new(BellState::PhiPlus, 1.0)
    }
}

/// Probability with which a perfect pair must be replaced by the maximally mixed state for the
/// result to have the given fidelity.
pub fn prob_max_mixed(fidelity: f64) -> f64 {
    (1.0 - fidelity) * 4.0 / 3.0
}

/// A Bell-diagonal pair shared by two qubits.
///
/// The pair keeps both the state announced by the herald and the state it actually ended up in,
/// sampled from its Bell-diagonal weights when the pair was created. The latter is what a perfect
/// Bell measurement of both halves would reveal.
#[derive(Clone, Debug, PartialEq)]
pub struct Pair {
    heralded: BellState,
    weights: [f64; 4],
    realized: BellState,
}

impl Pair {
    /// Depolarise the heralded state so its fidelity matches the herald and sample the state the
    /// pair is actually in.
    pub fn sample(rng: &mut dyn RngCore, herald: Herald) -> Self {
        let fidelity = herald.fidelity.clamp(0.0, 1.0);
        let mut weights = [(1.0 - fidelity) / 3.0; 4];
        weights[herald.bell_state.index()] = fidelity;

        // Sample the realized state
        let draw: f64 = rng.gen();
        let mut realized = herald.bell_state;
        let mut cumulative = 0.0;
        for state in BellState::ALL {
            cumulative += weights[state.index()];
            if draw < cumulative {
                realized = state;
                break;
            }
        }
        Self {
            heralded: herald.bell_state,
            weights,
            realized,
        }
    }

    /// The state announced to both endpoints.
    pub fn heralded(&self) -> BellState {
        self.heralded
    }

    /// Overlap of the pair with the heralded state.
    pub fn fidelity(&self) -> f64 {
        self.weights[self.heralded.index()]
    }

    /// Bell-diagonal weights of the pair (indexed by [BellState::index]).
    pub fn weights(&self) -> [f64; 4] {
        self.weights
    }

    /// The state the pair is actually in.
    pub fn realized(&self) -> BellState {
        self.realized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_index_roundtrip() {
        for (i, state) in BellState::ALL.iter().enumerate() {
            assert_eq!(state.index(), i);
            assert_eq!(BellState::from_index(i), Some(*state));
        }
        assert_eq!(BellState::from_index(4), None);
    }

    #[test]
    fn test_prob_max_mixed() {
        assert_eq!(prob_max_mixed(1.0), 0.0);
        assert!((prob_max_mixed(0.25) - 1.0).abs() < 1e-12);
        assert!((prob_max_mixed(0.9) - 0.4 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_perfect_pair() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..100 {
            let pair = Pair::sample(&mut rng, Herald::perfect());
            assert_eq!(pair.realized(), BellState::PhiPlus);
            assert_eq!(pair.fidelity(), 1.0);
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(0);
        let pair = Pair::sample(&mut rng, Herald::new(BellState::PsiMinus, 0.7));
        let total: f64 = pair.weights().iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(pair.heralded(), BellState::PsiMinus);
        assert!((pair.fidelity() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_realized_frequency() {
        let mut rng = StdRng::seed_from_u64(42);
        let trials = 20_000;
        let mut hits = 0;
        for _ in 0..trials {
            let pair = Pair::sample(&mut rng, Herald::new(BellState::PhiPlus, 0.9));
            if pair.realized() == pair.heralded() {
                hits += 1;
            }
        }
        let observed = hits as f64 / trials as f64;
        assert!((observed - 0.9).abs() < 0.01, "observed={observed}");
    }
}
