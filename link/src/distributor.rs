//! Materialize entangled pairs at the moment of success.

use crate::{Error, Herald, Memory, Pair, Qubit};
use rand::RngCore;
use std::sync::Arc;
use tracing::debug;

/// Creates the pair announced by a [Herald] and binds one half into each endpoint's [Memory].
#[derive(Clone)]
pub struct Distributor {
    memories: [Memory; 2],
}

impl Distributor {
    pub fn new(a: Memory, b: Memory) -> Self {
        Self { memories: [a, b] }
    }

    /// Memories of both endpoints (in link order).
    pub fn memories(&self) -> &[Memory; 2] {
        &self.memories
    }

    /// Sample a pair and place its halves into both memories.
    ///
    /// Either both halves are placed or neither is.
    pub fn distribute(&self, rng: &mut dyn RngCore, herald: Herald) -> Result<[Qubit; 2], Error> {
        let pair = Arc::new(Pair::sample(rng, herald));
        let Some(a) = self.memories[0].allocate(pair.clone()) else {
            debug!(node = self.memories[0].node(), "memory exhausted");
            return Err(Error::MemoryExhausted(self.memories[0].node().to_string()));
        };
        let Some(b) = self.memories[1].allocate(pair) else {
            debug!(node = self.memories[1].node(), "memory exhausted");
            return Err(Error::MemoryExhausted(self.memories[1].node().to_string()));
        };
        Ok([a, b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BellState;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_distribute_binds_both() {
        let mut rng = StdRng::seed_from_u64(0);
        let distributor = Distributor::new(Memory::new("alice", 2), Memory::new("bob", 2));
        let [a, b] = distributor
            .distribute(&mut rng, Herald::new(BellState::PsiPlus, 0.8))
            .unwrap();
        assert!(a.entangled_with(&b));
        assert_eq!(a.node(), "alice");
        assert_eq!(b.node(), "bob");
        assert_eq!(a.pair().heralded(), BellState::PsiPlus);
    }

    #[test]
    fn test_distribute_all_or_nothing() {
        let mut rng = StdRng::seed_from_u64(0);
        let alice = Memory::new("alice", 2);
        let bob = Memory::new("bob", 1);
        let distributor = Distributor::new(alice.clone(), bob.clone());
        let held = distributor.distribute(&mut rng, Herald::perfect()).unwrap();
        assert_eq!(
            distributor
                .distribute(&mut rng, Herald::perfect())
                .err()
                .unwrap(),
            Error::MemoryExhausted("bob".to_string())
        );

        // The half placed in alice was released again
        assert_eq!(alice.used(), 1);
        drop(held);
        assert_eq!(alice.used(), 0);
        assert_eq!(bob.used(), 0);
    }
}
