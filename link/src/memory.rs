//! Fixed-size qubit memory owned by each node.

use crate::Pair;
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};
use tracing::trace;

/// Default number of qubit positions per node.
pub const DEFAULT_POSITIONS: usize = 64;

struct Positions {
    capacity: usize,
    free: BTreeSet<usize>,
}

/// Qubit memory of a single node.
///
/// Positions are handed out lowest-first and returned when the [Qubit] occupying them is dropped.
#[derive(Clone)]
pub struct Memory {
    node: Arc<str>,
    positions: Arc<Mutex<Positions>>,
}

impl Memory {
    pub fn new(node: &str, capacity: usize) -> Self {
        Self {
            node: node.into(),
            positions: Arc::new(Mutex::new(Positions {
                capacity,
                free: (0..capacity).collect(),
            })),
        }
    }

    /// Name of the node owning this memory.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Total number of positions.
    pub fn capacity(&self) -> usize {
        self.positions.lock().unwrap().capacity
    }

    /// Number of positions currently free.
    pub fn available(&self) -> usize {
        self.positions.lock().unwrap().free.len()
    }

    /// Number of positions currently occupied.
    pub fn used(&self) -> usize {
        let positions = self.positions.lock().unwrap();
        positions.capacity - positions.free.len()
    }

    /// Place one half of `pair` into the lowest free position.
    pub(crate) fn allocate(&self, pair: Arc<Pair>) -> Option<Qubit> {
        let position = self.positions.lock().unwrap().free.pop_first()?;
        trace!(node = %self.node, position, "allocated qubit");
        Some(Qubit {
            position,
            memory: self.clone(),
            pair,
        })
    }

    fn release(&self, position: usize) {
        self.positions.lock().unwrap().free.insert(position);
        trace!(node = %self.node, position, "released qubit");
    }
}

/// One half of an entangled pair stored in a node's [Memory].
///
/// Dropping the qubit frees its position.
pub struct Qubit {
    position: usize,
    memory: Memory,
    pair: Arc<Pair>,
}

impl Qubit {
    /// Position of the qubit in its node's memory.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Name of the node holding the qubit.
    pub fn node(&self) -> &str {
        self.memory.node()
    }

    /// The pair this qubit is one half of.
    pub fn pair(&self) -> &Pair {
        &self.pair
    }

    /// Returns true if both qubits are halves of the same pair.
    pub fn entangled_with(&self, other: &Qubit) -> bool {
        Arc::ptr_eq(&self.pair, &other.pair)
    }
}

impl Drop for Qubit {
    fn drop(&mut self) {
        self.memory.release(self.position);
    }
}
