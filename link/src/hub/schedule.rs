//! Scheduling state and schedule construction.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Which spokes currently hold a window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// No spoke holds a window.
    Idle,

    /// A single spoke holds a window.
    Serving(usize),

    /// Several (node-disjoint) spokes hold a window at once.
    Multiplexed(Vec<usize>),
}

impl State {
    pub(super) fn from_open(mut open: Vec<usize>) -> Self {
        open.sort_unstable();
        match open.len() {
            0 => State::Idle,
            1 => State::Serving(open[0]),
            _ => State::Multiplexed(open),
        }
    }

    /// Spokes holding a window.
    pub fn spokes(&self) -> Vec<usize> {
        match self {
            State::Idle => Vec::new(),
            State::Serving(spoke) => vec![*spoke],
            State::Multiplexed(spokes) => spokes.clone(),
        }
    }
}

/// Returns true if the two node pairs share no node.
pub fn disjoint(a: &(String, String), b: &(String, String)) -> bool {
    a.0 != b.0 && a.0 != b.1 && a.1 != b.0 && a.1 != b.1
}

/// Group spokes into sub-cycles of at most `max_multiplexing` node-disjoint spokes.
///
/// Spokes are placed greedily (in order) into the first sub-cycle that can take them.
pub fn schema(spokes: &[(String, String)], max_multiplexing: usize) -> Vec<Vec<usize>> {
    let mut schema: Vec<Vec<usize>> = Vec::new();
    for (index, spoke) in spokes.iter().enumerate() {
        let slot = schema.iter_mut().find(|slot| {
            slot.len() < max_multiplexing && slot.iter().all(|other| disjoint(&spokes[*other], spoke))
        });
        match slot {
            Some(slot) => slot.push(index),
            None => schema.push(vec![index]),
        }
    }
    schema
}

/// First multiple of `cycle` (since the epoch) at or after `now`.
pub fn align(now: SystemTime, cycle: Duration) -> SystemTime {
    let cycle = cycle.as_nanos();
    if cycle == 0 {
        return now;
    }
    let elapsed = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let aligned = elapsed.div_ceil(cycle) * cycle;
    UNIX_EPOCH + Duration::from_nanos(aligned.min(u64::MAX as u128) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spokes(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn test_state() {
        assert_eq!(State::from_open(vec![]), State::Idle);
        assert_eq!(State::from_open(vec![2]), State::Serving(2));
        assert_eq!(
            State::from_open(vec![3, 1]),
            State::Multiplexed(vec![1, 3])
        );
        assert_eq!(State::Multiplexed(vec![1, 3]).spokes(), vec![1, 3]);
    }

    #[test]
    fn test_schema_single() {
        let spokes = spokes(&[("a", "b"), ("c", "d"), ("a", "c")]);
        assert_eq!(schema(&spokes, 1), vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn test_schema_multiplexed() {
        let spokes = spokes(&[("a", "b"), ("a", "c"), ("c", "d"), ("b", "d"), ("e", "f")]);

        // (a,b) and (c,d) are disjoint, (a,c) and (b,d) are disjoint
        assert_eq!(schema(&spokes, 2), vec![vec![0, 2], vec![1, 3], vec![4]]);

        // Without a limit the last spoke joins the first group
        assert_eq!(schema(&spokes, 3), vec![vec![0, 2, 4], vec![1, 3]]);
    }

    #[test]
    fn test_align() {
        let cycle = Duration::from_nanos(100);
        let at = |nanos| UNIX_EPOCH + Duration::from_nanos(nanos);
        assert_eq!(align(at(0), cycle), at(0));
        assert_eq!(align(at(1), cycle), at(100));
        assert_eq!(align(at(100), cycle), at(100));
        assert_eq!(align(at(250), cycle), at(300));
        assert_eq!(align(at(250), Duration::ZERO), at(250));
    }
}
