//! Bounded set of seen message ids.

use std::collections::BTreeSet;

/// Tracks which message ids from one sender have been seen.
///
/// Ids below the low-water mark are implied; only ids above a gap are
/// stored explicitly. Since each sender numbers messages to a given
/// destination 1, 2, 3, ..., the explicit part stays small.
#[derive(Debug, Clone, Default)]
pub struct CollapsingSet {
    /// Every id `<= floor` has been seen.
    floor: u64,
    above: BTreeSet<u64>,
}

impl CollapsingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id`, returning `true` if it was not already present.
    pub fn insert(&mut self, id: u64) -> bool {
        if id <= self.floor || !self.above.insert(id) {
            return false;
        }
        while self.above.remove(&(self.floor + 1)) {
            self.floor += 1;
        }
        true
    }

    pub fn contains(&self, id: u64) -> bool {
        id <= self.floor || self.above.contains(&id)
    }

    /// Number of ids stored above the contiguous prefix.
    pub fn pending(&self) -> usize {
        self.above.len()
    }
}
