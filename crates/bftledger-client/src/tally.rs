//! Counting replies until enough nodes agree.

use std::collections::HashMap;
use std::hash::Hash;

use bftledger_types::ProcessId;

/// Collects one answer per node and reports the first answer given by
/// `needed` distinct nodes.
///
/// Only a node's first answer counts, so a node repeating itself or
/// changing its mind cannot tip the result.
#[derive(Debug)]
pub struct Tally<T> {
    needed: usize,
    answers: HashMap<ProcessId, T>,
}

impl<T: Clone + Eq + Hash> Tally<T> {
    pub fn new(needed: usize) -> Self {
        Self {
            needed,
            answers: HashMap::new(),
        }
    }

    pub fn needed(&self) -> usize {
        self.needed
    }

    /// Records `answer` from `node`; returns the agreed answer once one
    /// has enough support.
    pub fn record(&mut self, node: ProcessId, answer: T) -> Option<T> {
        self.answers.entry(node).or_insert(answer);

        let mut support: HashMap<&T, usize> = HashMap::new();
        for answer in self.answers.values() {
            let count = support.entry(answer).or_default();
            *count += 1;
            if *count >= self.needed {
                return Some(answer.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_needs_distinct_nodes() {
        let mut tally = Tally::new(2);
        assert_eq!(tally.record(ProcessId::new(1), true), None);
        assert_eq!(tally.record(ProcessId::new(1), true), None);
        assert_eq!(tally.record(ProcessId::new(2), true), Some(true));
    }

    #[test]
    fn first_answer_of_a_node_sticks() {
        let mut tally = Tally::new(2);
        assert_eq!(tally.record(ProcessId::new(1), 10), None);
        assert_eq!(tally.record(ProcessId::new(1), 20), None);
        assert_eq!(tally.record(ProcessId::new(2), 20), None);
        assert_eq!(tally.record(ProcessId::new(3), 10), Some(10));
    }

    #[test]
    fn split_answers_do_not_agree() {
        let mut tally = Tally::new(2);
        assert_eq!(tally.record(ProcessId::new(1), false), None);
        assert_eq!(tally.record(ProcessId::new(2), true), None);
        assert_eq!(tally.record(ProcessId::new(3), true), Some(true));
    }
}
