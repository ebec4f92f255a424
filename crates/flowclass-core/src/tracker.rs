//! Smoothed per-flow classification
//!
//! Keeps the cumulative mean of every probability vector a flow has received
//! since it was first seen, and the class with the highest mean. A flow that
//! is missing from a round's results is dropped on the next prune.

use crate::flow::FlowKey;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Running classification of one flow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionState {
    /// Cumulative mean of all observed probability vectors
    pub running_probabilities: Vec<f64>,
    /// Number of vectors folded in so far (always >= 1)
    pub observation_count: u64,
    /// Index of the largest running probability (first one on ties)
    pub current_best_class: usize,
}

impl PredictionState {
    fn new(probabilities: &[f64]) -> Self {
        Self {
            running_probabilities: probabilities.to_vec(),
            observation_count: 1,
            current_best_class: argmax(probabilities),
        }
    }

    fn observe(&mut self, probabilities: &[f64]) {
        let n = self.observation_count as f64;
        for (running, &new) in self.running_probabilities.iter_mut().zip(probabilities) {
            *running = (n * *running + new) / (n + 1.0);
        }
        self.observation_count += 1;
        self.current_best_class = argmax(&self.running_probabilities);
    }
}

/// Index of the first maximal entry
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Per-flow prediction smoother
#[derive(Debug)]
pub struct PredictionTracker {
    class_count: usize,
    flows: HashMap<FlowKey, PredictionState>,
}

impl PredictionTracker {
    /// Create tracker for a fixed number of classes
    pub fn new(class_count: usize) -> Self {
        assert!(class_count > 0, "class count must be positive");
        Self {
            class_count,
            flows: HashMap::new(),
        }
    }

    /// Number of classes every probability vector must have
    pub fn class_count(&self) -> usize {
        self.class_count
    }

    /// Fold one probability vector into the flow's running mean.
    ///
    /// # Panics
    ///
    /// Panics if `probabilities.len()` differs from the class count.
    pub fn update(&mut self, key: FlowKey, probabilities: &[f64]) {
        assert_eq!(
            probabilities.len(),
            self.class_count,
            "probability vector length does not match class count"
        );

        match self.flows.get_mut(&key) {
            Some(state) => state.observe(probabilities),
            None => {
                self.flows.insert(key, PredictionState::new(probabilities));
            }
        }
    }

    /// Drop every flow not in `active`. Returns how many were removed.
    pub fn prune(&mut self, active: &HashSet<FlowKey>) -> usize {
        let before = self.flows.len();
        self.flows.retain(|key, _| active.contains(key));
        before - self.flows.len()
    }

    /// Current best class of a tracked flow
    pub fn current_best_class(&self, key: &FlowKey) -> Option<usize> {
        self.flows.get(key).map(|s| s.current_best_class)
    }

    /// Full state of a tracked flow
    pub fn state(&self, key: &FlowKey) -> Option<&PredictionState> {
        self.flows.get(key)
    }

    /// Best class of every tracked flow, ordered by key
    pub fn snapshot(&self) -> BTreeMap<FlowKey, usize> {
        self.flows
            .iter()
            .map(|(k, s)| (*k, s.current_best_class))
            .collect()
    }

    /// Number of tracked flows
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// True if no flow is tracked
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}
