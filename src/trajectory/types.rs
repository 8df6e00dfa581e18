//! Core transition data types consumed by the flow-matching update.
//!
//! A [`Transition`] records one edge of the DAG together with everything the
//! loss needs: the full parent set of the successor state (inflow side), the
//! successor observation (outflow side), and the terminal reward. Batches are
//! flat; the loss never cares which episode a transition came from.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Single transition
// ---------------------------------------------------------------------------

/// One DAG transition, keyed by the state it arrives in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    /// Observations of every DAG parent of the successor state.
    pub parents: Vec<Vec<f64>>,
    /// The action each parent used to reach the successor state.
    pub parent_actions: Vec<usize>,
    /// Terminal reward; zero for intermediate transitions.
    pub reward: f64,
    /// Observation of the successor state.
    pub next_obs: Vec<f64>,
    /// Whether the successor state ended the episode.
    pub done: bool,
}

impl Transition {
    /// Number of parent edges feeding the successor state.
    pub fn num_parents(&self) -> usize {
        self.parents.len()
    }
}

// ---------------------------------------------------------------------------
// Transition batch
// ---------------------------------------------------------------------------

/// A flat, appendable collection of transitions for one learning pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionBatch {
    transitions: Vec<Transition>,
}

impl TransitionBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self {
            transitions: Vec::new(),
        }
    }

    /// Create a batch pre-allocated for `capacity` transitions.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            transitions: Vec::with_capacity(capacity),
        }
    }

    /// Number of transitions in the batch.
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Push a single transition.
    pub fn push(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    /// Extend the batch with an iterator of transitions.
    pub fn extend(&mut self, iter: impl IntoIterator<Item = Transition>) {
        self.transitions.extend(iter);
    }

    /// Return a slice view of all transitions.
    pub fn as_slice(&self) -> &[Transition] {
        &self.transitions
    }

    /// Iterate over the transitions.
    pub fn iter(&self) -> std::slice::Iter<'_, Transition> {
        self.transitions.iter()
    }

    /// Total number of parent edges across the batch (the number of rows the
    /// inflow computation evaluates).
    pub fn num_parent_rows(&self) -> usize {
        self.transitions.iter().map(Transition::num_parents).sum()
    }

    /// Number of terminal transitions in the batch.
    pub fn num_terminal(&self) -> usize {
        self.transitions.iter().filter(|t| t.done).count()
    }

    pub fn into_vec(self) -> Vec<Transition> {
        self.transitions
    }
}

impl From<Vec<Transition>> for TransitionBatch {
    fn from(transitions: Vec<Transition>) -> Self {
        Self { transitions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_transition(num_parents: usize, done: bool) -> Transition {
        Transition {
            parents: vec![vec![0.0, 1.0]; num_parents],
            parent_actions: vec![0; num_parents],
            reward: if done { 0.5 } else { 0.0 },
            next_obs: vec![1.0, 0.0],
            done,
        }
    }

    #[test]
    fn test_push_and_extend() {
        let mut batch = TransitionBatch::new();
        assert!(batch.is_empty());

        batch.push(make_transition(1, false));
        batch.extend(vec![make_transition(2, true), make_transition(3, false)]);

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.num_parent_rows(), 6);
        assert_eq!(batch.num_terminal(), 1);
    }

    #[test]
    fn test_from_vec() {
        let batch = TransitionBatch::from(vec![make_transition(1, true)]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.as_slice()[0].num_parents(), 1);
    }
}
