//! Replay of high-reward terminal states via backward trajectory
//! reconstruction.
//!
//! The buffer keeps the top-k terminal states seen so far, ranked by reward.
//! Sampling draws states uniformly with replacement and rebuilds a full
//! trajectory for each by walking random parents back to the origin, so the
//! learner can re-consume rare modes without re-discovering them.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ReplayConfig;
use crate::env::HyperGrid;
use crate::trajectory::types::Transition;

// ---------------------------------------------------------------------------
// Backward reconstruction
// ---------------------------------------------------------------------------

/// Rebuild a trajectory ending in `terminal` by walking uniformly chosen
/// parents back to the origin.
///
/// The first emitted transition carries the terminal reward and flag; every
/// subsequent one is intermediate. When `terminal` is not forced-terminal the
/// episode must have ended with the stop action, which contributes the
/// stop-parent transition before the walk starts moving. The origin itself
/// reconstructs to an empty trajectory.
pub fn generate_backward(
    grid: &HyperGrid,
    reward: f64,
    terminal: &[usize],
    rng: &mut impl Rng,
) -> Vec<Transition> {
    let mut s = terminal.to_vec();
    let mut used_stop_action = !grid.is_forced_terminal(&s);
    let mut done = true;
    let mut r = reward;

    let mut traj = Vec::new();
    while s.iter().any(|&c| c > 0) {
        let (parents, parent_actions) = grid.parent_transitions(&s, used_stop_action);
        let step_dim = if used_stop_action {
            None
        } else {
            Some(parent_actions[rng.gen_range(0..parent_actions.len())])
        };
        traj.push(Transition {
            parents,
            parent_actions,
            reward: r,
            next_obs: grid.encode(&s),
            done,
        });
        if let Some(d) = step_dim {
            s[d] -= 1;
        }
        used_stop_action = false;
        done = false;
        r = 0.0;
    }
    traj
}

// ---------------------------------------------------------------------------
// Replay buffer
// ---------------------------------------------------------------------------

/// Which terminal states the buffer retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplayStrategy {
    /// Replay disabled; `add` is a no-op and `sample` yields nothing.
    None,
    /// Keep the highest-reward terminal states seen so far.
    TopK,
}

/// A retained terminal state and the reward it earned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayEntry {
    pub reward: f64,
    pub state: Vec<usize>,
}

/// Top-k replay buffer over terminal states.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    strategy: ReplayStrategy,
    sample_size: usize,
    capacity: usize,
    // Sorted by ascending reward; the front is the eviction candidate.
    entries: Vec<ReplayEntry>,
}

impl ReplayBuffer {
    pub fn new(config: &ReplayConfig) -> Self {
        Self {
            strategy: config.strategy,
            sample_size: config.sample_size,
            capacity: config.capacity,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ReplayEntry] {
        &self.entries
    }

    /// Offer a terminal state to the buffer. Retained only under the top-k
    /// strategy, and only while it beats the current minimum once full.
    pub fn add(&mut self, state: Vec<usize>, reward: f64) {
        if self.strategy != ReplayStrategy::TopK {
            return;
        }
        let min_reward = self.entries.first().map(|e| e.reward);
        if self.entries.len() < self.capacity || Some(reward) > min_reward {
            self.entries.push(ReplayEntry { reward, state });
            self.entries.sort_by(|a, b| a.reward.total_cmp(&b.reward));
            let len = self.entries.len();
            if len > self.capacity {
                self.entries.drain(..len - self.capacity);
            }
        }
    }

    /// Draw `sample_size` retained states uniformly with replacement and
    /// reconstruct a backward trajectory for each. Empty buffers yield an
    /// empty batch.
    pub fn sample(&self, grid: &HyperGrid, rng: &mut impl Rng) -> Vec<Transition> {
        if self.entries.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        for _ in 0..self.sample_size {
            let entry = &self.entries[rng.gen_range(0..self.entries.len())];
            out.extend(generate_backward(grid, entry.reward, &entry.state, rng));
        }
        out
    }
}
