//! The hypergrid DAG and the episodic environment built on top of it.
//!
//! States are integer vectors of length `ndim` with coordinates in
//! `[0, horizon)`. From any state the agent may increment one coordinate or
//! use the stop action; an episode also terminates as soon as any coordinate
//! hits `horizon - 1`. [`HyperGrid`] holds the pure geometry (encoding,
//! parent enumeration, transition application, exact density) while
//! [`GridEnv`] adds the mutable episode lifecycle used by samplers.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::config::GridConfig;
use crate::env::reward::RewardKind;

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Pure hypergrid geometry plus the reward function over mapped coordinates.
#[derive(Debug, Clone)]
pub struct HyperGrid {
    pub horizon: usize,
    pub ndim: usize,
    xrange: [f64; 2],
    reward: RewardKind,
    density_cache: Option<TrueDensity>,
}

/// Exact reward-proportional density over all reachable states.
///
/// `states` holds the reachable states in lexicographic order (last dimension
/// fastest); `density` and `rewards` are aligned with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrueDensity {
    pub density: Vec<f64>,
    pub states: Vec<Vec<usize>>,
    pub rewards: Vec<f64>,
}

impl HyperGrid {
    pub fn new(horizon: usize, ndim: usize, xrange: [f64; 2], reward: RewardKind) -> Result<Self> {
        if horizon < 2 {
            bail!("horizon must be at least 2 (got {horizon})");
        }
        if ndim == 0 {
            bail!("ndim must be at least 1");
        }
        if !(xrange[0].is_finite() && xrange[1].is_finite()) || xrange[1] <= xrange[0] {
            bail!(
                "xrange must be a finite increasing interval (got [{}, {}])",
                xrange[0],
                xrange[1]
            );
        }
        Ok(Self {
            horizon,
            ndim,
            xrange,
            reward,
            density_cache: None,
        })
    }

    pub fn from_config(config: &GridConfig) -> Result<Self> {
        Self::new(config.horizon, config.ndim, config.xrange, config.reward)
    }

    /// Number of forward actions: one increment per dimension plus stop.
    pub fn num_actions(&self) -> usize {
        self.ndim + 1
    }

    /// The action index that terminates an episode in place.
    pub fn stop_action(&self) -> usize {
        self.ndim
    }

    /// Length of the one-hot observation vector.
    pub fn obs_len(&self) -> usize {
        self.horizon * self.ndim
    }

    /// Whether a state terminates episodes regardless of the chosen action.
    pub fn is_forced_terminal(&self, s: &[usize]) -> bool {
        s.iter().any(|&c| c + 1 == self.horizon)
    }

    /// One-hot observation: dimension `d` occupies the slice
    /// `[d * horizon, (d + 1) * horizon)` with a single 1 at its coordinate.
    pub fn encode(&self, s: &[usize]) -> Vec<f64> {
        assert_eq!(s.len(), self.ndim, "state has wrong dimensionality");
        let mut obs = vec![0.0; self.obs_len()];
        for (d, &c) in s.iter().enumerate() {
            assert!(c < self.horizon, "coordinate {c} outside [0, {})", self.horizon);
            obs[d * self.horizon + c] = 1.0;
        }
        obs
    }

    /// Map integer coordinates onto `horizon` evenly spaced points in xrange.
    pub fn to_coords(&self, s: &[usize]) -> Vec<f64> {
        let span = self.xrange[1] - self.xrange[0];
        let step = span / (self.horizon - 1) as f64;
        s.iter().map(|&c| self.xrange[0] + c as f64 * step).collect()
    }

    /// Reward at a grid state, evaluated on its mapped coordinates.
    pub fn reward_at(&self, s: &[usize]) -> f64 {
        self.reward.eval(&self.to_coords(s))
    }

    /// Enumerate every DAG parent of `s` as (observation, action) pairs.
    ///
    /// When the state was reached with the stop action its only parent is the
    /// state itself. Otherwise each positive coordinate contributes the
    /// decremented predecessor, except predecessors that are themselves
    /// forced-terminal: episodes end there, so no edge leaves them.
    pub fn parent_transitions(
        &self,
        s: &[usize],
        used_stop_action: bool,
    ) -> (Vec<Vec<f64>>, Vec<usize>) {
        if used_stop_action {
            return (vec![self.encode(s)], vec![self.stop_action()]);
        }
        let mut parents = Vec::new();
        let mut actions = Vec::new();
        for d in 0..self.ndim {
            if s[d] > 0 {
                let mut sp = s.to_vec();
                sp[d] -= 1;
                if self.is_forced_terminal(&sp) {
                    continue;
                }
                parents.push(self.encode(&sp));
                actions.push(d);
            }
        }
        (parents, actions)
    }

    /// Apply a DAG action to a state, returning the successor and whether the
    /// transition is terminal.
    pub fn apply_dag_action(&self, s: &[usize], action: usize) -> (Vec<usize>, bool) {
        assert!(action <= self.ndim, "action {action} out of range");
        let mut next = s.to_vec();
        if action == self.stop_action() {
            return (next, true);
        }
        next[action] += 1;
        assert!(next[action] < self.horizon, "action would leave the grid");
        let done = self.is_forced_terminal(&next);
        (next, done)
    }

    /// Apply a reversible chain action: `0..ndim` increments, `ndim..2*ndim`
    /// decrements, both clamped to the grid. Returns the successor and the
    /// action that undoes the move (the move itself when clamping made it a
    /// no-op).
    pub fn apply_chain_action(&self, s: &[usize], action: usize) -> (Vec<usize>, usize) {
        assert!(action < 2 * self.ndim, "chain action {action} out of range");
        let mut next = s.to_vec();
        if action < self.ndim {
            next[action] = (next[action] + 1).min(self.horizon - 1);
        } else {
            let d = action - self.ndim;
            next[d] = next[d].saturating_sub(1);
        }
        let reverse = if next == s {
            action
        } else {
            (action + self.ndim) % (2 * self.ndim)
        };
        (next, reverse)
    }

    /// All states in lexicographic order, last dimension fastest.
    pub fn enumerate_states(&self) -> Vec<Vec<usize>> {
        let mut states = Vec::new();
        let mut cur = vec![0usize; self.ndim];
        'outer: loop {
            states.push(cur.clone());
            for d in (0..self.ndim).rev() {
                cur[d] += 1;
                if cur[d] < self.horizon {
                    continue 'outer;
                }
                cur[d] = 0;
            }
            break;
        }
        states
    }

    /// Position of a state within [`Self::enumerate_states`] order.
    pub fn state_flat_index(&self, s: &[usize]) -> usize {
        s.iter().fold(0, |acc, &c| acc * self.horizon + c)
    }

    /// Exact reward-proportional density over reachable states, memoized
    /// after the first computation.
    ///
    /// A state is reachable when it is the origin or has at least one DAG
    /// parent; corners wedged behind forced-terminal neighbours are excluded.
    pub fn true_density(&mut self) -> TrueDensity {
        if let Some(cached) = &self.density_cache {
            return cached.clone();
        }
        let mut states = Vec::new();
        let mut rewards = Vec::new();
        for s in self.enumerate_states() {
            let is_origin = s.iter().all(|&c| c == 0);
            if is_origin || !self.parent_transitions(&s, false).1.is_empty() {
                rewards.push(self.reward_at(&s));
                states.push(s);
            }
        }
        let total: f64 = rewards.iter().sum();
        let density = rewards.iter().map(|r| r / total).collect();
        let td = TrueDensity {
            density,
            states,
            rewards,
        };
        self.density_cache = Some(td.clone());
        td
    }
}

// ---------------------------------------------------------------------------
// Episode environment
// ---------------------------------------------------------------------------

/// Where an environment is in its episode lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodePhase {
    Ready,
    Running,
    Terminated,
}

/// Which stepping rule an environment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// Monotone DAG moves with a stop action; episodes terminate.
    Dag,
    /// Clamped reversible moves for ergodic samplers; episodes never
    /// terminate on their own.
    Chain,
}

/// Result of a DAG step (or a reset, which reports `done = false`).
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub obs: Vec<f64>,
    pub reward: f64,
    pub done: bool,
    pub state: Vec<usize>,
}

/// Result of a reversible chain step.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub obs: Vec<f64>,
    pub reward: f64,
    pub state: Vec<usize>,
    pub reverse_action: usize,
}

/// A stateful episode over a [`HyperGrid`].
#[derive(Debug, Clone)]
pub struct GridEnv {
    grid: HyperGrid,
    state: Vec<usize>,
    steps_taken: usize,
    phase: EpisodePhase,
    mode: StepMode,
}

impl GridEnv {
    pub fn new(grid: HyperGrid, mode: StepMode) -> Self {
        let state = vec![0; grid.ndim];
        Self {
            grid,
            state,
            steps_taken: 0,
            phase: EpisodePhase::Ready,
            mode,
        }
    }

    pub fn grid(&self) -> &HyperGrid {
        &self.grid
    }

    pub fn state(&self) -> &[usize] {
        &self.state
    }

    pub fn phase(&self) -> EpisodePhase {
        self.phase
    }

    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    /// Start a fresh episode at the origin. Also reports the origin's reward,
    /// which chain-mode samplers use as their initial energy.
    pub fn reset(&mut self) -> StepOutcome {
        self.state = vec![0; self.grid.ndim];
        self.steps_taken = 0;
        self.phase = EpisodePhase::Running;
        StepOutcome {
            obs: self.grid.encode(&self.state),
            reward: self.grid.reward_at(&self.state),
            done: false,
            state: self.state.clone(),
        }
    }

    /// Take a DAG action. Terminal transitions carry the state's reward;
    /// intermediate ones carry zero.
    pub fn step(&mut self, action: usize) -> StepOutcome {
        assert_eq!(self.mode, StepMode::Dag, "step requires a DAG-mode env");
        assert_eq!(
            self.phase,
            EpisodePhase::Running,
            "step requires a running episode"
        );
        let (next, done) = self.grid.apply_dag_action(&self.state, action);
        self.state = next;
        self.steps_taken += 1;
        if done {
            self.phase = EpisodePhase::Terminated;
        }
        StepOutcome {
            obs: self.grid.encode(&self.state),
            reward: if done {
                self.grid.reward_at(&self.state)
            } else {
                0.0
            },
            done,
            state: self.state.clone(),
        }
    }

    /// Take a reversible chain action. Every step carries the new state's
    /// reward and the action that undoes the move.
    pub fn step_chain(&mut self, action: usize) -> ChainOutcome {
        assert_eq!(
            self.mode,
            StepMode::Chain,
            "step_chain requires a chain-mode env"
        );
        assert_eq!(
            self.phase,
            EpisodePhase::Running,
            "step_chain requires a running episode"
        );
        let (next, reverse_action) = self.grid.apply_chain_action(&self.state, action);
        self.state = next;
        self.steps_taken += 1;
        ChainOutcome {
            obs: self.grid.encode(&self.state),
            reward: self.grid.reward_at(&self.state),
            state: self.state.clone(),
            reverse_action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_grid(horizon: usize, ndim: usize) -> HyperGrid {
        HyperGrid::new(horizon, ndim, [-1.0, 1.0], RewardKind::CornersFloorB).unwrap()
    }

    // ------------------------------------------------------------------
    // Construction and encoding
    // ------------------------------------------------------------------

    #[test]
    fn test_new_rejects_degenerate_grids() {
        assert!(HyperGrid::new(1, 2, [-1.0, 1.0], RewardKind::Corners).is_err());
        assert!(HyperGrid::new(4, 0, [-1.0, 1.0], RewardKind::Corners).is_err());
        assert!(HyperGrid::new(4, 2, [1.0, -1.0], RewardKind::Corners).is_err());
    }

    #[test]
    fn test_encode_one_hot_layout() {
        let grid = make_grid(4, 2);
        let obs = grid.encode(&[2, 0]);
        assert_eq!(obs.len(), 8);
        assert!((obs.iter().sum::<f64>() - 2.0).abs() < 1e-12);
        assert!((obs[2] - 1.0).abs() < 1e-12);
        assert!((obs[4] - 1.0).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_encode_rejects_out_of_range() {
        let grid = make_grid(4, 2);
        grid.encode(&[4, 0]);
    }

    #[test]
    fn test_to_coords_spans_xrange() {
        let grid = make_grid(4, 2);
        let lo = grid.to_coords(&[0, 3]);
        assert!((lo[0] + 1.0).abs() < 1e-12);
        assert!((lo[1] - 1.0).abs() < 1e-12);
        let mid = grid.to_coords(&[1, 2]);
        assert!((mid[0] + 1.0 / 3.0).abs() < 1e-12);
        assert!((mid[1] - 1.0 / 3.0).abs() < 1e-12);
    }

    // ------------------------------------------------------------------
    // Parent enumeration
    // ------------------------------------------------------------------

    #[test]
    fn test_parents_of_stop_transition_is_state_itself() {
        let grid = make_grid(4, 2);
        let (parents, actions) = grid.parent_transitions(&[0, 0], true);
        assert_eq!(parents, vec![grid.encode(&[0, 0])]);
        assert_eq!(actions, vec![2]);
    }

    #[test]
    fn test_parents_of_interior_state() {
        let grid = make_grid(3, 2);
        let (parents, actions) = grid.parent_transitions(&[1, 1], false);
        assert_eq!(actions, vec![0, 1]);
        assert_eq!(parents[0], grid.encode(&[0, 1]));
        assert_eq!(parents[1], grid.encode(&[1, 0]));
    }

    #[test]
    fn test_parents_exclude_forced_terminal_predecessors() {
        // (2, 1) with horizon 3: decrementing dim 1 would give (2, 0), but
        // (2, 0) is forced-terminal so only (1, 1) via dim 0 remains.
        let grid = make_grid(3, 2);
        let (parents, actions) = grid.parent_transitions(&[2, 1], false);
        assert_eq!(actions, vec![0]);
        assert_eq!(parents, vec![grid.encode(&[1, 1])]);
    }

    #[test]
    fn test_far_corner_has_no_parents_on_tiny_grid() {
        // On a 2x2 grid every predecessor of (1, 1) is forced-terminal.
        let grid = make_grid(2, 2);
        let (parents, actions) = grid.parent_transitions(&[1, 1], false);
        assert!(parents.is_empty());
        assert!(actions.is_empty());
    }

    // ------------------------------------------------------------------
    // DAG stepping and lifecycle
    // ------------------------------------------------------------------

    #[test]
    fn test_reset_reports_origin() {
        let mut env = GridEnv::new(make_grid(3, 2), StepMode::Dag);
        assert_eq!(env.phase(), EpisodePhase::Ready);
        let out = env.reset();
        assert_eq!(env.phase(), EpisodePhase::Running);
        assert_eq!(out.state, vec![0, 0]);
        assert!(!out.done);
        assert!((out.reward - env.grid().reward_at(&[0, 0])).abs() < 1e-12);
    }

    #[test]
    fn test_step_increment_then_stop() {
        let mut env = GridEnv::new(make_grid(3, 2), StepMode::Dag);
        env.reset();

        let out = env.step(0);
        assert_eq!(out.state, vec![1, 0]);
        assert!(!out.done);
        assert_eq!(out.reward, 0.0);
        assert_eq!(env.phase(), EpisodePhase::Running);

        let out = env.step(2);
        assert_eq!(out.state, vec![1, 0]);
        assert!(out.done);
        assert!((out.reward - env.grid().reward_at(&[1, 0])).abs() < 1e-12);
        assert_eq!(env.phase(), EpisodePhase::Terminated);
        assert_eq!(env.steps_taken(), 2);
    }

    #[test]
    fn test_step_into_forced_terminal_ends_episode() {
        let mut env = GridEnv::new(make_grid(2, 2), StepMode::Dag);
        env.reset();
        let out = env.step(1);
        assert_eq!(out.state, vec![0, 1]);
        assert!(out.done);
        assert!(out.reward > 0.0);
        assert_eq!(env.phase(), EpisodePhase::Terminated);
    }

    #[test]
    #[should_panic(expected = "running episode")]
    fn test_step_after_termination_panics() {
        let mut env = GridEnv::new(make_grid(2, 2), StepMode::Dag);
        env.reset();
        env.step(0);
        env.step(1);
    }

    // ------------------------------------------------------------------
    // Chain stepping
    // ------------------------------------------------------------------

    #[test]
    fn test_chain_step_clamps_at_boundaries() {
        let mut env = GridEnv::new(make_grid(3, 2), StepMode::Chain);
        env.reset();

        // Decrement at the origin is a no-op; the reverse is the move itself.
        let out = env.step_chain(2);
        assert_eq!(out.state, vec![0, 0]);
        assert_eq!(out.reverse_action, 2);

        // A real increment reverses to the matching decrement.
        let out = env.step_chain(0);
        assert_eq!(out.state, vec![1, 0]);
        assert_eq!(out.reverse_action, 2);
        assert!((out.reward - env.grid().reward_at(&[1, 0])).abs() < 1e-12);

        // Chain episodes keep running even on forced-terminal cells.
        let out = env.step_chain(0);
        assert_eq!(out.state, vec![2, 0]);
        assert_eq!(env.phase(), EpisodePhase::Running);
        let out = env.step_chain(0);
        assert_eq!(out.state, vec![2, 0]);
        assert_eq!(out.reverse_action, 0);
    }

    // ------------------------------------------------------------------
    // Exact density
    // ------------------------------------------------------------------

    #[test]
    fn test_true_density_excludes_unreachable_corner() {
        let mut grid = make_grid(2, 2);
        let td = grid.true_density();
        assert_eq!(td.states, vec![vec![0, 0], vec![0, 1], vec![1, 0]]);
        assert!((td.density.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_true_density_on_three_by_three() {
        let mut grid = make_grid(3, 2);
        let td = grid.true_density();
        assert_eq!(td.states.len(), 8);
        assert!(!td.states.contains(&vec![2, 2]));
        assert!((td.density.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        for (d, r) in td.density.iter().zip(&td.rewards) {
            assert!(*d > 0.0);
            assert!(*r > 0.0);
        }
    }

    #[test]
    fn test_true_density_memoized_result_is_stable() {
        let mut grid = make_grid(3, 2);
        let first = grid.true_density();
        let second = grid.true_density();
        assert_eq!(first.states, second.states);
        for (a, b) in first.density.iter().zip(&second.density) {
            assert!((a - b).abs() < 1e-15);
        }
    }

    #[test]
    fn test_enumerate_states_order_matches_flat_index() {
        let grid = make_grid(3, 2);
        let states = grid.enumerate_states();
        assert_eq!(states.len(), 9);
        for (i, s) in states.iter().enumerate() {
            assert_eq!(grid.state_flat_index(s), i);
        }
        assert_eq!(states[5], vec![1, 2]);
    }
}
