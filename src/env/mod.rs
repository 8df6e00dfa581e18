//! Hypergrid environment: geometry, rewards, episodes, and diagnostics.
//!
//! - [`grid`] -- the DAG geometry ([`HyperGrid`]) and the episodic wrapper
//!   ([`GridEnv`]) samplers interact with.
//! - [`reward`] -- the reward family evaluated on mapped coordinates.
//! - [`analysis`] -- bounded exhaustive enumeration for small grids.

pub mod analysis;
pub mod grid;
pub mod reward;

pub use grid::{
    ChainOutcome, EpisodePhase, GridEnv, HyperGrid, StepMode, StepOutcome, TrueDensity,
};
pub use reward::RewardKind;
