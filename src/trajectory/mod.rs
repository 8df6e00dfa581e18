//! Transition records and replay over terminal states.
//!
//! - [`types`] -- the flat [`Transition`] / [`TransitionBatch`] records the
//!   learner consumes.
//! - [`replay`] -- top-k retention of terminal states plus backward
//!   trajectory reconstruction.

pub mod replay;
pub mod types;

pub use replay::{generate_backward, ReplayBuffer, ReplayEntry, ReplayStrategy};
pub use types::{Transition, TransitionBatch};
