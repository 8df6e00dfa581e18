//! Training loop and evaluation.
//!
//! - [`pipeline`] -- the sample/learn/evaluate loop and its persisted
//!   [`TrainingReport`].
//! - [`eval`] -- empirical distances against the exact terminal density.

pub mod eval;
pub mod pipeline;

pub use eval::{empirical_distribution_error, DistributionError};
pub use pipeline::{EvalRecord, LossRecord, Trainer, TrainingReport};
