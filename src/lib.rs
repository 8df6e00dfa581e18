//! GridFlow: training generative flow networks on hypergrid environments.
//!
//! Implements the flow-matching objective over a D-dimensional grid DAG so
//! that, after training, terminal states are sampled with probability
//! proportional to a configurable reward function.

pub mod agent;
pub mod config;
pub mod env;
pub mod model;
pub mod training;
pub mod trajectory;
