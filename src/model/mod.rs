//! The flow approximator and its optimizers.
//!
//! - [`mlp`] -- dense LeakyReLU network with recorded-forward/backward
//!   evaluation ([`FlowNet`]).
//! - [`optim`] -- Adam and momentum-SGD updates over its parameters.

pub mod mlp;
pub mod optim;

pub use mlp::{DenseLayer, FlowNet, ForwardTrace, NetGradients, LEAKY_SLOPE};
pub use optim::{Optimizer, OptimizerKind};
