use serde::{Deserialize, Serialize};

use crate::agent::AgentKind;
use crate::env::RewardKind;
use crate::model::OptimizerKind;
use crate::trajectory::ReplayStrategy;

/// Complete configuration for a GridFlow training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridFlowConfig {
    pub grid: GridConfig,
    pub model: ModelConfig,
    pub optimizer: OptimizerConfig,
    pub replay: ReplayConfig,
    pub training: TrainingConfig,
}

/// Hypergrid environment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Number of cells per dimension (default: 4).
    pub horizon: usize,
    /// Number of grid dimensions (default: 2).
    pub ndim: usize,
    /// Coordinate range each dimension is mapped onto (default: [-1, 1]).
    pub xrange: [f64; 2],
    /// Reward function evaluated on mapped coordinates (default: corners-floor-b).
    pub reward: RewardKind,
}

/// Flow approximator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Width of each hidden layer (default: 256).
    pub n_hid: usize,
    /// Number of hidden layers (default: 2).
    pub n_layers: usize,
}

/// Optimizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Which optimizer to use (default: adam).
    pub kind: OptimizerKind,
    /// Learning rate (default: 2.5e-5).
    pub learning_rate: f64,
    /// Adam first-moment decay rate (default: 0.9).
    pub adam_beta1: f64,
    /// Adam second-moment decay rate (default: 0.999).
    pub adam_beta2: f64,
    /// Momentum coefficient for momentum-sgd (default: 0.9).
    pub momentum: f64,
}

/// Replay buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Retention strategy (default: none, i.e. replay disabled).
    pub strategy: ReplayStrategy,
    /// Backward trajectories drawn per sampling pass (default: 2).
    pub sample_size: usize,
    /// Maximum number of retained terminal states (default: 100).
    pub capacity: usize,
}

/// Training loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Which agent to train (default: flow-matching).
    pub method: AgentKind,
    /// Number of outer training steps (default: 100).
    pub n_train_steps: usize,
    /// Number of parallel environments sampled per pass (default: 16).
    pub mbsize: usize,
    /// Ratio of learn passes to sampling passes per outer step (default: 1).
    pub train_to_sample_ratio: f64,
    /// EMA rate for the bootstrap target network; 0 disables the target
    /// network entirely (default: 0.1).
    pub bootstrap_tau: f64,
    /// Window of most recent visited states used for evaluation
    /// (default: 200000).
    pub num_empirical_loss: usize,
    /// Outer-step interval between empirical evaluations (default: 100).
    pub eval_interval: usize,
    /// RNG seed for weight init, action sampling, and replay (default: 0).
    pub seed: u64,
}

impl Default for GridFlowConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig {
                horizon: 4,
                ndim: 2,
                xrange: [-1.0, 1.0],
                reward: RewardKind::CornersFloorB,
            },
            model: ModelConfig {
                n_hid: 256,
                n_layers: 2,
            },
            optimizer: OptimizerConfig {
                kind: OptimizerKind::Adam,
                learning_rate: 2.5e-5,
                adam_beta1: 0.9,
                adam_beta2: 0.999,
                momentum: 0.9,
            },
            replay: ReplayConfig {
                strategy: ReplayStrategy::None,
                sample_size: 2,
                capacity: 100,
            },
            training: TrainingConfig {
                method: AgentKind::FlowMatching,
                n_train_steps: 100,
                mbsize: 16,
                train_to_sample_ratio: 1.0,
                bootstrap_tau: 0.1,
                num_empirical_loss: 200_000,
                eval_interval: 100,
                seed: 0,
            },
        }
    }
}
