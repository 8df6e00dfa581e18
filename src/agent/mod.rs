//! Training agents.
//!
//! One agent family is implemented today, flow matching. The [`AnyAgent`]
//! wrapper keeps the training pipeline agnostic of the concrete method so
//! further objectives can slot in beside it.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::GridFlowConfig;
use crate::model::FlowNet;
use crate::trajectory::TransitionBatch;

pub mod flownet;

pub use flownet::{FlowMatchOutcome, FlowNetAgent, LOG_INF};

/// Which training objective to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    FlowMatching,
}

/// Concrete agent behind a uniform sampling/learning surface.
pub enum AnyAgent {
    FlowMatching(FlowNetAgent),
}

impl AnyAgent {
    pub fn sample_many(&mut self, all_visited: &mut Vec<Vec<usize>>) -> TransitionBatch {
        match self {
            Self::FlowMatching(agent) => agent.sample_many(all_visited),
        }
    }

    pub fn learn_from(&mut self, batch: &TransitionBatch) -> Result<FlowMatchOutcome> {
        match self {
            Self::FlowMatching(agent) => agent.learn_from(batch),
        }
    }

    pub fn model(&self) -> &FlowNet {
        match self {
            Self::FlowMatching(agent) => agent.model(),
        }
    }

    pub fn model_mut(&mut self) -> &mut FlowNet {
        match self {
            Self::FlowMatching(agent) => agent.model_mut(),
        }
    }
}

/// Builds the agent selected by the config.
pub fn create_agent(config: &GridFlowConfig) -> Result<AnyAgent> {
    match config.training.method {
        AgentKind::FlowMatching => {
            let agent = FlowNetAgent::new(config)?;
            info!(
                horizon = config.grid.horizon,
                ndim = config.grid.ndim,
                params = agent.model().num_params(),
                "created flow-matching agent"
            );
            Ok(AnyAgent::FlowMatching(agent))
        }
    }
}
