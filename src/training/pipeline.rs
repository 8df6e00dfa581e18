//! Flow-matching training loop.
//!
//! Each outer step alternates sampling and learning according to
//! `train_to_sample_ratio`, evaluates the empirical terminal distribution on
//! a schedule, and finally assembles a [`TrainingReport`]:
//!
//! ```text
//! for i = 0 .. n_train_steps:
//!   a. Sample sttr minibatches of trajectories (plus replayed ones)
//!   b. For ttsr passes: compute flow-matching loss, apply optimizer step
//!   c. Every eval_interval steps: measure L1 / KL against the exact density
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::agent::{create_agent, AnyAgent};
use crate::config::GridFlowConfig;
use crate::env::{HyperGrid, TrueDensity};
use crate::model::Optimizer;
use crate::trajectory::TransitionBatch;

use super::eval::{empirical_distribution_error, DistributionError};

// ---------------------------------------------------------------------------
// Run records
// ---------------------------------------------------------------------------

/// Losses recorded for one learn pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LossRecord {
    /// Mean squared flow mismatch over the batch.
    pub total: f64,
    /// Terminal-transition component.
    pub terminal: f64,
    /// Intermediate-transition component.
    pub intermediate: f64,
}

/// One scheduled evaluation of the empirical terminal distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRecord {
    /// Outer step the evaluation ran at.
    pub step: usize,
    pub error: DistributionError,
}

/// Everything a finished run leaves behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub config: GridFlowConfig,
    /// One record per learn pass, in execution order.
    pub losses: Vec<LossRecord>,
    /// Every terminal state visited during sampling, in visitation order.
    pub visited: Vec<Vec<usize>>,
    pub eval_history: Vec<EvalRecord>,
    /// Exact reward-proportional density the run was measured against.
    pub true_density: TrueDensity,
    /// Final network parameters, weights and biases interleaved per layer.
    pub parameters: Vec<Vec<f64>>,
}

impl TrainingReport {
    /// Serialize the report to a pretty-printed JSON file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize training report to JSON")?;
        std::fs::write(path.as_ref(), json).with_context(|| {
            format!(
                "Failed to write training report to {}",
                path.as_ref().display()
            )
        })?;
        info!(
            path = %path.as_ref().display(),
            run_id = %self.run_id,
            "Saved training report"
        );
        Ok(())
    }

    /// Deserialize a report from a JSON file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!(
                "Failed to read training report from {}",
                path.as_ref().display()
            )
        })?;
        let report: Self =
            serde_json::from_str(&data).context("Failed to deserialize training report JSON")?;
        info!(
            path = %path.as_ref().display(),
            run_id = %report.run_id,
            "Loaded training report"
        );
        Ok(report)
    }

    /// Loss of the final learn pass, if any passes ran.
    pub fn final_loss(&self) -> Option<f64> {
        self.losses.last().map(|l| l.total)
    }
}

// ---------------------------------------------------------------------------
// Trainer
// ---------------------------------------------------------------------------

/// Owns the agent, optimizer, and evaluation grid for one training run.
pub struct Trainer {
    config: GridFlowConfig,
    agent: AnyAgent,
    optimizer: Optimizer,
    eval_grid: HyperGrid,
}

impl Trainer {
    pub fn new(config: GridFlowConfig) -> Result<Self> {
        let ratio = config.training.train_to_sample_ratio;
        if !(ratio.is_finite() && ratio > 0.0) {
            bail!("train_to_sample_ratio must be positive (got {ratio})");
        }
        if config.training.eval_interval == 0 {
            bail!("eval_interval must be at least 1");
        }
        let agent = create_agent(&config)?;
        let optimizer = Optimizer::new(&config.optimizer, agent.model());
        let eval_grid = HyperGrid::from_config(&config.grid)?;
        Ok(Self {
            config,
            agent,
            optimizer,
            eval_grid,
        })
    }

    /// Run the full loop and return the assembled report.
    pub fn run(&mut self) -> Result<TrainingReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();

        let training = &self.config.training;
        let ratio = training.train_to_sample_ratio;
        let ttsr = (ratio.round() as usize).max(1);
        let sttr = ((1.0 / ratio).round() as usize).max(1);

        info!(
            run_id = %run_id,
            steps = training.n_train_steps,
            mbsize = training.mbsize,
            ttsr,
            sttr,
            "Starting flow-matching training"
        );

        let mut losses: Vec<LossRecord> = Vec::new();
        let mut eval_history: Vec<EvalRecord> = Vec::new();
        let mut all_visited: Vec<Vec<usize>> = Vec::new();

        for step in 0..=training.n_train_steps {
            let mut data = TransitionBatch::new();
            for _ in 0..sttr {
                let batch = self.agent.sample_many(&mut all_visited);
                data.extend(batch.into_vec());
            }

            for _ in 0..ttsr {
                let outcome = self
                    .agent
                    .learn_from(&data)
                    .with_context(|| format!("Learn pass failed at step {step}"))?;
                self.optimizer.step(self.agent.model_mut(), &outcome.grads);
                losses.push(LossRecord {
                    total: outcome.loss,
                    terminal: outcome.term_loss,
                    intermediate: outcome.flow_loss,
                });
            }

            if step % self.config.training.eval_interval == 0 {
                let window_start = all_visited
                    .len()
                    .saturating_sub(self.config.training.num_empirical_loss);
                let error =
                    empirical_distribution_error(&mut self.eval_grid, &all_visited[window_start..]);
                info!(step, l1 = error.l1, kl = error.kl, "Empirical distribution error");
                eval_history.push(EvalRecord { step, error });
            }

            debug!(
                step,
                loss = losses.last().map(|l| l.total).unwrap_or(f64::NAN),
                visited = all_visited.len(),
                "Training step complete"
            );
        }

        let report = TrainingReport {
            run_id,
            started_at,
            config: self.config.clone(),
            losses,
            visited: all_visited,
            eval_history,
            true_density: self.eval_grid.true_density(),
            parameters: self.agent.model().parameter_snapshot(),
        };

        info!(
            run_id = %report.run_id,
            final_loss = report.final_loss().unwrap_or(f64::NAN),
            visited = report.visited.len(),
            evals = report.eval_history.len(),
            "Training finished"
        );
        Ok(report)
    }
}

// ------------------------------------------------------------------
// Tests
// ------------------------------------------------------------------
