//! Flow-matching agent for hypergrid environments.
//!
//! The agent rolls out a bank of environments in parallel, sampling actions
//! from a softmax over the flow network's edge-flow logits, and trains the
//! network by minimising the squared mismatch between log-inflow and
//! log-outflow at every visited state.

use anyhow::{bail, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::GridFlowConfig;
use crate::env::{GridEnv, HyperGrid, StepMode};
use crate::model::{FlowNet, NetGradients};
use crate::trajectory::{ReplayBuffer, Transition, TransitionBatch};

/// Finite stand-in for infinity when masking successor flows in log space.
///
/// Terminal states have no successors, so their outgoing edge flows are
/// forced to `exp(-LOG_INF)`, which underflows to zero inside logsumexp.
pub const LOG_INF: f64 = 1000.0;

// ---------------------------------------------------------------------------
// Flow-matching outcome
// ---------------------------------------------------------------------------

/// Losses and parameter gradients produced by one flow-matching pass.
#[derive(Debug, Clone)]
pub struct FlowMatchOutcome {
    /// Mean squared flow-mismatch over the whole batch.
    pub loss: f64,
    /// Mean squared mismatch over terminal transitions only.
    pub term_loss: f64,
    /// Mean squared mismatch over intermediate transitions only.
    pub flow_loss: f64,
    /// Gradients of `loss` with respect to every network parameter.
    pub grads: NetGradients,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Samples trajectories and computes flow-matching losses and gradients.
pub struct FlowNetAgent {
    grid: HyperGrid,
    envs: Vec<GridEnv>,
    model: FlowNet,
    target: FlowNet,
    replay: ReplayBuffer,
    /// EMA rate for the target network. Zero disables bootstrapping and the
    /// successor flows are read from the online network instead.
    tau: f64,
    rng: StdRng,
}

impl FlowNetAgent {
    /// Creates an agent with a fresh network and an environment bank sized
    /// by the configured minibatch.
    pub fn new(config: &GridFlowConfig) -> Result<Self> {
        if config.training.mbsize == 0 {
            bail!("minibatch size must be at least 1");
        }
        let grid = HyperGrid::from_config(&config.grid)?;
        let envs = (0..config.training.mbsize)
            .map(|_| GridEnv::new(grid.clone(), StepMode::Dag))
            .collect();
        let mut rng = StdRng::seed_from_u64(config.training.seed);
        let model = FlowNet::from_config(
            grid.obs_len(),
            grid.num_actions(),
            &config.model,
            &mut rng,
        );
        let target = model.clone();
        let replay = ReplayBuffer::new(&config.replay);
        Ok(Self {
            grid,
            envs,
            model,
            target,
            replay,
            tau: config.training.bootstrap_tau,
            rng,
        })
    }

    pub fn model(&self) -> &FlowNet {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut FlowNet {
        &mut self.model
    }

    /// Rolls out every environment in the bank to termination and returns the
    /// collected transitions, prepended with any replayed trajectories.
    ///
    /// Terminal states are appended to `all_visited` and offered to the
    /// replay buffer.
    pub fn sample_many(&mut self, all_visited: &mut Vec<Vec<usize>>) -> TransitionBatch {
        let mut batch = TransitionBatch::new();
        batch.extend(self.replay.sample(&self.grid, &mut self.rng));

        let mut obs: Vec<Vec<f64>> = self.envs.iter_mut().map(|e| e.reset().obs).collect();
        let mut finished = vec![false; self.envs.len()];

        while finished.iter().any(|f| !f) {
            let active: Vec<usize> = (0..self.envs.len()).filter(|&i| !finished[i]).collect();
            let active_obs: Vec<Vec<f64>> = active.iter().map(|&i| obs[i].clone()).collect();
            let logits = self.model.forward(&active_obs);

            for (&i, row) in active.iter().zip(&logits) {
                let action = sample_softmax(row, &mut self.rng);
                let outcome = self.envs[i].step(action);
                let (parents, parent_actions) = self
                    .grid
                    .parent_transitions(&outcome.state, action == self.grid.stop_action());
                batch.push(Transition {
                    parents,
                    parent_actions,
                    reward: outcome.reward,
                    next_obs: outcome.obs.clone(),
                    done: outcome.done,
                });
                if outcome.done {
                    all_visited.push(outcome.state.clone());
                    self.replay.add(outcome.state, outcome.reward);
                    finished[i] = true;
                } else {
                    obs[i] = outcome.obs;
                }
            }
        }

        debug!(
            transitions = batch.len(),
            terminal = batch.num_terminal(),
            "sampled minibatch"
        );
        batch
    }

    /// Computes the flow-matching losses and gradients for a batch.
    ///
    /// For each transition the log-inflow aggregates the parent edge flows
    /// `q(parent, action)` and the log-outflow aggregates the reward with the
    /// successor edge flows, masked to `-LOG_INF` on terminal rows. The loss
    /// is the mean squared difference. Gradients are exact and flow through
    /// both the parent rows and, when bootstrapping is disabled, the
    /// successor rows.
    ///
    /// When `bootstrap_tau > 0` the successor flows come from a frozen target
    /// network, which is then nudged towards the online network by EMA.
    pub fn learn_from(&mut self, batch: &TransitionBatch) -> Result<FlowMatchOutcome> {
        if batch.is_empty() {
            bail!("cannot learn from an empty transition batch");
        }
        let n = batch.len();
        let num_actions = self.grid.num_actions();

        // Flatten the ragged parent sets into one forward pass, remembering
        // which transition owns each row.
        let mut parent_obs = Vec::with_capacity(batch.num_parent_rows());
        let mut parent_actions = Vec::with_capacity(batch.num_parent_rows());
        let mut owner = Vec::with_capacity(batch.num_parent_rows());
        for (i, t) in batch.iter().enumerate() {
            for (p, &a) in t.parents.iter().zip(&t.parent_actions) {
                parent_obs.push(p.clone());
                parent_actions.push(a);
                owner.push(i);
            }
        }

        let parent_trace = self.model.forward_recorded(&parent_obs);
        let q_sa: Vec<f64> = parent_trace
            .outputs
            .iter()
            .zip(&parent_actions)
            .map(|(row, &a)| row[a])
            .collect();

        // Inflow: scatter-add the parent flows in probability space.
        let mut in_exp = vec![0.0; n];
        for (k, &i) in owner.iter().enumerate() {
            in_exp[i] += q_sa[k].exp();
        }
        let in_flow: Vec<f64> = in_exp.iter().map(|v| v.ln()).collect();

        // Successor flows: online network (with gradients) unless a target
        // network is bootstrapping.
        let child_obs: Vec<Vec<f64>> = batch.iter().map(|t| t.next_obs.clone()).collect();
        let child_trace = if self.tau > 0.0 {
            None
        } else {
            Some(self.model.forward_recorded(&child_obs))
        };
        let next_q: Vec<Vec<f64>> = match &child_trace {
            Some(trace) => trace.outputs.clone(),
            None => self.target.forward(&child_obs),
        };

        let mut out_flow = Vec::with_capacity(n);
        for (i, t) in batch.iter().enumerate() {
            let mut terms = Vec::with_capacity(num_actions + 1);
            terms.push(t.reward.ln());
            if t.done {
                terms.extend(std::iter::repeat(-LOG_INF).take(num_actions));
            } else {
                terms.extend(next_q[i].iter().copied());
            }
            out_flow.push(logsumexp(&terms));
        }

        let mut loss = 0.0;
        let mut term_sum = 0.0;
        let mut flow_sum = 0.0;
        let mut n_term = 0usize;
        for (i, t) in batch.iter().enumerate() {
            let resid = in_flow[i] - out_flow[i];
            let sq = resid * resid;
            loss += sq;
            if t.done {
                term_sum += sq;
                n_term += 1;
            } else {
                flow_sum += sq;
            }
        }
        loss /= n as f64;
        let term_loss = term_sum / (n_term as f64 + 1e-20);
        let flow_loss = flow_sum / ((n - n_term) as f64 + 1e-20);

        // d loss / d resid_i = 2 resid_i / n. Through the log-sum-exps that
        // becomes a softmax weighting of each contributing flow.
        let scale = 2.0 / n as f64;
        let mut parent_grads = vec![vec![0.0; num_actions]; parent_obs.len()];
        for (k, &i) in owner.iter().enumerate() {
            let resid = in_flow[i] - out_flow[i];
            parent_grads[k][parent_actions[k]] = scale * resid * (q_sa[k] - in_flow[i]).exp();
        }
        let mut grads = self.model.backward(&parent_trace, &parent_grads);

        if let Some(trace) = &child_trace {
            let mut child_grads = vec![vec![0.0; num_actions]; n];
            for (i, t) in batch.iter().enumerate() {
                if t.done {
                    continue;
                }
                let resid = in_flow[i] - out_flow[i];
                for (a, g) in child_grads[i].iter_mut().enumerate() {
                    *g = -scale * resid * (next_q[i][a] - out_flow[i]).exp();
                }
            }
            grads.accumulate(&self.model.backward(trace, &child_grads));
        }

        if self.tau > 0.0 {
            self.target.ema_update(&self.model, self.tau);
        }

        debug!(loss, term_loss, flow_loss, transitions = n, "flow-matching pass");
        Ok(FlowMatchOutcome {
            loss,
            term_loss,
            flow_loss,
            grads,
        })
    }
}

/// Draws an action index from the softmax of a logit row.
fn sample_softmax(logits: &[f64], rng: &mut impl Rng) -> usize {
    let max = logits.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let weights: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let dist = WeightedIndex::new(&weights).expect("softmax weights are positive");
    dist.sample(rng)
}

/// Numerically stable `ln(sum(exp(terms)))`.
fn logsumexp(terms: &[f64]) -> f64 {
    let max = terms.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + terms.iter().map(|t| (t - max).exp()).sum::<f64>().ln()
}

// ------------------------------------------------------------------
// Tests
// ------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::RewardKind;
    use crate::model::Optimizer;
    use crate::trajectory::ReplayStrategy;

    fn test_config(horizon: usize, ndim: usize, tau: f64) -> GridFlowConfig {
        let mut config = GridFlowConfig::default();
        config.grid.horizon = horizon;
        config.grid.ndim = ndim;
        config.grid.reward = RewardKind::CornersFloorB;
        config.model.n_hid = 8;
        config.model.n_layers = 2;
        config.training.mbsize = 4;
        config.training.bootstrap_tau = tau;
        config.training.seed = 7;
        config
    }

    fn zero_params(net: &mut FlowNet) {
        for layer in net.layers_mut() {
            layer.w.iter_mut().for_each(|v| *v = 0.0);
            layer.b.iter_mut().for_each(|v| *v = 0.0);
        }
    }

    fn stop_transition_at_origin(grid: &HyperGrid, reward: f64) -> Transition {
        let origin = vec![0; grid.ndim];
        let (parents, parent_actions) = grid.parent_transitions(&origin, true);
        Transition {
            parents,
            parent_actions,
            reward,
            next_obs: grid.encode(&origin),
            done: true,
        }
    }

    #[test]
    fn test_learn_from_hand_computed_stop_transition() {
        // Zeroed network: every edge flow is exp(0) = 1. Stopping at the
        // origin with reward e gives in_flow = ln 1 = 0 and
        // out_flow = logsumexp([1, -1000, -1000, -1000]) = 1, so the loss is
        // 1 and the only nonzero gradient is -2 on the stop-action output
        // bias.
        let config = test_config(3, 2, 0.1);
        let mut agent = FlowNetAgent::new(&config).unwrap();
        zero_params(&mut agent.model);
        zero_params(&mut agent.target);

        let batch: TransitionBatch =
            vec![stop_transition_at_origin(&agent.grid, std::f64::consts::E)].into();
        let outcome = agent.learn_from(&batch).unwrap();

        assert!((outcome.loss - 1.0).abs() < 1e-12);
        assert!((outcome.term_loss - 1.0).abs() < 1e-9);
        assert!(outcome.flow_loss.abs() < 1e-12);

        let stop = agent.grid.stop_action();
        let last = outcome.grads.b.len() - 1;
        for (l, biases) in outcome.grads.b.iter().enumerate() {
            for (a, g) in biases.iter().enumerate() {
                if l == last && a == stop {
                    assert!((g - (-2.0)).abs() < 1e-9, "stop bias grad was {g}");
                } else {
                    assert!(g.abs() < 1e-12, "unexpected bias grad {g} at layer {l}");
                }
            }
        }
        for weights in &outcome.grads.w {
            for g in weights {
                assert!(g.abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_learn_from_empty_batch_errors() {
        let config = test_config(3, 2, 0.0);
        let mut agent = FlowNetAgent::new(&config).unwrap();
        assert!(agent.learn_from(&TransitionBatch::new()).is_err());
    }

    #[test]
    fn test_loss_invariant_under_batch_order() {
        let config = test_config(3, 2, 0.0);
        let mut agent = FlowNetAgent::new(&config).unwrap();
        let grid = agent.grid.clone();

        let (p1, a1) = grid.parent_transitions(&[1, 0], false);
        let t1 = Transition {
            parents: p1,
            parent_actions: a1,
            reward: 0.0,
            next_obs: grid.encode(&[1, 0]),
            done: false,
        };
        let (p2, a2) = grid.parent_transitions(&[1, 0], true);
        let t2 = Transition {
            parents: p2,
            parent_actions: a2,
            reward: grid.reward_at(&[1, 0]),
            next_obs: grid.encode(&[1, 0]),
            done: true,
        };
        let (p3, a3) = grid.parent_transitions(&[1, 1], false);
        let t3 = Transition {
            parents: p3,
            parent_actions: a3,
            reward: 0.0,
            next_obs: grid.encode(&[1, 1]),
            done: false,
        };

        let forward: TransitionBatch = vec![t1.clone(), t2.clone(), t3.clone()].into();
        let shuffled: TransitionBatch = vec![t3, t1, t2].into();

        // tau = 0 keeps learn_from free of side effects, so the two calls
        // see identical parameters.
        let a = agent.learn_from(&forward).unwrap();
        let b = agent.learn_from(&shuffled).unwrap();

        assert!((a.loss - b.loss).abs() < 1e-9);
        assert!((a.term_loss - b.term_loss).abs() < 1e-9);
        assert!((a.flow_loss - b.flow_loss).abs() < 1e-9);
        for (wa, wb) in a.grads.w.iter().zip(&b.grads.w) {
            for (x, y) in wa.iter().zip(wb) {
                assert!((x - y).abs() < 1e-9);
            }
        }
        for (ba, bb) in a.grads.b.iter().zip(&b.grads.b) {
            for (x, y) in ba.iter().zip(bb) {
                assert!((x - y).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_bootstrap_moves_target_towards_model() {
        let config = test_config(3, 2, 0.5);
        let mut agent = FlowNetAgent::new(&config).unwrap();
        zero_params(&mut agent.target);
        for layer in agent.model.layers_mut() {
            layer.w.iter_mut().for_each(|v| *v = 1.0);
            layer.b.iter_mut().for_each(|v| *v = 1.0);
        }

        let batch: TransitionBatch = vec![stop_transition_at_origin(&agent.grid, 1.0)].into();
        agent.learn_from(&batch).unwrap();

        for layer in agent.target.layers() {
            for v in layer.w.iter().chain(&layer.b) {
                assert!((v - 0.5).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_sample_many_fills_batch_and_visited() {
        let config = test_config(3, 2, 0.1);
        let mut agent = FlowNetAgent::new(&config).unwrap();
        let mut visited = Vec::new();
        let batch = agent.sample_many(&mut visited);

        assert_eq!(visited.len(), 4);
        assert_eq!(batch.num_terminal(), 4);
        for t in batch.iter() {
            assert!(!t.parents.is_empty());
            assert_eq!(t.parents.len(), t.parent_actions.len());
            if t.done {
                assert!(t.reward > 0.0);
            } else {
                assert_eq!(t.reward, 0.0);
            }
        }
    }

    #[test]
    fn test_sample_many_replays_past_trajectories() {
        let mut config = test_config(3, 2, 0.1);
        config.replay.strategy = ReplayStrategy::TopK;
        config.replay.sample_size = 2;
        config.replay.capacity = 16;
        let mut agent = FlowNetAgent::new(&config).unwrap();

        let mut visited = Vec::new();
        agent.sample_many(&mut visited);
        assert!(agent.replay.len() > 0);

        let second = agent.sample_many(&mut visited);
        // Four fresh terminals plus one per replayed trajectory that did not
        // collapse to the empty origin walk.
        assert!(second.num_terminal() >= 4);
    }

    #[test]
    fn test_softmax_sampler_prefers_dominant_logit() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..100 {
            assert_eq!(sample_softmax(&[10.0, -10.0, -10.0], &mut rng), 0);
        }
    }

    #[test]
    fn test_gradient_descent_reduces_hand_built_loss() {
        let mut config = test_config(3, 2, 0.0);
        config.optimizer.learning_rate = 0.01;
        let mut agent = FlowNetAgent::new(&config).unwrap();
        zero_params(&mut agent.model);
        let mut optimizer = Optimizer::new(&config.optimizer, agent.model());

        let batch: TransitionBatch =
            vec![stop_transition_at_origin(&agent.grid, std::f64::consts::E)].into();
        let first = agent.learn_from(&batch).unwrap();
        for _ in 0..200 {
            let outcome = agent.learn_from(&batch).unwrap();
            optimizer.step(agent.model_mut(), &outcome.grads);
        }
        let last = agent.learn_from(&batch).unwrap();
        assert!(last.loss < first.loss);
    }
}
