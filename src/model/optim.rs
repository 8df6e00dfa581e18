//! First-order optimizers over [`FlowNet`] parameters.

use serde::{Deserialize, Serialize};

use crate::config::OptimizerConfig;
use crate::model::mlp::{FlowNet, NetGradients};

const ADAM_EPS: f64 = 1e-8;

/// Which optimizer to run, selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizerKind {
    Adam,
    MomentumSgd,
}

/// A configured optimizer with its per-parameter state.
#[derive(Debug, Clone)]
pub enum Optimizer {
    Adam(Adam),
    MomentumSgd(MomentumSgd),
}

impl Optimizer {
    pub fn new(config: &OptimizerConfig, net: &FlowNet) -> Self {
        match config.kind {
            OptimizerKind::Adam => Self::Adam(Adam::new(config, net)),
            OptimizerKind::MomentumSgd => Self::MomentumSgd(MomentumSgd::new(config, net)),
        }
    }

    /// Apply one update from accumulated gradients.
    pub fn step(&mut self, net: &mut FlowNet, grads: &NetGradients) {
        match self {
            Self::Adam(opt) => opt.step(net, grads),
            Self::MomentumSgd(opt) => opt.step(net, grads),
        }
    }
}

// ---------------------------------------------------------------------------
// Adam
// ---------------------------------------------------------------------------

/// Adam with bias-corrected step size folded into the learning rate.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    t: i32,
    m_w: Vec<Vec<f64>>,
    v_w: Vec<Vec<f64>>,
    m_b: Vec<Vec<f64>>,
    v_b: Vec<Vec<f64>>,
}

impl Adam {
    pub fn new(config: &OptimizerConfig, net: &FlowNet) -> Self {
        let zeros = NetGradients::zeros_like(net);
        Self {
            lr: config.learning_rate,
            beta1: config.adam_beta1,
            beta2: config.adam_beta2,
            t: 0,
            m_w: zeros.w.clone(),
            v_w: zeros.w,
            m_b: zeros.b.clone(),
            v_b: zeros.b,
        }
    }

    pub fn step(&mut self, net: &mut FlowNet, grads: &NetGradients) {
        self.t += 1;
        let lr_t =
            self.lr * (1.0 - self.beta2.powi(self.t)).sqrt() / (1.0 - self.beta1.powi(self.t));

        for (l, layer) in net.layers_mut().iter_mut().enumerate() {
            update_adam(
                &mut layer.w,
                &grads.w[l],
                &mut self.m_w[l],
                &mut self.v_w[l],
                self.beta1,
                self.beta2,
                lr_t,
            );
            update_adam(
                &mut layer.b,
                &grads.b[l],
                &mut self.m_b[l],
                &mut self.v_b[l],
                self.beta1,
                self.beta2,
                lr_t,
            );
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn update_adam(
    params: &mut [f64],
    grads: &[f64],
    m: &mut [f64],
    v: &mut [f64],
    beta1: f64,
    beta2: f64,
    lr_t: f64,
) {
    for i in 0..params.len() {
        let g = grads[i];
        m[i] = beta1 * m[i] + (1.0 - beta1) * g;
        v[i] = beta2 * v[i] + (1.0 - beta2) * g * g;
        params[i] -= lr_t * m[i] / (v[i].sqrt() + ADAM_EPS);
    }
}

// ---------------------------------------------------------------------------
// Momentum SGD
// ---------------------------------------------------------------------------

/// SGD with a classical momentum buffer.
#[derive(Debug, Clone)]
pub struct MomentumSgd {
    lr: f64,
    momentum: f64,
    vel_w: Vec<Vec<f64>>,
    vel_b: Vec<Vec<f64>>,
}

impl MomentumSgd {
    pub fn new(config: &OptimizerConfig, net: &FlowNet) -> Self {
        let zeros = NetGradients::zeros_like(net);
        Self {
            lr: config.learning_rate,
            momentum: config.momentum,
            vel_w: zeros.w,
            vel_b: zeros.b,
        }
    }

    pub fn step(&mut self, net: &mut FlowNet, grads: &NetGradients) {
        for (l, layer) in net.layers_mut().iter_mut().enumerate() {
            update_msgd(
                &mut layer.w,
                &grads.w[l],
                &mut self.vel_w[l],
                self.momentum,
                self.lr,
            );
            update_msgd(
                &mut layer.b,
                &grads.b[l],
                &mut self.vel_b[l],
                self.momentum,
                self.lr,
            );
        }
    }
}

fn update_msgd(params: &mut [f64], grads: &[f64], vel: &mut [f64], momentum: f64, lr: f64) {
    for i in 0..params.len() {
        vel[i] = momentum * vel[i] + grads[i];
        params[i] -= lr * vel[i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn scalar_net() -> FlowNet {
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = FlowNet::new(&[1, 1], &mut rng);
        net.layers_mut()[0].w[0] = 0.0;
        net.layers_mut()[0].b[0] = 0.0;
        net
    }

    fn unit_grads(net: &FlowNet) -> NetGradients {
        let mut grads = NetGradients::zeros_like(net);
        grads.w[0][0] = 1.0;
        grads.b[0][0] = 1.0;
        grads
    }

    fn opt_config(kind: OptimizerKind) -> OptimizerConfig {
        OptimizerConfig {
            kind,
            learning_rate: 0.1,
            adam_beta1: 0.9,
            adam_beta2: 0.999,
            momentum: 0.9,
        }
    }

    #[test]
    fn test_adam_constant_gradient_moves_by_lr() {
        // With a constant unit gradient the bias-corrected step is ~lr:
        // t=1: m=0.1, v=0.001, lr_t = 0.1*sqrt(0.001)/0.1, so the update is
        // lr_t * 0.1 / sqrt(0.001) ~= 0.1.
        let mut net = scalar_net();
        let grads = unit_grads(&net);
        let mut opt = Optimizer::new(&opt_config(OptimizerKind::Adam), &net);

        opt.step(&mut net, &grads);
        assert!((net.layers()[0].w[0] + 0.1).abs() < 1e-6);

        opt.step(&mut net, &grads);
        assert!((net.layers()[0].w[0] + 0.2).abs() < 1e-5);
        // Weights and biases share the same update math.
        assert!((net.layers()[0].w[0] - net.layers()[0].b[0]).abs() < 1e-12);
    }

    #[test]
    fn test_msgd_momentum_accumulates() {
        // buf_1 = 1, p = -0.1; buf_2 = 1.9, p = -0.29.
        let mut net = scalar_net();
        let grads = unit_grads(&net);
        let mut opt = Optimizer::new(&opt_config(OptimizerKind::MomentumSgd), &net);

        opt.step(&mut net, &grads);
        assert!((net.layers()[0].w[0] + 0.1).abs() < 1e-12);

        opt.step(&mut net, &grads);
        assert!((net.layers()[0].w[0] + 0.29).abs() < 1e-12);
    }

    #[test]
    fn test_kind_dispatch() {
        let net = scalar_net();
        assert!(matches!(
            Optimizer::new(&opt_config(OptimizerKind::Adam), &net),
            Optimizer::Adam(_)
        ));
        assert!(matches!(
            Optimizer::new(&opt_config(OptimizerKind::MomentumSgd), &net),
            Optimizer::MomentumSgd(_)
        ));
    }
}
