//! Dense LeakyReLU network used to approximate edge flows.
//!
//! The network is deliberately small and self-contained: plain `f64` math,
//! Glorot-uniform init, hidden LeakyReLU activations, linear output. Two
//! evaluation paths exist -- [`FlowNet::forward`] for inference and
//! [`FlowNet::forward_recorded`], which caches activations so
//! [`FlowNet::backward`] can turn output gradients into parameter gradients.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;

/// Negative-side slope of the hidden activation.
pub const LEAKY_SLOPE: f64 = 0.01;

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

/// A fully connected layer with row-major weights (`out_dim` rows of
/// `in_dim` weights).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    pub w: Vec<f64>,
    pub b: Vec<f64>,
    pub in_dim: usize,
    pub out_dim: usize,
}

impl DenseLayer {
    fn glorot(in_dim: usize, out_dim: usize, rng: &mut impl Rng) -> Self {
        let limit = (6.0 / (in_dim + out_dim) as f64).sqrt();
        let w = (0..in_dim * out_dim)
            .map(|_| rng.gen_range(-limit..limit))
            .collect();
        Self {
            w,
            b: vec![0.0; out_dim],
            in_dim,
            out_dim,
        }
    }

    fn affine(&self, x: &[f64]) -> Vec<f64> {
        debug_assert_eq!(x.len(), self.in_dim);
        let mut z = self.b.clone();
        for (o, zo) in z.iter_mut().enumerate() {
            let row = &self.w[o * self.in_dim..(o + 1) * self.in_dim];
            *zo += row.iter().zip(x).map(|(w, x)| w * x).sum::<f64>();
        }
        z
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// The flow approximator: `obs -> n_layers x n_hid -> one logit per action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNet {
    layers: Vec<DenseLayer>,
}

/// Cached activations from a recorded forward pass.
///
/// `layer_inputs[l][row]` is what layer `l` consumed; `hidden_pre[l][row]`
/// holds pre-activation values of hidden layer `l`, needed for the LeakyReLU
/// derivative on the way back.
#[derive(Debug, Clone)]
pub struct ForwardTrace {
    layer_inputs: Vec<Vec<Vec<f64>>>,
    hidden_pre: Vec<Vec<Vec<f64>>>,
    pub outputs: Vec<Vec<f64>>,
}

/// Parameter gradients, mirroring the layer layout of a [`FlowNet`].
#[derive(Debug, Clone)]
pub struct NetGradients {
    pub w: Vec<Vec<f64>>,
    pub b: Vec<Vec<f64>>,
}

impl NetGradients {
    pub fn zeros_like(net: &FlowNet) -> Self {
        Self {
            w: net.layers.iter().map(|l| vec![0.0; l.w.len()]).collect(),
            b: net.layers.iter().map(|l| vec![0.0; l.b.len()]).collect(),
        }
    }

    /// Elementwise sum with another gradient of the same shape.
    pub fn accumulate(&mut self, other: &NetGradients) {
        for (mine, theirs) in self.w.iter_mut().zip(&other.w) {
            for (m, t) in mine.iter_mut().zip(theirs) {
                *m += t;
            }
        }
        for (mine, theirs) in self.b.iter_mut().zip(&other.b) {
            for (m, t) in mine.iter_mut().zip(theirs) {
                *m += t;
            }
        }
    }
}

impl FlowNet {
    /// Build a network with the given layer sizes, Glorot-uniform weights,
    /// and zero biases.
    pub fn new(sizes: &[usize], rng: &mut impl Rng) -> Self {
        assert!(sizes.len() >= 2, "network needs input and output sizes");
        let layers = sizes
            .windows(2)
            .map(|pair| DenseLayer::glorot(pair[0], pair[1], rng))
            .collect();
        Self { layers }
    }

    /// Build the standard flow approximator for a grid observation.
    pub fn from_config(
        obs_len: usize,
        num_actions: usize,
        config: &ModelConfig,
        rng: &mut impl Rng,
    ) -> Self {
        let mut sizes = vec![obs_len];
        sizes.extend(std::iter::repeat(config.n_hid).take(config.n_layers));
        sizes.push(num_actions);
        Self::new(&sizes, rng)
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [DenseLayer] {
        &mut self.layers
    }

    pub fn num_params(&self) -> usize {
        self.layers.iter().map(|l| l.w.len() + l.b.len()).sum()
    }

    /// Evaluate a single observation.
    pub fn forward_one(&self, x: &[f64]) -> Vec<f64> {
        let last = self.layers.len() - 1;
        let mut h = x.to_vec();
        for (l, layer) in self.layers.iter().enumerate() {
            let mut z = layer.affine(&h);
            if l < last {
                for v in &mut z {
                    if *v < 0.0 {
                        *v *= LEAKY_SLOPE;
                    }
                }
            }
            h = z;
        }
        h
    }

    /// Evaluate a batch of observations without recording activations.
    pub fn forward(&self, xs: &[Vec<f64>]) -> Vec<Vec<f64>> {
        xs.iter().map(|x| self.forward_one(x)).collect()
    }

    /// Evaluate a batch and cache everything [`Self::backward`] needs.
    pub fn forward_recorded(&self, xs: &[Vec<f64>]) -> ForwardTrace {
        let last = self.layers.len() - 1;
        let mut layer_inputs: Vec<Vec<Vec<f64>>> = vec![Vec::new(); self.layers.len()];
        let mut hidden_pre: Vec<Vec<Vec<f64>>> = vec![Vec::new(); last];
        let mut outputs = Vec::with_capacity(xs.len());

        for x in xs {
            let mut h = x.clone();
            for (l, layer) in self.layers.iter().enumerate() {
                layer_inputs[l].push(h.clone());
                let mut z = layer.affine(&h);
                if l < last {
                    hidden_pre[l].push(z.clone());
                    for v in &mut z {
                        if *v < 0.0 {
                            *v *= LEAKY_SLOPE;
                        }
                    }
                }
                h = z;
            }
            outputs.push(h);
        }

        ForwardTrace {
            layer_inputs,
            hidden_pre,
            outputs,
        }
    }

    /// Backpropagate per-row output gradients through a recorded pass,
    /// accumulating parameter gradients over the whole batch.
    pub fn backward(&self, trace: &ForwardTrace, output_grads: &[Vec<f64>]) -> NetGradients {
        assert_eq!(
            output_grads.len(),
            trace.outputs.len(),
            "one output gradient row per traced row"
        );
        let mut grads = NetGradients::zeros_like(self);

        for (row, out_grad) in output_grads.iter().enumerate() {
            let mut delta = out_grad.clone();
            for l in (0..self.layers.len()).rev() {
                let layer = &self.layers[l];
                let input = &trace.layer_inputs[l][row];
                for o in 0..layer.out_dim {
                    grads.b[l][o] += delta[o];
                    let w_row = &mut grads.w[l][o * layer.in_dim..(o + 1) * layer.in_dim];
                    for (g, x) in w_row.iter_mut().zip(input) {
                        *g += delta[o] * x;
                    }
                }
                if l > 0 {
                    let pre = &trace.hidden_pre[l - 1][row];
                    let mut next_delta = vec![0.0; layer.in_dim];
                    for (i, nd) in next_delta.iter_mut().enumerate() {
                        let mut acc = 0.0;
                        for o in 0..layer.out_dim {
                            acc += layer.w[o * layer.in_dim + i] * delta[o];
                        }
                        *nd = acc * if pre[i] > 0.0 { 1.0 } else { LEAKY_SLOPE };
                    }
                    delta = next_delta;
                }
            }
        }
        grads
    }

    /// Blend this network towards `online`: `p = (1 - tau) * p + tau * q`.
    pub fn ema_update(&mut self, online: &FlowNet, tau: f64) {
        for (mine, theirs) in self.layers.iter_mut().zip(&online.layers) {
            for (p, q) in mine.w.iter_mut().zip(&theirs.w) {
                *p = (1.0 - tau) * *p + tau * q;
            }
            for (p, q) in mine.b.iter_mut().zip(&theirs.b) {
                *p = (1.0 - tau) * *p + tau * q;
            }
        }
    }

    /// Flat copies of every parameter tensor, weights and biases
    /// interleaved per layer.
    pub fn parameter_snapshot(&self) -> Vec<Vec<f64>> {
        let mut out = Vec::with_capacity(self.layers.len() * 2);
        for layer in &self.layers {
            out.push(layer.w.clone());
            out.push(layer.b.clone());
        }
        out
    }
}
