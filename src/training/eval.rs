//! Empirical distribution diagnostics.
//!
//! A trained sampler should visit terminal states proportionally to their
//! reward. This module compares the visitation histogram against the exact
//! density computed by [`HyperGrid::true_density`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::env::HyperGrid;

/// Distance between the empirical terminal distribution and the exact one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistributionError {
    /// Mean absolute difference per reachable state.
    pub l1: f64,
    /// `KL(true || estimated)`; infinite while any reachable state is
    /// still unvisited.
    pub kl: f64,
}

/// Histogram the visited terminal states and measure their distance from
/// the exact reward-proportional density.
///
/// An empty window yields the sentinel `(1.0, 100.0)` so early evaluations
/// stay plottable.
pub fn empirical_distribution_error(
    grid: &mut HyperGrid,
    visited: &[Vec<usize>],
) -> DistributionError {
    if visited.is_empty() {
        return DistributionError { l1: 1.0, kl: 100.0 };
    }
    let density = grid.true_density();

    let index: HashMap<&[usize], usize> = density
        .states
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_slice(), i))
        .collect();

    let mut counts = vec![0usize; density.states.len()];
    for state in visited {
        if let Some(&i) = index.get(state.as_slice()) {
            counts[i] += 1;
        }
    }

    let z: usize = counts.iter().sum();
    let estimated: Vec<f64> = counts.iter().map(|&c| c as f64 / z as f64).collect();

    let l1 = estimated
        .iter()
        .zip(&density.density)
        .map(|(e, t)| (e - t).abs())
        .sum::<f64>()
        / density.density.len() as f64;
    let kl = density
        .density
        .iter()
        .zip(&estimated)
        .map(|(t, e)| t * (t / e).ln())
        .sum();

    DistributionError { l1, kl }
}

// ------------------------------------------------------------------
// Tests
// ------------------------------------------------------------------
