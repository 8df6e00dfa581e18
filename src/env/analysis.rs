//! Exhaustive trajectory analysis for small grids.
//!
//! Enumerates every complete action sequence the DAG admits and folds a
//! policy over them to obtain the exact terminal distribution that policy
//! induces. Cost grows combinatorially with the grid, so entry points take an
//! explicit state budget and refuse anything larger; this is a diagnostic
//! tool, not part of the training path.

use anyhow::{bail, Result};

use crate::env::grid::HyperGrid;

/// Exact terminal distribution induced by a policy, aligned over the states
/// at least one trajectory terminates in (lexicographic order).
#[derive(Debug, Clone)]
pub struct PolicyDistribution {
    pub states: Vec<Vec<usize>>,
    pub probs: Vec<f64>,
}

/// Enumerate every complete action sequence from the origin.
///
/// A sequence ends either with the stop action or by stepping into a
/// forced-terminal state. Fails when the grid holds more than `max_states`
/// states.
pub fn enumerate_action_sequences(
    grid: &HyperGrid,
    max_states: usize,
) -> Result<Vec<Vec<usize>>> {
    check_budget(grid, max_states)?;
    let mut sequences = Vec::new();
    let origin = vec![0; grid.ndim];
    extend_sequences(grid, &origin, &mut Vec::new(), &mut sequences);
    Ok(sequences)
}

fn extend_sequences(
    grid: &HyperGrid,
    s: &[usize],
    prefix: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    if grid.is_forced_terminal(s) {
        out.push(prefix.clone());
        return;
    }
    prefix.push(grid.stop_action());
    out.push(prefix.clone());
    prefix.pop();
    for d in 0..grid.ndim {
        let mut next = s.to_vec();
        next[d] += 1;
        prefix.push(d);
        extend_sequences(grid, &next, prefix, out);
        prefix.pop();
    }
}

/// Fold a policy over every complete action sequence and accumulate the
/// probability mass each terminal state receives.
///
/// `policy` maps a state to its `ndim + 1` action probabilities. The result
/// sums to 1 whenever every policy row does.
pub fn policy_terminal_distribution(
    grid: &HyperGrid,
    max_states: usize,
    policy: impl Fn(&[usize]) -> Vec<f64>,
) -> Result<PolicyDistribution> {
    let sequences = enumerate_action_sequences(grid, max_states)?;
    let mut mass: Vec<f64> = vec![0.0; grid.enumerate_states().len()];

    for seq in &sequences {
        let mut s = vec![0; grid.ndim];
        let mut p = 1.0;
        for &action in seq {
            let probs = policy(&s);
            debug_assert_eq!(probs.len(), grid.num_actions());
            p *= probs[action];
            if action != grid.stop_action() {
                s[action] += 1;
            }
        }
        mass[grid.state_flat_index(&s)] += p;
    }

    let mut states = Vec::new();
    let mut probs = Vec::new();
    for (s, m) in grid.enumerate_states().into_iter().zip(&mass) {
        if *m > 0.0 {
            states.push(s);
            probs.push(*m);
        }
    }
    Ok(PolicyDistribution { states, probs })
}

fn check_budget(grid: &HyperGrid, max_states: usize) -> Result<()> {
    let mut total = 1usize;
    for _ in 0..grid.ndim {
        total = match total.checked_mul(grid.horizon) {
            Some(t) if t <= max_states => t,
            _ => bail!(
                "grid with horizon {} and ndim {} exceeds the {} state budget",
                grid.horizon,
                grid.ndim,
                max_states
            ),
        };
    }
    Ok(())
}
