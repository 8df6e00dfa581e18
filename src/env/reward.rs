//! Reward functions defined over mapped grid coordinates.
//!
//! Every function takes a point `x` in `[xrange_min, xrange_max]^ndim` and
//! returns a strictly positive scalar. The corner-shaped variants place most
//! of their mass in thin shells near the corners of the space and differ only
//! in the additive floor, which controls how hard the low-reward plateau is
//! to distinguish from the modes.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Which reward function to evaluate on mapped coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RewardKind {
    /// `prod_i (cos(50 x_i) + 1) * pdf(5 x_i) + 0.01`, a dense comb of modes.
    CosShaped,
    /// Corner shells with a 1e-1 floor.
    Corners,
    /// Corner shells with a 1e-3 floor.
    CornersFloorA,
    /// Corner shells with a 1e-2 floor.
    CornersFloorB,
}

impl RewardKind {
    /// Evaluate the reward at a single point.
    pub fn eval(&self, x: &[f64]) -> f64 {
        match self {
            Self::CosShaped => {
                let prod: f64 = x
                    .iter()
                    .map(|&xi| ((50.0 * xi).cos() + 1.0) * standard_normal_pdf(5.0 * xi))
                    .product();
                prod + 0.01
            }
            Self::Corners => corner_lobes(x) + 1e-1,
            Self::CornersFloorA => corner_lobes(x) + 1e-3,
            Self::CornersFloorB => corner_lobes(x) + 1e-2,
        }
    }

    /// Evaluate the reward at each point of a batch.
    pub fn eval_many(&self, xs: &[Vec<f64>]) -> Vec<f64> {
        xs.iter().map(|x| self.eval(x)).collect()
    }
}

/// Shared corner geometry: a wide lobe over `|x_i| > 0.5` in every dimension
/// plus a narrow, taller shell over `0.6 < |x_i| < 0.8`.
fn corner_lobes(x: &[f64]) -> f64 {
    let wide: f64 = x
        .iter()
        .map(|&xi| if xi.abs() > 0.5 { 1.0 } else { 0.0 })
        .product();
    let shell: f64 = x
        .iter()
        .map(|&xi| {
            let a = xi.abs();
            if a > 0.6 && a < 0.8 {
                1.0
            } else {
                0.0
            }
        })
        .product();
    0.5 * wide + 2.0 * shell
}

fn standard_normal_pdf(t: f64) -> f64 {
    (-0.5 * t * t).exp() / (2.0 * PI).sqrt()
}
