use serde::{Deserialize, Serialize};

use crate::error::MptError;
use crate::MptResult;

/// Slack allowed on the sum(min) <= 1 <= sum(max) feasibility test.
const FEASIBILITY_SLACK: f64 = 1e-12;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A weight bound given either once for every asset or per asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeightBound {
    Uniform(f64),
    PerAsset(Vec<f64>),
}

/// Per-asset weight bounds plus the short-selling switch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSet {
    /// Lower bounds (default 0, or -1 when shorting is allowed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_weights: Option<WeightBound>,
    /// Upper bounds (default 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_weights: Option<WeightBound>,
    #[serde(default)]
    pub allow_short: bool,
}

/// Concrete [lower, upper] vectors resolved for a universe of known size.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl ConstraintSet {
    /// Long-only, each weight in [0, 1].
    pub fn long_only() -> Self {
        Self::default()
    }

    pub fn uniform(min_weight: f64, max_weight: f64) -> Self {
        Self {
            min_weights: Some(WeightBound::Uniform(min_weight)),
            max_weights: Some(WeightBound::Uniform(max_weight)),
            allow_short: min_weight < 0.0,
        }
    }

    pub fn per_asset(min_weights: Vec<f64>, max_weights: Vec<f64>) -> Self {
        let allow_short = min_weights.iter().any(|w| *w < 0.0);
        Self {
            min_weights: Some(WeightBound::PerAsset(min_weights)),
            max_weights: Some(WeightBound::PerAsset(max_weights)),
            allow_short,
        }
    }

    pub fn with_shorts(mut self) -> Self {
        self.allow_short = true;
        self
    }

    /// Expand to per-asset vectors and run the feasibility pre-check.
    pub fn resolve(&self, n: usize) -> MptResult<Bounds> {
        let default_lower = if self.allow_short { -1.0 } else { 0.0 };
        let lower = expand(self.min_weights.as_ref(), n, default_lower, "min_weights")?;
        let upper = expand(self.max_weights.as_ref(), n, 1.0, "max_weights")?;

        for i in 0..n {
            if lower[i] < 0.0 && !self.allow_short {
                return Err(MptError::InvalidInput {
                    field: format!("min_weights[{i}]"),
                    reason: "Negative lower bound requires allow_short".into(),
                });
            }
            if lower[i] > upper[i] {
                return Err(MptError::InfeasibleConstraints {
                    constraint: format!("bounds[{i}]"),
                    reason: format!(
                        "min weight {:.4} exceeds max weight {:.4}",
                        lower[i], upper[i]
                    ),
                });
            }
        }

        let bounds = Bounds { lower, upper };
        bounds.check_feasible()?;
        Ok(bounds)
    }
}

fn expand(bound: Option<&WeightBound>, n: usize, default: f64, field: &str) -> MptResult<Vec<f64>> {
    let values = match bound {
        None => vec![default; n],
        Some(WeightBound::Uniform(v)) => vec![*v; n],
        Some(WeightBound::PerAsset(v)) => {
            if v.len() != n {
                return Err(MptError::InvalidInput {
                    field: field.into(),
                    reason: format!("Expected {n} bounds, got {}", v.len()),
                });
            }
            v.clone()
        }
    };
    if let Some(i) = values.iter().position(|v| !v.is_finite()) {
        return Err(MptError::InvalidInput {
            field: format!("{field}[{i}]"),
            reason: "Bound must be finite".into(),
        });
    }
    Ok(values)
}

impl Bounds {
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// sum(min) <= 1 <= sum(max). The boundary itself is feasible.
    pub fn check_feasible(&self) -> MptResult<()> {
        let sum_lower: f64 = self.lower.iter().sum();
        let sum_upper: f64 = self.upper.iter().sum();
        if sum_lower > 1.0 + FEASIBILITY_SLACK {
            return Err(MptError::InfeasibleConstraints {
                constraint: "min_weights".into(),
                reason: format!("Minimum weights sum to {sum_lower:.4}, above 1"),
            });
        }
        if sum_upper < 1.0 - FEASIBILITY_SLACK {
            return Err(MptError::InfeasibleConstraints {
                constraint: "max_weights".into(),
                reason: format!("Maximum weights sum to {sum_upper:.4}, below 1"),
            });
        }
        Ok(())
    }

    pub fn contains(&self, w: &[f64], tol: f64) -> bool {
        w.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .all(|(x, (lo, hi))| *x >= lo - tol && *x <= hi + tol)
    }

    /// Long-only view used by risk parity. Returns the clamped bounds and whether any lower
    /// bound had to be raised to zero.
    pub fn long_only(&self) -> MptResult<(Bounds, bool)> {
        let clamped = self.lower.iter().any(|lo| *lo < 0.0);
        let lower: Vec<f64> = self.lower.iter().map(|lo| lo.max(0.0)).collect();
        if let Some(i) = lower.iter().zip(self.upper.iter()).position(|(lo, hi)| lo > hi) {
            return Err(MptError::InfeasibleConstraints {
                constraint: format!("bounds[{i}]"),
                reason: "Risk parity requires a non-negative weight range".into(),
            });
        }
        let bounds = Bounds {
            lower,
            upper: self.upper.clone(),
        };
        bounds.check_feasible()?;
        Ok((bounds, clamped))
    }
}

// ---------------------------------------------------------------------------
// Projection helpers
// ---------------------------------------------------------------------------

/// Euclidean projection onto {w : sum(w) = 1, lower <= w <= upper}.
///
/// The projection is clamp(v - lambda, lower, upper) for the unique shift lambda that makes
/// the weights sum to one; lambda is found by bisection and the last rounding residual is
/// pushed into whichever coordinates still have room.
pub(crate) fn project(v: &[f64], bounds: &Bounds) -> Vec<f64> {
    let sum_lower: f64 = bounds.lower.iter().sum();
    let sum_upper: f64 = bounds.upper.iter().sum();
    if sum_lower >= 1.0 {
        return bounds.lower.clone();
    }
    if sum_upper <= 1.0 {
        return bounds.upper.clone();
    }

    let shifted_sum = |lambda: f64| -> f64 {
        v.iter()
            .zip(bounds.lower.iter().zip(bounds.upper.iter()))
            .map(|(x, (lo, hi))| (x - lambda).clamp(*lo, *hi))
            .sum()
    };

    let mut lo_lambda = v
        .iter()
        .zip(bounds.upper.iter())
        .map(|(x, hi)| x - hi)
        .fold(f64::INFINITY, f64::min)
        - 1.0;
    let mut hi_lambda = v
        .iter()
        .zip(bounds.lower.iter())
        .map(|(x, lo)| x - lo)
        .fold(f64::NEG_INFINITY, f64::max)
        + 1.0;

    for _ in 0..200 {
        let mid = 0.5 * (lo_lambda + hi_lambda);
        if shifted_sum(mid) > 1.0 {
            lo_lambda = mid;
        } else {
            hi_lambda = mid;
        }
        if hi_lambda - lo_lambda < 1e-15 {
            break;
        }
    }

    let lambda = 0.5 * (lo_lambda + hi_lambda);
    let mut w: Vec<f64> = v
        .iter()
        .zip(bounds.lower.iter().zip(bounds.upper.iter()))
        .map(|(x, (lo, hi))| (x - lambda).clamp(*lo, *hi))
        .collect();
    absorb_residual(&mut w, bounds);
    w
}

/// Push 1 - sum(w) into coordinates with room left, keeping every bound intact.
fn absorb_residual(w: &mut [f64], bounds: &Bounds) {
    let mut residual = 1.0 - w.iter().sum::<f64>();
    for i in 0..w.len() {
        if residual == 0.0 {
            break;
        }
        let room = if residual > 0.0 {
            bounds.upper[i] - w[i]
        } else {
            bounds.lower[i] - w[i]
        };
        let delta = if residual > 0.0 {
            residual.min(room)
        } else {
            residual.max(room)
        };
        w[i] += delta;
        residual -= delta;
    }
}

/// Rescale so the weights sum to one. Weights whose sum is ~0 are returned unchanged.
pub(crate) fn renormalize(w: &[f64]) -> Vec<f64> {
    let total: f64 = w.iter().sum();
    if total.abs() < 1e-12 {
        return w.to_vec();
    }
    w.iter().map(|x| x / total).collect()
}

/// Exact maximiser of mu'w over the bounded simplex: start at the lower bounds and fill the
/// remaining budget in order of descending expected return.
pub(crate) fn greedy_max_return(mu: &[f64], bounds: &Bounds) -> Vec<f64> {
    let mut w = bounds.lower.clone();
    let mut remaining = 1.0 - w.iter().sum::<f64>();

    let mut order: Vec<usize> = (0..mu.len()).collect();
    order.sort_by(|&a, &b| {
        mu[b]
            .partial_cmp(&mu[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for i in order {
        if remaining <= 0.0 {
            break;
        }
        let add = remaining.min(bounds.upper[i] - bounds.lower[i]);
        w[i] += add;
        remaining -= add;
    }
    w
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
