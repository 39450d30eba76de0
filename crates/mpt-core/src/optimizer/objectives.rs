use serde::{Deserialize, Serialize};

use crate::linalg::{mat_vec_multiply, quadratic_form, vec_dot};
use crate::optimizer::constraints::{project, Bounds};
use crate::optimizer::optimize::SolverSettings;
use crate::optimizer::solver::Objective;

// ---------------------------------------------------------------------------
// Objective kinds
// ---------------------------------------------------------------------------

/// The five allocation objectives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectiveKind {
    /// Maximise (w'mu - rf) / sqrt(w' Sigma w).
    MaxSharpe,
    /// Minimise w' Sigma w.
    MinVolatility,
    /// Maximise w'mu, optionally subject to sqrt(w' Sigma w) <= max_volatility.
    MaxReturn {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_volatility: Option<f64>,
    },
    /// Equalise w_i * (Sigma w)_i across assets (long-only).
    RiskParity,
    /// w_i = 1/N, no solver.
    EqualWeight,
}

impl ObjectiveKind {
    pub fn name(&self) -> &'static str {
        match self {
            ObjectiveKind::MaxSharpe => "max_sharpe",
            ObjectiveKind::MinVolatility => "min_volatility",
            ObjectiveKind::MaxReturn { .. } => "max_return",
            ObjectiveKind::RiskParity => "risk_parity",
            ObjectiveKind::EqualWeight => "equal_weight",
        }
    }

    /// Every objective, with MaxReturn uncapped.
    pub fn all() -> [ObjectiveKind; 5] {
        [
            ObjectiveKind::MaxSharpe,
            ObjectiveKind::MinVolatility,
            ObjectiveKind::MaxReturn {
                max_volatility: None,
            },
            ObjectiveKind::RiskParity,
            ObjectiveKind::EqualWeight,
        ]
    }

    /// Solver budget tuned per objective. Risk parity gets the larger iteration budget.
    pub fn default_settings(&self) -> SolverSettings {
        let base = SolverSettings::default();
        match self {
            ObjectiveKind::RiskParity => SolverSettings {
                max_iterations: 5_000,
                max_restarts: 5,
                ..base
            },
            ObjectiveKind::MaxSharpe => SolverSettings {
                max_restarts: 5,
                ..base
            },
            _ => base,
        }
    }

    /// Objectives whose solution depends on inverting the covariance structure.
    pub(crate) fn needs_conditioning(&self) -> bool {
        match self {
            ObjectiveKind::MaxSharpe
            | ObjectiveKind::MinVolatility
            | ObjectiveKind::RiskParity => true,
            ObjectiveKind::MaxReturn { max_volatility } => max_volatility.is_some(),
            ObjectiveKind::EqualWeight => false,
        }
    }
}

impl std::fmt::Display for ObjectiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ObjectiveKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "max_sharpe" | "sharpe" => Ok(ObjectiveKind::MaxSharpe),
            "min_volatility" | "min_vol" => Ok(ObjectiveKind::MinVolatility),
            "max_return" => Ok(ObjectiveKind::MaxReturn {
                max_volatility: None,
            }),
            "risk_parity" | "erc" => Ok(ObjectiveKind::RiskParity),
            "equal_weight" | "equal" => Ok(ObjectiveKind::EqualWeight),
            other => Err(format!("Unknown objective '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Objective functions
// ---------------------------------------------------------------------------

/// Negative Sharpe ratio. Degenerate (zero-volatility) points evaluate to +inf so the line
/// search steps away from them.
pub(crate) struct NegativeSharpe<'a> {
    pub mu: &'a [f64],
    pub cov: &'a [Vec<f64>],
    pub risk_free_rate: f64,
}

impl Objective for NegativeSharpe<'_> {
    fn value(&self, w: &[f64]) -> f64 {
        let vol = quadratic_form(w, self.cov).max(0.0).sqrt();
        if vol < 1e-12 {
            return f64::INFINITY;
        }
        -(vec_dot(self.mu, w) - self.risk_free_rate) / vol
    }

    fn gradient(&self, w: &[f64]) -> Vec<f64> {
        let sigma_w = mat_vec_multiply(self.cov, w);
        let var = vec_dot(w, &sigma_w).max(0.0);
        let vol = var.sqrt();
        if vol < 1e-12 {
            return vec![0.0; w.len()];
        }
        let excess = vec_dot(self.mu, w) - self.risk_free_rate;
        let vol_cubed = var * vol;
        self.mu
            .iter()
            .zip(sigma_w.iter())
            .map(|(m, s)| -m / vol + excess * s / vol_cubed)
            .collect()
    }
}

pub(crate) struct Variance<'a> {
    pub cov: &'a [Vec<f64>],
}

impl Objective for Variance<'_> {
    fn value(&self, w: &[f64]) -> f64 {
        quadratic_form(w, self.cov)
    }

    fn gradient(&self, w: &[f64]) -> Vec<f64> {
        mat_vec_multiply(self.cov, w)
            .into_iter()
            .map(|x| 2.0 * x)
            .collect()
    }
}

pub(crate) struct NegativeReturn<'a> {
    pub mu: &'a [f64],
}

impl Objective for NegativeReturn<'_> {
    fn value(&self, w: &[f64]) -> f64 {
        -vec_dot(self.mu, w)
    }

    fn gradient(&self, _w: &[f64]) -> Vec<f64> {
        self.mu.iter().map(|m| -m).collect()
    }
}

/// Sum of squared pairwise differences between fractional risk contributions.
///
/// With x_i = w_i (Sigma w)_i / V and V = w' Sigma w, sum_{i<j} (x_i - x_j)^2 equals
/// N * sum(x_i^2) - 1, which is zero exactly at equal risk contribution.
pub(crate) struct RiskBudgetDispersion<'a> {
    pub cov: &'a [Vec<f64>],
}

impl RiskBudgetDispersion<'_> {
    fn fractions(&self, w: &[f64]) -> Option<(Vec<f64>, Vec<f64>, f64)> {
        let sigma_w = mat_vec_multiply(self.cov, w);
        let var = vec_dot(w, &sigma_w);
        if var <= 1e-300 {
            return None;
        }
        let x = w.iter().zip(sigma_w.iter()).map(|(wi, si)| wi * si / var).collect();
        Some((x, sigma_w, var))
    }
}

impl Objective for RiskBudgetDispersion<'_> {
    fn value(&self, w: &[f64]) -> f64 {
        match self.fractions(w) {
            Some((x, _, _)) => w.len() as f64 * x.iter().map(|xi| xi * xi).sum::<f64>() - 1.0,
            None => f64::INFINITY,
        }
    }

    fn gradient(&self, w: &[f64]) -> Vec<f64> {
        let n = w.len();
        let (x, sigma_w, var) = match self.fractions(w) {
            Some(parts) => parts,
            None => return vec![0.0; n],
        };
        let sum_sq: f64 = x.iter().map(|xi| xi * xi).sum();
        let scale = 2.0 * n as f64 / var;
        (0..n)
            .map(|k| {
                let cross: f64 = (0..n).map(|i| x[i] * w[i] * self.cov[i][k]).sum();
                scale * (x[k] * sigma_w[k] + cross - 2.0 * sigma_w[k] * sum_sq)
            })
            .collect()
    }
}

/// Damped fixed-point iteration towards equal risk contribution, started from inverse
/// volatility. Used as the warm start for the risk-parity solve.
pub(crate) fn erc_warm_start(cov: &[Vec<f64>], bounds: &Bounds) -> Vec<f64> {
    let n = cov.len();
    let inv_vol: Vec<f64> = (0..n)
        .map(|i| {
            let v = cov[i][i].max(0.0).sqrt();
            if v > 0.0 {
                1.0 / v
            } else {
                1.0
            }
        })
        .collect();
    let total: f64 = inv_vol.iter().sum();
    let mut weights: Vec<f64> = inv_vol.iter().map(|v| v / total).collect();
    let target_rc = 1.0 / n as f64;

    for _ in 0..200 {
        let sigma_w = mat_vec_multiply(cov, &weights);
        let port_var = vec_dot(&weights, &sigma_w);
        if port_var <= 0.0 {
            break;
        }

        let mut max_gap = 0.0_f64;
        for i in 0..n {
            let rc = weights[i] * sigma_w[i] / port_var;
            if rc > 0.0 {
                weights[i] *= (target_rc / rc).sqrt();
            }
            max_gap = max_gap.max((rc - target_rc).abs());
        }

        let total: f64 = weights.iter().sum();
        if total > 0.0 {
            for w in &mut weights {
                *w /= total;
            }
        }
        if max_gap < 1e-12 {
            break;
        }
    }

    project(&weights, bounds)
}
