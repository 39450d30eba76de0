use serde::{Deserialize, Serialize};

use crate::error::MptError;
use crate::linalg::{mat_vec_multiply, vec_dot};
use crate::market::MarketStatistics;
use crate::MptResult;

/// Volatility below which ratios with volatility in the denominator are undefined.
pub const MIN_VOLATILITY: f64 = 1e-12;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One asset's share of portfolio risk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskContribution {
    pub asset: String,
    pub weight: f64,
    /// d(sigma_p)/d(w_i) = (Sigma w)_i / sigma_p
    pub marginal: f64,
    /// w_i * (Sigma w)_i / sigma_p; sums to portfolio volatility.
    pub absolute: f64,
    /// w_i * (Sigma w)_i / (w' Sigma w); sums to one.
    pub fraction: f64,
}

/// Concentration measures for a weight vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiversificationReport {
    /// sum(w_i^2)
    pub hhi: f64,
    /// 1 - HHI
    pub diversification: f64,
    /// 1 / HHI
    pub effective_assets: f64,
    /// 100 * (1 - HHI) / (1 - 1/N), clamped to [0, 100]. Equal weight scores 100 for any N.
    pub score: f64,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub(crate) fn check_weights(weights: &[f64], n: usize) -> MptResult<()> {
    if weights.len() != n {
        return Err(MptError::InvalidInput {
            field: "weights".into(),
            reason: format!("Expected {n} weights, got {}", weights.len()),
        });
    }
    if let Some(i) = weights.iter().position(|w| !w.is_finite()) {
        return Err(MptError::InvalidInput {
            field: format!("weights[{i}]"),
            reason: "Weight must be finite".into(),
        });
    }
    Ok(())
}

/// Annualised expected return w'mu.
pub fn expected_return(weights: &[f64], stats: &MarketStatistics) -> MptResult<f64> {
    check_weights(weights, stats.len())?;
    Ok(vec_dot(weights, &stats.mean_returns))
}

/// Annualised volatility sqrt(w' Sigma w).
pub fn volatility(weights: &[f64], stats: &MarketStatistics) -> MptResult<f64> {
    check_weights(weights, stats.len())?;
    let sigma_w = mat_vec_multiply(&stats.covariance, weights);
    Ok(vec_dot(weights, &sigma_w).max(0.0).sqrt())
}

/// (return - rf) / volatility. A volatility of ~0 is a `DivisionByZero` error, never a
/// silent default.
pub fn sharpe_ratio(weights: &[f64], stats: &MarketStatistics) -> MptResult<f64> {
    let ret = expected_return(weights, stats)?;
    let vol = volatility(weights, stats)?;
    ratio(ret - stats.risk_free_rate, vol, "Sharpe ratio (portfolio volatility)")
}

pub(crate) fn ratio(numerator: f64, denominator: f64, context: &str) -> MptResult<f64> {
    if denominator.abs() < MIN_VOLATILITY {
        return Err(MptError::DivisionByZero {
            context: context.into(),
        });
    }
    Ok(numerator / denominator)
}

/// Per-asset marginal, absolute and fractional risk contributions.
pub fn risk_contributions(
    weights: &[f64],
    stats: &MarketStatistics,
) -> MptResult<Vec<RiskContribution>> {
    check_weights(weights, stats.len())?;
    let sigma_w = mat_vec_multiply(&stats.covariance, weights);
    let variance = vec_dot(weights, &sigma_w);
    let vol = variance.max(0.0).sqrt();
    if vol < MIN_VOLATILITY {
        return Err(MptError::DivisionByZero {
            context: "risk contributions (portfolio volatility)".into(),
        });
    }

    Ok(stats
        .universe
        .names()
        .iter()
        .zip(weights.iter().zip(sigma_w.iter()))
        .map(|(name, (w, s))| RiskContribution {
            asset: name.clone(),
            weight: *w,
            marginal: s / vol,
            absolute: w * s / vol,
            fraction: w * s / variance,
        })
        .collect())
}

/// HHI-based concentration report.
pub fn diversification(weights: &[f64]) -> DiversificationReport {
    let n = weights.len();
    let hhi: f64 = weights.iter().map(|w| w * w).sum();
    let floor = if n > 0 { 1.0 / n as f64 } else { 1.0 };
    let score = if n > 1 {
        (100.0 * (1.0 - hhi) / (1.0 - floor)).clamp(0.0, 100.0)
    } else {
        0.0
    };
    DiversificationReport {
        hhi,
        diversification: 1.0 - hhi,
        effective_assets: if hhi > 0.0 { 1.0 / hhi } else { 0.0 },
        score,
    }
}

/// Weighted average asset volatility over portfolio volatility (>= 1 for long-only).
pub fn diversification_ratio(weights: &[f64], stats: &MarketStatistics) -> MptResult<f64> {
    let vol = volatility(weights, stats)?;
    let weighted: f64 = weights
        .iter()
        .zip(stats.asset_volatilities())
        .map(|(w, v)| w * v)
        .sum();
    ratio(weighted, vol, "diversification ratio (portfolio volatility)")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
