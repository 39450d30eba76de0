//! Path-dependent metrics computed from a per-period portfolio return series.

use serde::{Deserialize, Serialize};

use crate::error::MptError;
use crate::linalg::{percentile_sorted, sort_ascending};
use crate::market::ReturnHistory;
use crate::metrics::performance::{check_weights, ratio};
use crate::MptResult;

/// Peak-to-trough decline of the cumulative value path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownDetail {
    /// Largest (peak - trough) / peak, as a positive fraction.
    pub max_drawdown: f64,
    /// Index into the value path (0 = starting value) of the peak preceding the trough.
    pub peak_index: usize,
    pub trough_index: usize,
    /// First index after the trough at which the path regains the peak, if it does.
    pub recovery_index: Option<usize>,
    /// Periods from peak to trough.
    pub duration_periods: usize,
}

fn require_observations(returns: &[f64], required: usize) -> MptResult<()> {
    if returns.len() < required {
        return Err(MptError::InsufficientHistory {
            required,
            available: returns.len(),
        });
    }
    Ok(())
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_std(values: &[f64]) -> f64 {
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() as f64 - 1.0)).sqrt()
}

/// Weighted per-period portfolio returns: r_p,t = sum_i w_i r_i,t.
pub fn portfolio_returns(weights: &[f64], history: &ReturnHistory) -> MptResult<Vec<f64>> {
    check_weights(weights, history.universe.len())?;
    history.validate()?;
    Ok(history
        .returns
        .iter()
        .map(|row| row.iter().zip(weights.iter()).map(|(r, w)| r * w).sum())
        .collect())
}

/// Arithmetic mean return scaled by periods per year.
pub fn annualized_return(returns: &[f64], periods_per_year: f64) -> MptResult<f64> {
    require_observations(returns, 1)?;
    Ok(mean(returns) * periods_per_year)
}

/// Sample standard deviation scaled by sqrt(periods per year).
pub fn annualized_volatility(returns: &[f64], periods_per_year: f64) -> MptResult<f64> {
    require_observations(returns, 2)?;
    Ok(sample_std(returns) * periods_per_year.sqrt())
}

/// Annualised sample standard deviation of the returns strictly below `target`
/// (per-period). Fewer than two such returns leaves the deviation undefined.
pub fn downside_deviation(returns: &[f64], target: f64, periods_per_year: f64) -> Option<f64> {
    let below: Vec<f64> = returns.iter().copied().filter(|r| *r < target).collect();
    if below.len() < 2 {
        return None;
    }
    Some(sample_std(&below) * periods_per_year.sqrt())
}

/// (annualised return - rf) / downside deviation.
pub fn sortino_ratio(
    returns: &[f64],
    risk_free_rate: f64,
    target: f64,
    periods_per_year: f64,
) -> MptResult<f64> {
    let ann = annualized_return(returns, periods_per_year)?;
    let dd = downside_deviation(returns, target, periods_per_year).unwrap_or(0.0);
    ratio(ann - risk_free_rate, dd, "Sortino ratio (downside deviation)")
}

/// Maximum drawdown of the value path 1, (1+r_1), (1+r_1)(1+r_2), ...
pub fn max_drawdown(returns: &[f64]) -> MptResult<DrawdownDetail> {
    require_observations(returns, 1)?;

    let mut value = 1.0;
    let mut peak = 1.0;
    let mut peak_idx = 0usize;
    let mut detail = DrawdownDetail {
        max_drawdown: 0.0,
        peak_index: 0,
        trough_index: 0,
        recovery_index: None,
        duration_periods: 0,
    };
    let mut path = Vec::with_capacity(returns.len() + 1);
    path.push(value);

    for (t, r) in returns.iter().enumerate() {
        value *= 1.0 + r;
        path.push(value);
        let idx = t + 1;
        if value > peak {
            peak = value;
            peak_idx = idx;
        } else if peak > 0.0 {
            let dd = (peak - value) / peak;
            if dd > detail.max_drawdown {
                detail.max_drawdown = dd;
                detail.peak_index = peak_idx;
                detail.trough_index = idx;
            }
        }
    }

    if detail.max_drawdown > 0.0 {
        let peak_value = path[detail.peak_index];
        detail.recovery_index = path
            .iter()
            .enumerate()
            .skip(detail.trough_index + 1)
            .find(|(_, v)| **v >= peak_value)
            .map(|(i, _)| i);
        detail.duration_periods = detail.trough_index - detail.peak_index;
    }

    Ok(detail)
}

/// Annualised return / |max drawdown|.
pub fn calmar_ratio(returns: &[f64], periods_per_year: f64) -> MptResult<f64> {
    let ann = annualized_return(returns, periods_per_year)?;
    let mdd = max_drawdown(returns)?.max_drawdown;
    ratio(ann, mdd.abs(), "Calmar ratio (max drawdown)")
}

/// Historical VaR: the (1 - confidence) quantile of the per-period returns, linear
/// interpolation between order statistics. Reported as a signed return (a loss is negative).
pub fn historical_var(returns: &[f64], confidence: f64) -> MptResult<f64> {
    validate_confidence(confidence)?;
    require_observations(returns, 2)?;
    let mut sorted = returns.to_vec();
    sort_ascending(&mut sorted);
    Ok(percentile_sorted(&sorted, (1.0 - confidence) * 100.0))
}

/// Historical CVaR: mean of every return at or below the VaR quantile.
pub fn historical_cvar(returns: &[f64], confidence: f64) -> MptResult<f64> {
    let var = historical_var(returns, confidence)?;
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= var).collect();
    if tail.is_empty() {
        return Ok(var);
    }
    Ok(mean(&tail))
}

fn validate_confidence(confidence: f64) -> MptResult<()> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(MptError::InvalidInput {
            field: "confidence".into(),
            reason: "Must be strictly between 0 and 1".into(),
        });
    }
    Ok(())
}

/// Annualised mean active return over annualised tracking error.
pub fn information_ratio(
    returns: &[f64],
    benchmark: &[f64],
    periods_per_year: f64,
) -> MptResult<f64> {
    if returns.len() != benchmark.len() {
        return Err(MptError::InvalidInput {
            field: "benchmark_returns".into(),
            reason: format!(
                "Expected {} observations, got {}",
                returns.len(),
                benchmark.len()
            ),
        });
    }
    require_observations(returns, 2)?;
    let active: Vec<f64> = returns.iter().zip(benchmark).map(|(p, b)| p - b).collect();
    let tracking_error = sample_std(&active) * periods_per_year.sqrt();
    ratio(
        mean(&active) * periods_per_year,
        tracking_error,
        "information ratio (tracking error)",
    )
}
