use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::market::{MarketStatistics, ReturnHistory};
use crate::metrics::path::{self, DrawdownDetail};
use crate::metrics::performance::{self, DiversificationReport, RiskContribution};
use crate::types::*;
use crate::MptResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Knobs for the path-dependent metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Confidence level for historical VaR / CVaR.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Per-period return below which a period counts towards downside deviation.
    #[serde(default)]
    pub downside_target: f64,
}

fn default_confidence() -> f64 {
    0.95
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            confidence: default_confidence(),
            downside_target: 0.0,
        }
    }
}

/// Every risk and performance measure for one weight vector. Ratios that are undefined
/// for the given inputs are `None` and explained in the envelope warnings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
    pub calmar_ratio: Option<f64>,
    pub max_drawdown: Option<DrawdownDetail>,
    pub value_at_risk: Option<f64>,
    pub conditional_value_at_risk: Option<f64>,
    pub confidence: f64,
    pub information_ratio: Option<f64>,
    pub diversification: DiversificationReport,
    /// `None` for a zero-volatility portfolio.
    pub risk_contributions: Option<Vec<RiskContribution>>,
    /// Number of historical periods the path metrics were computed from.
    pub observations: Option<usize>,
}

/// Input for a full metrics report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsInput {
    pub weights: Vec<f64>,
    pub statistics: MarketStatistics,
    /// Per-period asset returns (rows = periods) for the path metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Vec<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark_returns: Option<Vec<f64>>,
    #[serde(default)]
    pub config: MetricsConfig,
}

fn optional<T>(result: MptResult<T>, label: &str, warnings: &mut Vec<String>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warnings.push(format!("{label} unavailable: {e}"));
            None
        }
    }
}

impl MetricsReport {
    /// Compute the report. The path metrics need `history`; without it they stay `None`.
    pub fn compute(
        weights: &[f64],
        stats: &MarketStatistics,
        history: Option<&ReturnHistory>,
        benchmark: Option<&[f64]>,
        config: &MetricsConfig,
    ) -> MptResult<(Self, Vec<String>)> {
        stats.validate()?;
        let mut warnings = Vec::new();

        let expected_return = performance::expected_return(weights, stats)?;
        let volatility = performance::volatility(weights, stats)?;
        let sharpe_ratio = optional(
            performance::sharpe_ratio(weights, stats),
            "Sharpe ratio",
            &mut warnings,
        );
        let risk_contributions = optional(
            performance::risk_contributions(weights, stats),
            "Risk contributions",
            &mut warnings,
        );
        let diversification = performance::diversification(weights);

        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            warnings.push(format!("Weights sum to {sum:.6}, not 1"));
        }
        if let Some(max) = weights.iter().cloned().reduce(f64::max) {
            if max > 0.5 {
                warnings.push(format!(
                    "Concentrated portfolio: largest position is {:.1}%",
                    max * 100.0
                ));
            }
        }

        let mut report = MetricsReport {
            expected_return,
            volatility,
            sharpe_ratio,
            sortino_ratio: None,
            calmar_ratio: None,
            max_drawdown: None,
            value_at_risk: None,
            conditional_value_at_risk: None,
            confidence: config.confidence,
            information_ratio: None,
            diversification,
            risk_contributions,
            observations: None,
        };

        if let Some(history) = history {
            let ppy = stats.periods_per_year;
            let returns = path::portfolio_returns(weights, history)?;
            report.observations = Some(returns.len());
            report.sortino_ratio = optional(
                path::sortino_ratio(&returns, stats.risk_free_rate, config.downside_target, ppy),
                "Sortino ratio",
                &mut warnings,
            );
            report.max_drawdown = optional(path::max_drawdown(&returns), "Max drawdown", &mut warnings);
            report.calmar_ratio = optional(path::calmar_ratio(&returns, ppy), "Calmar ratio", &mut warnings);
            report.value_at_risk = optional(
                path::historical_var(&returns, config.confidence),
                "VaR",
                &mut warnings,
            );
            report.conditional_value_at_risk = optional(
                path::historical_cvar(&returns, config.confidence),
                "CVaR",
                &mut warnings,
            );
            if let Some(benchmark) = benchmark {
                report.information_ratio = optional(
                    path::information_ratio(&returns, benchmark, ppy),
                    "Information ratio",
                    &mut warnings,
                );
            }
        }

        Ok((report, warnings))
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Full risk/performance report for a weight vector.
pub fn calculate_metrics(input: &MetricsInput) -> MptResult<ComputationOutput<MetricsReport>> {
    let start = Instant::now();

    let history = match &input.returns {
        Some(rows) => Some(ReturnHistory::from_returns(
            input.statistics.universe.clone(),
            rows.clone(),
        )?),
        None => None,
    };

    let (report, warnings) = MetricsReport::compute(
        &input.weights,
        &input.statistics,
        history.as_ref(),
        input.benchmark_returns.as_deref(),
        &input.config,
    )?;

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Mean-variance moments with historical-simulation VaR/CVaR and drawdown",
        &serde_json::json!({
            "confidence": input.config.confidence,
            "downside_target": input.config.downside_target,
            "risk_free_rate": input.statistics.risk_free_rate,
            "periods_per_year": input.statistics.periods_per_year,
            "var_interpolation": "linear between order statistics",
            "diversification_score": "100 * (1 - HHI) / (1 - 1/N)",
        }),
        warnings,
        elapsed,
        report,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
