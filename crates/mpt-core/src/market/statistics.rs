use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::MptError;
use crate::linalg::symmetric_eigenvalues;
use crate::market::universe::AssetUniverse;
use crate::types::*;
use crate::MptResult;

/// Absolute tolerance for covariance symmetry checks.
const SYMMETRY_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How period returns are derived from consecutive prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    /// p_t / p_{t-1} - 1
    #[default]
    Simple,
    /// ln(p_t / p_{t-1})
    Log,
}

/// Estimation settings for turning a return history into annualised statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationConfig {
    #[serde(default)]
    pub return_kind: ReturnKind,
    /// Observations per year used to annualise mean and covariance (252 = daily).
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
    /// Annualised risk-free rate carried into the statistics.
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    /// Lower bound on return observations; the effective floor is max(this, N + 1).
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
}

fn default_periods_per_year() -> f64 {
    252.0
}

fn default_risk_free_rate() -> f64 {
    0.02
}

fn default_min_observations() -> usize {
    30
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            return_kind: ReturnKind::Simple,
            periods_per_year: default_periods_per_year(),
            risk_free_rate: default_risk_free_rate(),
            min_observations: default_min_observations(),
        }
    }
}

/// Per-period asset returns, rows ordered by date ascending, one column per asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnHistory {
    pub universe: AssetUniverse,
    pub returns: Vec<Vec<f64>>,
}

impl ReturnHistory {
    /// Build a return history from an aligned price table (rows = dates ascending).
    pub fn from_prices(
        universe: AssetUniverse,
        prices: &[Vec<f64>],
        kind: ReturnKind,
    ) -> MptResult<Self> {
        let n = universe.len();
        for (t, row) in prices.iter().enumerate() {
            if row.len() != n {
                return Err(MptError::InvalidInput {
                    field: format!("prices[{t}]"),
                    reason: format!("Expected {n} prices, got {}", row.len()),
                });
            }
            if let Some(j) = row.iter().position(|p| !p.is_finite() || *p <= 0.0) {
                return Err(MptError::InvalidInput {
                    field: format!("prices[{t}][{j}]"),
                    reason: "Prices must be finite and strictly positive".into(),
                });
            }
        }

        let returns = prices
            .windows(2)
            .map(|pair| {
                pair[0]
                    .iter()
                    .zip(pair[1].iter())
                    .map(|(prev, cur)| match kind {
                        ReturnKind::Simple => cur / prev - 1.0,
                        ReturnKind::Log => (cur / prev).ln(),
                    })
                    .collect()
            })
            .collect();

        Ok(Self { universe, returns })
    }

    /// Wrap pre-computed per-period returns.
    pub fn from_returns(universe: AssetUniverse, returns: Vec<Vec<f64>>) -> MptResult<Self> {
        let history = Self { universe, returns };
        history.validate()?;
        Ok(history)
    }

    pub fn validate(&self) -> MptResult<()> {
        let n = self.universe.len();
        for (t, row) in self.returns.iter().enumerate() {
            if row.len() != n {
                return Err(MptError::InvalidInput {
                    field: format!("returns[{t}]"),
                    reason: format!("Expected {n} returns, got {}", row.len()),
                });
            }
            if let Some(j) = row.iter().position(|r| !r.is_finite()) {
                return Err(MptError::InvalidInput {
                    field: format!("returns[{t}][{j}]"),
                    reason: "Return must be finite".into(),
                });
            }
        }
        Ok(())
    }

    pub fn observations(&self) -> usize {
        self.returns.len()
    }

    /// The return series of a single asset.
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.returns.iter().map(|row| row[index]).collect()
    }
}

/// Annualised mean vector, covariance matrix and risk-free rate for one universe.
/// Read-only input to the optimizer, metrics and simulation engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketStatistics {
    pub universe: AssetUniverse,
    pub mean_returns: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    /// Scaling factor the statistics were annualised with.
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
}

/// Single-asset view of the statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSummary {
    pub asset: String,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: Option<f64>,
}

impl MarketStatistics {
    pub fn new(
        universe: AssetUniverse,
        mean_returns: Vec<f64>,
        covariance: Vec<Vec<f64>>,
        risk_free_rate: f64,
    ) -> MptResult<Self> {
        let stats = Self {
            universe,
            mean_returns,
            covariance,
            risk_free_rate,
            periods_per_year: default_periods_per_year(),
        };
        stats.validate()?;
        Ok(stats)
    }

    /// Estimate annualised statistics from a return history.
    pub fn estimate(history: &ReturnHistory, config: &EstimationConfig) -> MptResult<Self> {
        history.validate()?;
        if !(config.periods_per_year > 0.0) {
            return Err(MptError::InvalidInput {
                field: "periods_per_year".into(),
                reason: "Must be positive".into(),
            });
        }

        let n = history.universe.len();
        let t = history.observations();
        let required = config.min_observations.max(n + 1);
        if t < required {
            return Err(MptError::InsufficientHistory {
                required,
                available: t,
            });
        }

        let tf = t as f64;
        let means: Vec<f64> = (0..n)
            .map(|j| history.returns.iter().map(|row| row[j]).sum::<f64>() / tf)
            .collect();

        let mut covariance = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in i..n {
                let s: f64 = history
                    .returns
                    .iter()
                    .map(|row| (row[i] - means[i]) * (row[j] - means[j]))
                    .sum();
                let c = s / (tf - 1.0) * config.periods_per_year;
                covariance[i][j] = c;
                covariance[j][i] = c;
            }
        }

        let stats = Self {
            universe: history.universe.clone(),
            mean_returns: means.iter().map(|m| m * config.periods_per_year).collect(),
            covariance,
            risk_free_rate: config.risk_free_rate,
            periods_per_year: config.periods_per_year,
        };
        stats.validate()?;
        Ok(stats)
    }

    pub fn len(&self) -> usize {
        self.universe.len()
    }

    pub fn is_empty(&self) -> bool {
        self.universe.is_empty()
    }

    /// Shape and sanity checks; every engine entry point calls this first.
    pub fn validate(&self) -> MptResult<()> {
        let n = self.universe.len();

        if self.mean_returns.len() != n {
            return Err(MptError::InvalidInput {
                field: "mean_returns".into(),
                reason: format!("Expected {n} entries, got {}", self.mean_returns.len()),
            });
        }
        if let Some(i) = self.mean_returns.iter().position(|m| !m.is_finite()) {
            return Err(MptError::InvalidInput {
                field: format!("mean_returns[{i}]"),
                reason: "Must be finite".into(),
            });
        }
        if !self.risk_free_rate.is_finite() {
            return Err(MptError::InvalidInput {
                field: "risk_free_rate".into(),
                reason: "Must be finite".into(),
            });
        }
        if self.covariance.len() != n {
            return Err(MptError::InvalidInput {
                field: "covariance".into(),
                reason: format!("Expected {n} rows, got {}", self.covariance.len()),
            });
        }

        for (i, row) in self.covariance.iter().enumerate() {
            if row.len() != n {
                return Err(MptError::InvalidInput {
                    field: format!("covariance[{i}]"),
                    reason: format!("Expected {n} columns, got {}", row.len()),
                });
            }
            if let Some(j) = row.iter().position(|c| !c.is_finite()) {
                return Err(MptError::InvalidInput {
                    field: format!("covariance[{i}][{j}]"),
                    reason: "Must be finite".into(),
                });
            }
            if row[i] < 0.0 {
                return Err(MptError::InvalidInput {
                    field: format!("covariance[{i}][{i}]"),
                    reason: "Variance cannot be negative".into(),
                });
            }
        }

        for i in 0..n {
            for j in (i + 1)..n {
                if (self.covariance[i][j] - self.covariance[j][i]).abs() > SYMMETRY_TOLERANCE {
                    return Err(MptError::InvalidInput {
                        field: format!("covariance[{i}][{j}]"),
                        reason: "Covariance matrix must be symmetric".into(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn asset_volatilities(&self) -> Vec<f64> {
        (0..self.len())
            .map(|i| self.covariance[i][i].max(0.0).sqrt())
            .collect()
    }

    /// Pearson correlation matrix. Zero-variance assets get zero correlation off the
    /// diagonal.
    pub fn correlation_matrix(&self) -> Vec<Vec<f64>> {
        let n = self.len();
        let vols = self.asset_volatilities();
        let mut corr = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                corr[i][j] = if i == j {
                    1.0
                } else if vols[i] > 0.0 && vols[j] > 0.0 {
                    (self.covariance[i][j] / (vols[i] * vols[j])).clamp(-1.0, 1.0)
                } else {
                    0.0
                };
            }
        }
        corr
    }

    pub fn asset_summaries(&self) -> Vec<AssetSummary> {
        self.universe
            .names()
            .iter()
            .zip(self.mean_returns.iter())
            .zip(self.asset_volatilities())
            .map(|((name, &mu), vol)| AssetSummary {
                asset: name.clone(),
                expected_return: mu,
                volatility: vol,
                sharpe_ratio: if vol > 1e-12 {
                    Some((mu - self.risk_free_rate) / vol)
                } else {
                    None
                },
            })
            .collect()
    }

    /// Ratio of largest to smallest covariance eigenvalue; infinite when the matrix is
    /// singular or indefinite.
    pub fn condition_number(&self) -> f64 {
        let eig = symmetric_eigenvalues(&self.covariance);
        let (lo, hi) = match (eig.first(), eig.last()) {
            (Some(&lo), Some(&hi)) => (lo, hi),
            _ => return f64::INFINITY,
        };
        if hi <= 0.0 || lo <= hi * 1e-16 {
            f64::INFINITY
        } else {
            hi / lo
        }
    }

    /// Off-diagonal pair with the largest absolute correlation.
    pub fn most_correlated_pair(&self) -> Option<(String, String, f64)> {
        let corr = self.correlation_matrix();
        let names = self.universe.names();
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..self.len() {
            for j in (i + 1)..self.len() {
                let c = corr[i][j];
                if best.map_or(true, |(_, _, b)| c.abs() > b.abs()) {
                    best = Some((i, j, c));
                }
            }
        }
        best.map(|(i, j, c)| (names[i].clone(), names[j].clone(), c))
    }

    /// Fail with `SingularCovariance` when the condition number exceeds `max_condition`.
    /// Returns the condition number otherwise.
    pub fn check_conditioning(&self, max_condition: f64) -> MptResult<f64> {
        let cond = self.condition_number();
        if cond > max_condition {
            return Err(MptError::SingularCovariance {
                condition_number: cond,
                asset_pair: self.zero_variance_or_correlated_pair(),
            });
        }
        Ok(cond)
    }

    fn zero_variance_or_correlated_pair(&self) -> Option<(String, String)> {
        let names = self.universe.names();
        if let Some(i) = self.covariance.iter().enumerate().position(|(i, r)| r[i] <= 0.0) {
            let j = if i == 0 { 1 } else { 0 };
            return Some((names[i].clone(), names[j].clone()));
        }
        self.most_correlated_pair().map(|(a, b, _)| (a, b))
    }
}

// ---------------------------------------------------------------------------
// Public API: estimation envelope
// ---------------------------------------------------------------------------

/// Input for estimating market statistics from a history of prices or returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsInput {
    pub assets: AssetUniverse,
    /// Price table, rows = dates ascending. Exactly one of `prices` / `returns`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prices: Option<Vec<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub config: EstimationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsOutput {
    pub statistics: MarketStatistics,
    pub correlation: Vec<Vec<f64>>,
    pub assets: Vec<AssetSummary>,
    pub condition_number: f64,
    pub observations: usize,
}

/// Resolve the history carried by a `StatisticsInput`.
pub fn history_from_input(input: &StatisticsInput) -> MptResult<ReturnHistory> {
    match (&input.prices, &input.returns) {
        (Some(prices), None) => {
            ReturnHistory::from_prices(input.assets.clone(), prices, input.config.return_kind)
        }
        (None, Some(returns)) => ReturnHistory::from_returns(input.assets.clone(), returns.clone()),
        _ => Err(MptError::InvalidInput {
            field: "prices/returns".into(),
            reason: "Provide exactly one of prices or returns".into(),
        }),
    }
}

/// Estimate annualised statistics and diagnostics from a price or return history.
pub fn estimate_statistics(
    input: &StatisticsInput,
) -> MptResult<ComputationOutput<StatisticsOutput>> {
    let start = Instant::now();
    let mut warnings = Vec::new();

    let history = history_from_input(input)?;
    let statistics = MarketStatistics::estimate(&history, &input.config)?;
    let condition_number = statistics.condition_number();

    if let Some((a, b, c)) = statistics.most_correlated_pair() {
        if c.abs() > 0.95 {
            warnings.push(format!(
                "{a} and {b} are {:.1}% correlated; optimisers may treat them as duplicates",
                c * 100.0
            ));
        }
    }
    if condition_number > 1e8 {
        warnings.push(format!(
            "Covariance condition number {condition_number:.2e} indicates an ill-conditioned matrix"
        ));
    }

    let output = StatisticsOutput {
        correlation: statistics.correlation_matrix(),
        assets: statistics.asset_summaries(),
        condition_number,
        observations: history.observations(),
        statistics,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Sample moments: arithmetic mean and (n-1) covariance, annualised by periods per year",
        &serde_json::json!({
            "return_kind": input.config.return_kind,
            "periods_per_year": input.config.periods_per_year,
            "risk_free_rate": input.config.risk_free_rate,
            "min_observations": input.config.min_observations,
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn universe3() -> AssetUniverse {
        AssetUniverse::new(["A", "B", "C"]).unwrap()
    }

    fn sample_stats() -> MarketStatistics {
        MarketStatistics::new(
            universe3(),
            vec![0.08, 0.05, 0.11],
            vec![
                vec![0.04, 0.006, 0.01],
                vec![0.006, 0.01, 0.004],
                vec![0.01, 0.004, 0.09],
            ],
            0.02,
        )
        .unwrap()
    }

    fn zigzag_returns(t: usize) -> Vec<Vec<f64>> {
        (0..t)
            .map(|k| {
                let s = if k % 2 == 0 { 1.0 } else { -1.0 };
                let u = ((k * 7) % 5) as f64 / 100.0 - 0.02;
                vec![0.001 + 0.01 * s, 0.0005 + 0.004 * s + u, 0.002 - 0.006 * s + 0.5 * u]
            })
            .collect()
    }

    // --- 1. Simple returns from prices ---
    #[test]
    fn test_simple_returns_from_prices() {
        let prices = vec![vec![100.0, 50.0, 10.0], vec![110.0, 50.0, 9.0]];
        let h = ReturnHistory::from_prices(universe3(), &prices, ReturnKind::Simple).unwrap();
        assert_eq!(h.observations(), 1);
        assert!((h.returns[0][0] - 0.10).abs() < 1e-12);
        assert!(h.returns[0][1].abs() < 1e-12);
        assert!((h.returns[0][2] + 0.10).abs() < 1e-12);
    }

    // --- 2. Log returns ---
    #[test]
    fn test_log_returns_from_prices() {
        let prices = vec![vec![100.0, 50.0, 10.0], vec![110.0, 50.0, 9.0]];
        let h = ReturnHistory::from_prices(universe3(), &prices, ReturnKind::Log).unwrap();
        assert!((h.returns[0][0] - 1.1_f64.ln()).abs() < 1e-12);
    }

    // --- 3. Non-positive price rejected ---
    #[test]
    fn test_non_positive_price_rejected() {
        let prices = vec![vec![100.0, 50.0, 10.0], vec![110.0, 0.0, 9.0]];
        let err = ReturnHistory::from_prices(universe3(), &prices, ReturnKind::Simple).unwrap_err();
        match err {
            MptError::InvalidInput { field, .. } => assert_eq!(field, "prices[1][1]"),
            other => panic!("Expected InvalidInput, got {other:?}"),
        }
    }

    // --- 4. Estimation annualises and is symmetric ---
    #[test]
    fn test_estimate_annualises() {
        let returns = zigzag_returns(40);
        let h = ReturnHistory::from_returns(universe3(), returns.clone()).unwrap();
        let stats = MarketStatistics::estimate(&h, &EstimationConfig::default()).unwrap();

        let mean_a: f64 = returns.iter().map(|r| r[0]).sum::<f64>() / 40.0;
        assert!((stats.mean_returns[0] - mean_a * 252.0).abs() < 1e-12);

        let var_a: f64 = returns.iter().map(|r| (r[0] - mean_a).powi(2)).sum::<f64>() / 39.0;
        assert!(
            (stats.covariance[0][0] - var_a * 252.0).abs() < 1e-12,
            "Annualised variance mismatch: {}",
            stats.covariance[0][0]
        );
        assert_eq!(stats.covariance[0][2], stats.covariance[2][0]);
    }

    // --- 5. Insufficient history ---
    #[test]
    fn test_insufficient_history() {
        let h = ReturnHistory::from_returns(universe3(), zigzag_returns(10)).unwrap();
        let err = MarketStatistics::estimate(&h, &EstimationConfig::default()).unwrap_err();
        match err {
            MptError::InsufficientHistory {
                required,
                available,
            } => {
                assert_eq!(required, 30);
                assert_eq!(available, 10);
            }
            other => panic!("Expected InsufficientHistory, got {other:?}"),
        }
    }

    // --- 6. Floor is N + 1 even with a tiny min_observations ---
    #[test]
    fn test_history_floor_is_n_plus_one() {
        let cfg = EstimationConfig {
            min_observations: 1,
            ..Default::default()
        };
        let h = ReturnHistory::from_returns(universe3(), zigzag_returns(3)).unwrap();
        assert!(matches!(
            MarketStatistics::estimate(&h, &cfg),
            Err(MptError::InsufficientHistory { required: 4, .. })
        ));
    }

    // --- 7. Validation catches asymmetric covariance ---
    #[test]
    fn test_asymmetric_covariance_rejected() {
        let res = MarketStatistics::new(
            universe3(),
            vec![0.1, 0.1, 0.1],
            vec![
                vec![0.04, 0.01, 0.0],
                vec![0.02, 0.04, 0.0],
                vec![0.0, 0.0, 0.04],
            ],
            0.0,
        );
        assert!(res.is_err());
    }

    // --- 8. Correlation matrix ---
    #[test]
    fn test_correlation_matrix() {
        let stats = sample_stats();
        let corr = stats.correlation_matrix();
        assert_eq!(corr[1][1], 1.0);
        let expected = 0.006 / (0.2 * 0.1);
        assert!((corr[0][1] - expected).abs() < 1e-12);
    }

    // --- 9. Well-conditioned matrix passes ---
    #[test]
    fn test_condition_number_finite() {
        let stats = sample_stats();
        let cond = stats.check_conditioning(1e10).unwrap();
        assert!(cond > 1.0 && cond < 100.0, "cond = {cond}");
    }

    // --- 10. Duplicate asset is flagged with its pair ---
    #[test]
    fn test_singular_names_pair() {
        let stats = MarketStatistics::new(
            universe3(),
            vec![0.08, 0.08, 0.05],
            vec![
                vec![0.04, 0.04, 0.002],
                vec![0.04, 0.04, 0.002],
                vec![0.002, 0.002, 0.01],
            ],
            0.02,
        )
        .unwrap();
        match stats.check_conditioning(1e10).unwrap_err() {
            MptError::SingularCovariance { asset_pair, .. } => {
                assert_eq!(asset_pair, Some(("A".to_string(), "B".to_string())));
            }
            other => panic!("Expected SingularCovariance, got {other:?}"),
        }
    }

    // --- 11. Asset summaries ---
    #[test]
    fn test_asset_summaries() {
        let s = sample_stats().asset_summaries();
        assert_eq!(s[2].asset, "C");
        assert!((s[2].volatility - 0.3).abs() < 1e-12);
        assert!((s[2].sharpe_ratio.unwrap() - 0.3).abs() < 1e-12);
    }

    // --- 12. Envelope requires exactly one history source ---
    #[test]
    fn test_estimate_statistics_needs_one_source() {
        let input = StatisticsInput {
            assets: universe3(),
            prices: None,
            returns: None,
            config: EstimationConfig::default(),
        };
        assert!(estimate_statistics(&input).is_err());

        let input = StatisticsInput {
            returns: Some(zigzag_returns(40)),
            ..input
        };
        let out = estimate_statistics(&input).unwrap();
        assert_eq!(out.result.observations, 40);
        assert_eq!(out.metadata.precision, "ieee754_f64");
    }
}
