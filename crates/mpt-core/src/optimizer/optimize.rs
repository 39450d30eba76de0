use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::MptError;
use crate::market::MarketStatistics;
use crate::metrics::performance;
use crate::optimizer::constraints::{greedy_max_return, project, renormalize, Bounds, ConstraintSet};
use crate::optimizer::objectives::{
    erc_warm_start, NegativeReturn, NegativeSharpe, ObjectiveKind, RiskBudgetDispersion, Variance,
};
use crate::optimizer::solver::{
    augmented_lagrangian, projected_gradient, SideConstraint, SolveOutcome,
};
use crate::types::*;
use crate::MptResult;

/// Largest max-minus-min spread of risk fractions still reported as equal risk.
const RISK_PARITY_SPREAD_TOLERANCE: f64 = 1e-4;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Iteration budget and numerical tolerances for the shared solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Stationarity tolerance on the projected-gradient residual.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Randomised restarts attempted after a non-converged first solve.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Seed for restart starting points.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Covariance condition number above which solver-backed objectives refuse to run.
    #[serde(default = "default_max_condition_number")]
    pub max_condition_number: f64,
}

fn default_max_iterations() -> u32 {
    1_000
}
fn default_tolerance() -> f64 {
    1e-8
}
fn default_max_restarts() -> u32 {
    3
}
fn default_seed() -> u64 {
    42
}
fn default_max_condition_number() -> f64 {
    1e10
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            max_restarts: default_max_restarts(),
            seed: default_seed(),
            max_condition_number: default_max_condition_number(),
        }
    }
}

/// Input for a single optimisation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationInput {
    pub statistics: MarketStatistics,
    pub objective: ObjectiveKind,
    #[serde(default)]
    pub constraints: ConstraintSet,
    /// Overrides the objective's default solver settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SolverSettings>,
}

/// One asset's slice of the optimised portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetAllocation {
    pub asset: String,
    pub weight: f64,
    /// w_i * mu_i
    pub return_contribution: f64,
    /// Share of portfolio variance, w_i (Sigma w)_i / (w' Sigma w). `None` when the
    /// portfolio has no variance to share out.
    pub risk_contribution: Option<f64>,
}

/// Output of an optimisation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationOutput {
    pub objective: ObjectiveKind,
    pub weights: WeightVector,
    pub allocations: Vec<AssetAllocation>,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: Option<f64>,
    pub objective_value: f64,
    pub iterations: u32,
    pub restarts: u32,
}

/// Raw solver result before reporting.
struct Solved {
    weights: Vec<f64>,
    objective_value: f64,
    iterations: u32,
    restarts: u32,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Solve for a weight vector under the objective's default solver settings.
pub fn optimize(
    stats: &MarketStatistics,
    objective: ObjectiveKind,
    constraints: &ConstraintSet,
) -> MptResult<WeightVector> {
    let mut warnings = Vec::new();
    let solved = solve(
        stats,
        objective,
        constraints,
        &objective.default_settings(),
        &mut warnings,
    )?;
    Ok(WeightVector::from_raw(solved.weights))
}

/// Solve and report with explicit solver settings.
pub fn optimize_with(
    stats: &MarketStatistics,
    objective: ObjectiveKind,
    constraints: &ConstraintSet,
    settings: &SolverSettings,
) -> MptResult<ComputationOutput<OptimizationOutput>> {
    let start = Instant::now();
    let mut warnings = Vec::new();

    let solved = solve(stats, objective, constraints, settings, &mut warnings)?;
    let output = build_output(stats, objective, solved, &mut warnings)?;

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        methodology(objective),
        &serde_json::json!({
            "objective": objective,
            "constraints": constraints,
            "max_iterations": settings.max_iterations,
            "tolerance": settings.tolerance,
            "max_restarts": settings.max_restarts,
            "seed": settings.seed,
            "risk_free_rate": stats.risk_free_rate,
        }),
        warnings,
        elapsed,
        output,
    ))
}

/// Envelope entry point driven by an `OptimizationInput`.
pub fn optimize_portfolio(
    input: &OptimizationInput,
) -> MptResult<ComputationOutput<OptimizationOutput>> {
    let settings = input
        .settings
        .clone()
        .unwrap_or_else(|| input.objective.default_settings());
    optimize_with(&input.statistics, input.objective, &input.constraints, &settings)
}

fn methodology(objective: ObjectiveKind) -> &'static str {
    match objective {
        ObjectiveKind::MaxSharpe => "Maximum Sharpe ratio via projected gradient with restarts",
        ObjectiveKind::MinVolatility => "Global minimum variance via projected gradient",
        ObjectiveKind::MaxReturn {
            max_volatility: None,
        } => "Maximum expected return (linear program over bounded simplex)",
        ObjectiveKind::MaxReturn { .. } => {
            "Maximum expected return under a volatility cap via augmented Lagrangian"
        }
        ObjectiveKind::RiskParity => "Equal risk contribution via dispersion minimisation",
        ObjectiveKind::EqualWeight => "Equal weight (1/N)",
    }
}

// ---------------------------------------------------------------------------
// Solver dispatch
// ---------------------------------------------------------------------------

pub(crate) fn validate_settings(settings: &SolverSettings) -> MptResult<()> {
    if settings.max_iterations == 0 {
        return Err(MptError::InvalidInput {
            field: "max_iterations".into(),
            reason: "Must be at least 1".into(),
        });
    }
    if !(settings.tolerance > 0.0 && settings.tolerance.is_finite()) {
        return Err(MptError::InvalidInput {
            field: "tolerance".into(),
            reason: "Must be positive and finite".into(),
        });
    }
    if !(settings.max_condition_number > 1.0) {
        return Err(MptError::InvalidInput {
            field: "max_condition_number".into(),
            reason: "Must exceed 1".into(),
        });
    }
    Ok(())
}

fn solve(
    stats: &MarketStatistics,
    objective: ObjectiveKind,
    constraints: &ConstraintSet,
    settings: &SolverSettings,
    warnings: &mut Vec<String>,
) -> MptResult<Solved> {
    stats.validate()?;
    validate_settings(settings)?;
    let n = stats.len();
    // Feasibility is checked before any solver work.
    let bounds = constraints.resolve(n)?;

    if objective.needs_conditioning() {
        stats.check_conditioning(settings.max_condition_number)?;
    }

    match objective {
        ObjectiveKind::EqualWeight => {
            let w = 1.0 / n as f64;
            if let Some(i) = (0..n).find(|&i| w < bounds.lower[i] || w > bounds.upper[i]) {
                return Err(MptError::InfeasibleConstraints {
                    constraint: format!("bounds[{i}]"),
                    reason: format!(
                        "Equal weight {w:.4} lies outside [{:.4}, {:.4}] for {}",
                        bounds.lower[i],
                        bounds.upper[i],
                        stats.universe.names()[i]
                    ),
                });
            }
            Ok(Solved {
                objective_value: 0.0,
                weights: vec![w; n],
                iterations: 0,
                restarts: 0,
            })
        }

        ObjectiveKind::MaxReturn {
            max_volatility: None,
        } => {
            let weights = greedy_max_return(&stats.mean_returns, &bounds);
            warnings.push(
                "Uncapped maximum return places as much weight as the bounds allow on the \
                 highest-return asset; this concentration is expected"
                    .into(),
            );
            Ok(Solved {
                objective_value: -crate::linalg::vec_dot(&weights, &stats.mean_returns),
                weights,
                iterations: 0,
                restarts: 0,
            })
        }

        ObjectiveKind::MaxReturn {
            max_volatility: Some(cap),
        } => solve_capped_return(stats, &bounds, cap, settings, warnings),

        ObjectiveKind::MinVolatility => {
            let obj = Variance {
                cov: &stats.covariance,
            };
            let first = WeightVector::equal(n).into_inner();
            with_restarts(objective, &bounds, first, settings, |start| {
                projected_gradient(&obj, &bounds, start, settings.max_iterations, settings.tolerance)
            })
        }

        ObjectiveKind::MaxSharpe => {
            let obj = NegativeSharpe {
                mu: &stats.mean_returns,
                cov: &stats.covariance,
                risk_free_rate: stats.risk_free_rate,
            };
            let first = WeightVector::equal(n).into_inner();
            let solved = with_restarts(objective, &bounds, first, settings, |start| {
                projected_gradient(&obj, &bounds, start, settings.max_iterations, settings.tolerance)
            })?;
            if solved.objective_value > 0.0 {
                warnings.push(
                    "No feasible portfolio earns more than the risk-free rate; the maximum \
                     Sharpe ratio is negative"
                        .into(),
                );
            }
            Ok(solved)
        }

        ObjectiveKind::RiskParity => {
            let (long_bounds, clamped) = bounds.long_only()?;
            if clamped {
                warnings.push(
                    "Risk parity is long-only; negative lower bounds were raised to zero".into(),
                );
            }
            let obj = RiskBudgetDispersion {
                cov: &stats.covariance,
            };
            let first = erc_warm_start(&stats.covariance, &long_bounds);
            let solved = with_restarts(objective, &long_bounds, first, settings, |start| {
                projected_gradient(
                    &obj,
                    &long_bounds,
                    start,
                    settings.max_iterations,
                    settings.tolerance,
                )
            })?;
            if let Some(w) = unequal_risk_warning(stats, &long_bounds, &solved.weights) {
                warnings.push(w);
            }
            Ok(solved)
        }
    }
}

/// Warning text when bounds kept the risk-parity solution away from equal contributions.
fn unequal_risk_warning(
    stats: &MarketStatistics,
    bounds: &Bounds,
    weights: &[f64],
) -> Option<String> {
    let fractions: Vec<f64> = performance::risk_contributions(weights, stats)
        .ok()?
        .into_iter()
        .map(|r| r.fraction)
        .collect();
    let max = fractions.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = fractions.iter().copied().fold(f64::INFINITY, f64::min);
    let spread = max - min;
    if spread <= RISK_PARITY_SPREAD_TOLERANCE {
        return None;
    }

    let pinned: Vec<String> = stats
        .universe
        .names()
        .iter()
        .enumerate()
        .filter_map(|(i, name)| {
            if (weights[i] - bounds.upper[i]).abs() < 1e-6 {
                Some(format!("{name} at max {:.4}", bounds.upper[i]))
            } else if (weights[i] - bounds.lower[i]).abs() < 1e-6 {
                Some(format!("{name} at min {:.4}", bounds.lower[i]))
            } else {
                None
            }
        })
        .collect();
    let binding = if pinned.is_empty() {
        "no single bound".to_string()
    } else {
        pinned.join(", ")
    };
    Some(format!(
        "Equal risk contribution is unreachable under the weight bounds ({binding}); \
         risk fractions range from {:.2}% to {:.2}% (spread {:.2}pp)",
        min * 100.0,
        max * 100.0,
        spread * 100.0
    ))
}

fn solve_capped_return(
    stats: &MarketStatistics,
    bounds: &Bounds,
    cap: f64,
    settings: &SolverSettings,
    warnings: &mut Vec<String>,
) -> MptResult<Solved> {
    if !(cap > 0.0 && cap.is_finite()) {
        return Err(MptError::InvalidInput {
            field: "max_volatility".into(),
            reason: "Must be positive and finite".into(),
        });
    }
    let n = stats.len();
    let objective = ObjectiveKind::MaxReturn {
        max_volatility: Some(cap),
    };

    // Cap not binding: the linear-program optimum already satisfies it.
    let greedy = greedy_max_return(&stats.mean_returns, bounds);
    if performance::volatility(&greedy, stats)? <= cap {
        return Ok(Solved {
            objective_value: -crate::linalg::vec_dot(&greedy, &stats.mean_returns),
            weights: greedy,
            iterations: 0,
            restarts: 0,
        });
    }

    // The least volatile feasible portfolio must fit under the cap.
    let variance = Variance {
        cov: &stats.covariance,
    };
    let min_vol = projected_gradient(
        &variance,
        bounds,
        &WeightVector::equal(n).into_inner(),
        settings.max_iterations,
        settings.tolerance,
    );
    let min_vol_level = performance::volatility(&min_vol.weights, stats)?;
    if min_vol_level > cap + 1e-9 {
        return Err(MptError::InfeasibleConstraints {
            constraint: "max_volatility".into(),
            reason: format!(
                "Volatility cap {cap:.4} is below the minimum achievable volatility {min_vol_level:.4}"
            ),
        });
    }

    let obj = NegativeReturn {
        mu: &stats.mean_returns,
    };
    let constraint = SideConstraint::VarianceAtMost {
        cov: &stats.covariance,
        cap: cap * cap,
    };
    let solved = with_restarts(objective, bounds, min_vol.weights, settings, |start| {
        augmented_lagrangian(
            &obj,
            &constraint,
            bounds,
            start,
            settings.max_iterations,
            settings.tolerance,
        )
    })?;
    let achieved = performance::volatility(&solved.weights, stats)?;
    if achieved > cap + 1e-6 {
        warnings.push(format!(
            "Volatility {achieved:.6} exceeds the cap {cap:.6} by solver tolerance"
        ));
    }
    Ok(solved)
}

/// Run `attempt` from `first`, then from seeded random feasible points until one converges
/// or the restart budget runs out. Exhaustion is a `ConvergenceFailure` carrying the best
/// weights seen.
fn with_restarts<F>(
    objective: ObjectiveKind,
    bounds: &Bounds,
    first: Vec<f64>,
    settings: &SolverSettings,
    attempt: F,
) -> MptResult<Solved>
where
    F: Fn(&[f64]) -> SolveOutcome,
{
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut best: Option<SolveOutcome> = None;
    let mut total_iterations = 0u32;

    for restart in 0..=settings.max_restarts {
        let start = if restart == 0 {
            first.clone()
        } else {
            let raw: Vec<f64> = bounds
                .lower
                .iter()
                .zip(bounds.upper.iter())
                .map(|(lo, hi)| if hi > lo { rng.gen_range(*lo..*hi) } else { *lo })
                .collect();
            project(&raw, bounds)
        };

        let outcome = attempt(&start);
        total_iterations = total_iterations.saturating_add(outcome.iterations);

        if outcome.converged {
            return Ok(Solved {
                weights: renormalize(&outcome.weights),
                objective_value: outcome.value,
                iterations: total_iterations,
                restarts: restart,
            });
        }

        let better = match &best {
            None => true,
            Some(b) => outcome.value < b.value || !b.value.is_finite(),
        };
        if better {
            best = Some(outcome);
        }
    }

    let (best_weights, last_delta) = match best {
        Some(b) => (renormalize(&b.weights), b.residual),
        None => (first, f64::INFINITY),
    };
    Err(MptError::ConvergenceFailure {
        objective: objective.name().to_string(),
        iterations: total_iterations,
        restarts: settings.max_restarts,
        last_delta,
        best_weights,
    })
}

fn build_output(
    stats: &MarketStatistics,
    objective: ObjectiveKind,
    solved: Solved,
    warnings: &mut Vec<String>,
) -> MptResult<OptimizationOutput> {
    let expected_return = performance::expected_return(&solved.weights, stats)?;
    let volatility = performance::volatility(&solved.weights, stats)?;
    let sharpe_ratio = match performance::sharpe_ratio(&solved.weights, stats) {
        Ok(s) => Some(s),
        Err(e) => {
            warnings.push(format!("Sharpe ratio undefined: {e}"));
            None
        }
    };
    let fractions: Option<Vec<f64>> = match performance::risk_contributions(&solved.weights, stats)
    {
        Ok(rc) => Some(rc.into_iter().map(|r| r.fraction).collect()),
        Err(e) => {
            warnings.push(format!("Risk contributions undefined: {e}"));
            None
        }
    };

    let allocations = stats
        .universe
        .names()
        .iter()
        .enumerate()
        .map(|(i, name)| AssetAllocation {
            asset: name.clone(),
            weight: solved.weights[i],
            return_contribution: solved.weights[i] * stats.mean_returns[i],
            risk_contribution: fractions.as_ref().map(|f| f[i]),
        })
        .collect::<Vec<_>>();

    if let Some(top) = allocations
        .iter()
        .max_by(|a, b| a.weight.partial_cmp(&b.weight).unwrap_or(std::cmp::Ordering::Equal))
    {
        if top.weight > 0.5 && !matches!(objective, ObjectiveKind::MaxReturn { max_volatility: None }) {
            warnings.push(format!(
                "Concentrated allocation: {} holds {:.1}% of the portfolio",
                top.asset,
                top.weight * 100.0
            ));
        }
    }

    Ok(OptimizationOutput {
        objective,
        weights: WeightVector::from_raw(solved.weights),
        allocations,
        expected_return,
        volatility,
        sharpe_ratio,
        objective_value: solved.objective_value,
        iterations: solved.iterations,
        restarts: solved.restarts,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::AssetUniverse;

    fn four_asset_stats() -> MarketStatistics {
        MarketStatistics::new(
            AssetUniverse::new(["US_EQ", "INTL_EQ", "BONDS", "GOLD"]).unwrap(),
            vec![0.09, 0.10, 0.035, 0.05],
            vec![
                vec![0.0324, 0.0216, 0.0009, 0.0018],
                vec![0.0216, 0.0400, 0.0010, 0.0024],
                vec![0.0009, 0.0010, 0.0025, 0.0006],
                vec![0.0018, 0.0024, 0.0006, 0.0225],
            ],
            0.02,
        )
        .unwrap()
    }

    fn sum(w: &[f64]) -> f64 {
        w.iter().sum()
    }

    // --- 1. Equal weight ---
    #[test]
    fn test_equal_weight_exact() {
        let w = optimize(
            &four_asset_stats(),
            ObjectiveKind::EqualWeight,
            &ConstraintSet::long_only(),
        )
        .unwrap();
        assert!(w.iter().all(|x| *x == 0.25));
    }

    #[test]
    fn test_equal_weight_violates_cap() {
        let err = optimize(
            &four_asset_stats(),
            ObjectiveKind::EqualWeight,
            &ConstraintSet::per_asset(vec![0.0; 4], vec![0.2, 1.0, 1.0, 1.0]),
        )
        .unwrap_err();
        match err {
            MptError::InfeasibleConstraints { constraint, reason } => {
                assert_eq!(constraint, "bounds[0]");
                assert!(reason.contains("US_EQ"));
            }
            other => panic!("Expected InfeasibleConstraints, got {other:?}"),
        }
    }

    // --- 2. Min volatility beats equal weight ---
    #[test]
    fn test_min_volatility_below_equal_weight() {
        let stats = four_asset_stats();
        let out = optimize_with(
            &stats,
            ObjectiveKind::MinVolatility,
            &ConstraintSet::long_only(),
            &SolverSettings::default(),
        )
        .unwrap();
        let ew_vol = performance::volatility(&[0.25; 4], &stats).unwrap();
        assert!(out.result.volatility <= ew_vol);
        assert!((sum(&out.result.weights) - 1.0).abs() < 1e-9);
        assert_eq!(out.result.allocations.len(), 4);
    }

    // --- 3. Max Sharpe is at least as good as every simple portfolio ---
    #[test]
    fn test_max_sharpe_dominates_equal_weight() {
        let stats = four_asset_stats();
        let w = optimize(&stats, ObjectiveKind::MaxSharpe, &ConstraintSet::long_only()).unwrap();
        let s_opt = performance::sharpe_ratio(&w, &stats).unwrap();
        let s_ew = performance::sharpe_ratio(&[0.25; 4], &stats).unwrap();
        assert!(s_opt >= s_ew - 1e-9, "optimal {s_opt} vs equal weight {s_ew}");
        for i in 0..4 {
            let mut corner = vec![0.0; 4];
            corner[i] = 1.0;
            let s = performance::sharpe_ratio(&corner, &stats).unwrap();
            assert!(s_opt >= s - 1e-9);
        }
    }

    // --- 4. Uncapped max return picks the best asset and warns ---
    #[test]
    fn test_max_return_uncapped() {
        let out = optimize_with(
            &four_asset_stats(),
            ObjectiveKind::MaxReturn {
                max_volatility: None,
            },
            &ConstraintSet::long_only(),
            &SolverSettings::default(),
        )
        .unwrap();
        assert_eq!(out.result.weights.as_slice(), &[0.0, 1.0, 0.0, 0.0]);
        assert!(out.warnings.iter().any(|w| w.contains("expected")));
    }

    // --- 5. Volatility cap binds ---
    #[test]
    fn test_max_return_with_cap() {
        let stats = four_asset_stats();
        let w = optimize(
            &stats,
            ObjectiveKind::MaxReturn {
                max_volatility: Some(0.10),
            },
            &ConstraintSet::long_only(),
        )
        .unwrap();
        let vol = performance::volatility(&w, &stats).unwrap();
        assert!(vol <= 0.10 + 1e-6, "vol = {vol}");
        assert!(vol >= 0.10 - 1e-4, "cap should bind, vol = {vol}");
    }

    // --- 6. Cap below minimum variance is infeasible ---
    #[test]
    fn test_max_return_cap_infeasible() {
        let err = optimize(
            &four_asset_stats(),
            ObjectiveKind::MaxReturn {
                max_volatility: Some(0.01),
            },
            &ConstraintSet::long_only(),
        )
        .unwrap_err();
        assert!(matches!(err, MptError::InfeasibleConstraints { .. }));
    }

    // --- 7. Exhausted budget reports best-effort weights ---
    #[test]
    fn test_convergence_failure_carries_weights() {
        let settings = SolverSettings {
            max_iterations: 1,
            tolerance: 1e-15,
            max_restarts: 1,
            ..SolverSettings::default()
        };
        let err = optimize_with(
            &four_asset_stats(),
            ObjectiveKind::MaxSharpe,
            &ConstraintSet::long_only(),
            &settings,
        )
        .unwrap_err();
        assert!(err.is_retryable());
        let w = err.best_effort_weights().unwrap();
        assert!((sum(w) - 1.0).abs() < 1e-9);
    }

    // --- 8. Infeasible bounds fail before solving ---
    #[test]
    fn test_infeasible_before_solver() {
        let err = optimize(
            &four_asset_stats(),
            ObjectiveKind::MinVolatility,
            &ConstraintSet::uniform(0.3, 1.0),
        )
        .unwrap_err();
        assert!(matches!(err, MptError::InfeasibleConstraints { .. }));
    }

    // --- 9. Input deserialisation ---
    #[test]
    fn test_optimize_portfolio_from_json() {
        let input: OptimizationInput = serde_json::from_value(serde_json::json!({
            "statistics": {
                "universe": ["A", "B", "C"],
                "mean_returns": [0.08, 0.05, 0.11],
                "covariance": [[0.04, 0.006, 0.01], [0.006, 0.01, 0.004], [0.01, 0.004, 0.09]],
                "risk_free_rate": 0.02
            },
            "objective": {"type": "risk_parity"},
            "constraints": {"max_weights": 0.8}
        }))
        .unwrap();
        let out = optimize_portfolio(&input).unwrap();
        let rc: Vec<f64> = out
            .result
            .allocations
            .iter()
            .filter_map(|a| a.risk_contribution)
            .collect();
        assert_eq!(rc.len(), 3);
        for r in &rc {
            assert!((r - 1.0 / 3.0).abs() < 1e-6, "risk contributions {rc:?}");
        }
        assert!(!out.warnings.iter().any(|w| w.contains("Equal risk")));
    }

    fn three_asset_stats() -> MarketStatistics {
        MarketStatistics::new(
            AssetUniverse::new(["A", "B", "C"]).unwrap(),
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

    // --- 10. Risk parity pinned by a weight cap ---
    #[test]
    fn test_risk_parity_cap_reports_unequal_risk() {
        let stats = three_asset_stats();
        let out = optimize_with(
            &stats,
            ObjectiveKind::RiskParity,
            &ConstraintSet::uniform(0.0, 0.4),
            &ObjectiveKind::RiskParity.default_settings(),
        )
        .unwrap();
        let w = &out.result.weights;
        assert!((w[1] - 0.4).abs() < 1e-6, "B should sit on its cap: {w:?}");

        let rc: Vec<f64> = out
            .result
            .allocations
            .iter()
            .map(|a| a.risk_contribution.unwrap())
            .collect();
        let spread = rc.iter().copied().fold(f64::MIN, f64::max)
            - rc.iter().copied().fold(f64::MAX, f64::min);
        assert!(spread > 0.1, "risk fractions {rc:?}");

        let warning = out
            .warnings
            .iter()
            .find(|w| w.contains("Equal risk contribution is unreachable"))
            .expect("unequal risk should be reported");
        assert!(warning.contains("B at max 0.4000"), "{warning}");
    }

    // --- 11. Zero-variance portfolio has no risk contributions ---
    #[test]
    fn test_zero_variance_risk_contribution_is_none() {
        let stats = MarketStatistics::new(
            AssetUniverse::new(["CASH_A", "CASH_B", "CASH_C"]).unwrap(),
            vec![0.03, 0.03, 0.03],
            vec![vec![0.0; 3]; 3],
            0.02,
        )
        .unwrap();
        let out = optimize_with(
            &stats,
            ObjectiveKind::EqualWeight,
            &ConstraintSet::long_only(),
            &SolverSettings::default(),
        )
        .unwrap();
        assert!(out.result.allocations.iter().all(|a| a.risk_contribution.is_none()));
        assert!(out
            .warnings
            .iter()
            .any(|w| w.contains("Risk contributions undefined")));
    }
}
