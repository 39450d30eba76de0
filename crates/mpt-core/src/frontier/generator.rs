use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::MptError;
use crate::linalg::vec_dot;
use crate::market::MarketStatistics;
use crate::metrics::performance;
use crate::optimizer::constraints::{greedy_max_return, renormalize, ConstraintSet};
use crate::optimizer::objectives::Variance;
use crate::optimizer::optimize::{validate_settings, SolverSettings};
use crate::optimizer::solver::{augmented_lagrangian, projected_gradient, SideConstraint};
use crate::types::*;
use crate::MptResult;

/// Target-return error above which a sweep point is discarded.
const TARGET_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierInput {
    pub statistics: MarketStatistics,
    #[serde(default)]
    pub constraints: ConstraintSet,
    #[serde(default = "default_points")]
    pub n_points: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SolverSettings>,
}

fn default_points() -> usize {
    20
}

/// One efficient portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierPoint {
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: Option<f64>,
    pub weights: WeightVector,
}

/// Frontier ordered by increasing return. May hold fewer than `requested` points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierOutput {
    pub points: Vec<FrontierPoint>,
    pub requested: usize,
    /// Targets the solver could not meet.
    pub skipped: usize,
    /// Converged points dropped for lying below the previous point's volatility.
    #[serde(default)]
    pub dominated: usize,
    pub min_variance_return: f64,
    pub max_return: f64,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Sweep `n_points` target returns from the minimum-variance portfolio's return to the
/// maximum achievable return. Points that fail to converge are left out, so callers must
/// not rely on the exact cardinality.
pub fn generate(
    stats: &MarketStatistics,
    constraints: &ConstraintSet,
    n_points: usize,
) -> MptResult<Vec<FrontierPoint>> {
    let (output, _) = sweep(stats, constraints, n_points, &SolverSettings::default())?;
    Ok(output.points)
}

/// Same sweep with explicit solver settings, wrapped in the standard envelope.
pub fn generate_with(
    stats: &MarketStatistics,
    constraints: &ConstraintSet,
    n_points: usize,
    settings: &SolverSettings,
) -> MptResult<ComputationOutput<FrontierOutput>> {
    let start = Instant::now();
    let (output, warnings) = sweep(stats, constraints, n_points, settings)?;
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Minimum variance at swept target returns (augmented Lagrangian, warm-started)",
        &serde_json::json!({
            "n_points": n_points,
            "constraints": constraints,
            "target_tolerance": TARGET_TOLERANCE,
            "risk_free_rate": stats.risk_free_rate,
        }),
        warnings,
        elapsed,
        output,
    ))
}

pub fn generate_frontier(input: &FrontierInput) -> MptResult<ComputationOutput<FrontierOutput>> {
    let settings = input.settings.clone().unwrap_or_default();
    generate_with(&input.statistics, &input.constraints, input.n_points, &settings)
}

// ---------------------------------------------------------------------------
// Sweep
// ---------------------------------------------------------------------------

fn point(stats: &MarketStatistics, weights: Vec<f64>) -> MptResult<FrontierPoint> {
    Ok(FrontierPoint {
        expected_return: performance::expected_return(&weights, stats)?,
        volatility: performance::volatility(&weights, stats)?,
        sharpe_ratio: performance::sharpe_ratio(&weights, stats).ok(),
        weights: WeightVector::from_raw(weights),
    })
}

fn sweep(
    stats: &MarketStatistics,
    constraints: &ConstraintSet,
    n_points: usize,
    settings: &SolverSettings,
) -> MptResult<(FrontierOutput, Vec<String>)> {
    stats.validate()?;
    validate_settings(settings)?;
    if n_points < 2 {
        return Err(MptError::InvalidInput {
            field: "n_points".into(),
            reason: "At least 2 frontier points required".into(),
        });
    }
    let n = stats.len();
    let bounds = constraints.resolve(n)?;
    stats.check_conditioning(settings.max_condition_number)?;

    let mut warnings = Vec::new();
    let variance = Variance {
        cov: &stats.covariance,
    };
    let mu: &[f64] = &stats.mean_returns;

    let min_var = projected_gradient(
        &variance,
        &bounds,
        &WeightVector::equal(n).into_inner(),
        settings.max_iterations,
        settings.tolerance,
    );
    if !min_var.converged {
        return Err(MptError::ConvergenceFailure {
            objective: "min_volatility".into(),
            iterations: min_var.iterations,
            restarts: 0,
            last_delta: min_var.residual,
            best_weights: renormalize(&min_var.weights),
        });
    }
    let max_ret_weights = greedy_max_return(mu, &bounds);

    let r_lo = vec_dot(mu, &min_var.weights);
    let r_hi = vec_dot(mu, &max_ret_weights);

    let mut points = Vec::with_capacity(n_points);
    let mut skipped = 0usize;
    let mut dominated = 0usize;
    points.push(point(stats, renormalize(&min_var.weights))?);

    if r_hi - r_lo <= TARGET_TOLERANCE {
        warnings.push(
            "Minimum-variance portfolio already attains the maximum return; frontier is a single point"
                .into(),
        );
        return Ok((
            FrontierOutput {
                requested: n_points,
                skipped: n_points - 1,
                dominated: 0,
                min_variance_return: r_lo,
                max_return: r_hi,
                points,
            },
            warnings,
        ));
    }

    let step = (r_hi - r_lo) / (n_points - 1) as f64;
    let mut warm = min_var.weights.clone();

    for k in 1..n_points {
        let target = r_lo + step * k as f64;
        let weights = if k == n_points - 1 {
            max_ret_weights.clone()
        } else {
            let constraint = SideConstraint::ReturnEquals { mu, target };
            let solved = augmented_lagrangian(
                &variance,
                &constraint,
                &bounds,
                &warm,
                settings.max_iterations,
                settings.tolerance,
            );
            if !solved.converged || constraint.violation(&solved.weights) > TARGET_TOLERANCE {
                skipped += 1;
                continue;
            }
            warm = solved.weights.clone();
            solved.weights
        };

        let candidate = point(stats, renormalize(&weights))?;
        let prev_vol = points.last().map(|p: &FrontierPoint| p.volatility).unwrap_or(0.0);
        if candidate.volatility < prev_vol - 1e-9 {
            dominated += 1;
            continue;
        }
        points.push(candidate);
    }

    warnings.extend(dropped_point_warnings(n_points, skipped, dominated));

    Ok((
        FrontierOutput {
            points,
            requested: n_points,
            skipped,
            dominated,
            min_variance_return: r_lo,
            max_return: r_hi,
        },
        warnings,
    ))
}

fn dropped_point_warnings(n_points: usize, skipped: usize, dominated: usize) -> Vec<String> {
    let mut warnings = Vec::new();
    if skipped > 0 {
        warnings.push(format!(
            "{skipped} of {n_points} frontier points failed to converge and were skipped"
        ));
    }
    if dominated > 0 {
        warnings.push(format!(
            "{dominated} of {n_points} frontier points had lower volatility than the point \
             before them and were dropped"
        ));
    }
    warnings
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
