#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::market::MarketStatistics;
use crate::optimizer::constraints::ConstraintSet;
use crate::optimizer::objectives::ObjectiveKind;
use crate::optimizer::optimize::{optimize_with, OptimizationOutput, SolverSettings};
use crate::types::*;
use crate::MptResult;

/// Input for running several objectives side by side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonInput {
    pub statistics: MarketStatistics,
    #[serde(default)]
    pub constraints: ConstraintSet,
    /// Objectives to compare; all five when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objectives: Option<Vec<ObjectiveKind>>,
    /// Applied to every objective instead of its own defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SolverSettings>,
    /// Solve objectives on worker threads (needs the `parallel` feature).
    #[serde(default)]
    pub parallel: bool,
}

/// One objective's outcome. Failures are kept per row instead of aborting the comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyResult {
    pub objective: ObjectiveKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portfolio: Option<OptimizationOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonOutput {
    pub strategies: Vec<StrategyResult>,
    pub best_sharpe: Option<ObjectiveKind>,
    pub lowest_volatility: Option<ObjectiveKind>,
    pub highest_return: Option<ObjectiveKind>,
}

fn run_one(
    stats: &MarketStatistics,
    constraints: &ConstraintSet,
    settings: Option<&SolverSettings>,
    objective: ObjectiveKind,
) -> StrategyResult {
    let settings = settings
        .cloned()
        .unwrap_or_else(|| objective.default_settings());
    match optimize_with(stats, objective, constraints, &settings) {
        Ok(out) => StrategyResult {
            objective,
            portfolio: Some(out.result),
            error: None,
            warnings: out.warnings,
        },
        Err(e) => StrategyResult {
            objective,
            portfolio: None,
            error: Some(e.to_string()),
            warnings: Vec::new(),
        },
    }
}

fn pick_best<F>(rows: &[StrategyResult], key: F) -> Option<ObjectiveKind>
where
    F: Fn(&OptimizationOutput) -> Option<f64>,
{
    rows.iter()
        .filter_map(|r| {
            r.portfolio
                .as_ref()
                .and_then(|p| key(p).map(|k| (r.objective, k)))
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(o, _)| o)
}

/// Run each objective independently against the same statistics and constraints.
pub fn compare_strategies(
    input: &ComparisonInput,
) -> MptResult<ComputationOutput<ComparisonOutput>> {
    let start = Instant::now();
    input.statistics.validate()?;
    let mut warnings = Vec::new();

    let objectives: Vec<ObjectiveKind> = input
        .objectives
        .clone()
        .unwrap_or_else(|| ObjectiveKind::all().to_vec());

    let stats = &input.statistics;
    let constraints = &input.constraints;
    let settings = input.settings.as_ref();

    #[cfg(feature = "parallel")]
    let strategies: Vec<StrategyResult> = if input.parallel {
        objectives
            .par_iter()
            .map(|o| run_one(stats, constraints, settings, *o))
            .collect()
    } else {
        objectives
            .iter()
            .map(|o| run_one(stats, constraints, settings, *o))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let strategies: Vec<StrategyResult> = {
        if input.parallel {
            warnings.push("Built without the parallel feature; objectives ran sequentially".into());
        }
        objectives
            .iter()
            .map(|o| run_one(stats, constraints, settings, *o))
            .collect()
    };

    let failed = strategies.iter().filter(|s| s.error.is_some()).count();
    if failed > 0 {
        warnings.push(format!("{failed} of {} objectives failed", strategies.len()));
    }

    let output = ComparisonOutput {
        best_sharpe: pick_best(&strategies, |p| p.sharpe_ratio),
        lowest_volatility: pick_best(&strategies, |p| Some(-p.volatility)),
        highest_return: pick_best(&strategies, |p| Some(p.expected_return)),
        strategies,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Independent optimisation per objective",
        &serde_json::json!({
            "objectives": objectives,
            "constraints": input.constraints,
            "parallel": input.parallel,
        }),
        warnings,
        elapsed,
        output,
    ))
}
