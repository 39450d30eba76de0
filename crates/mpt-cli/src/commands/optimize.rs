use clap::Args;
use serde_json::Value;
use tracing::{debug, info};

use mpt_core::optimizer::{
    compare_strategies, optimize_portfolio, ComparisonInput, ObjectiveKind, OptimizationInput,
};

use super::ConstraintArgs;

/// Arguments for a single optimisation
#[derive(Args)]
pub struct OptimizeArgs {
    /// Path to a JSON/YAML OptimizationInput
    #[arg(long)]
    pub input: Option<String>,

    /// Path to a JSON/YAML MarketStatistics file
    #[arg(long, conflicts_with = "input")]
    pub statistics: Option<String>,

    /// max_sharpe, min_volatility, max_return, risk_parity or equal_weight
    #[arg(long, default_value = "max_sharpe")]
    pub objective: ObjectiveKind,

    /// Volatility cap for max_return
    #[arg(long)]
    pub max_volatility: Option<f64>,

    #[command(flatten)]
    pub constraints: ConstraintArgs,
}

/// Arguments for comparing objectives side by side
#[derive(Args)]
pub struct CompareArgs {
    /// Path to a JSON/YAML ComparisonInput
    #[arg(long)]
    pub input: Option<String>,

    /// Path to a JSON/YAML MarketStatistics file
    #[arg(long, conflicts_with = "input")]
    pub statistics: Option<String>,

    /// Comma-separated objectives (default: all five)
    #[arg(long, value_delimiter = ',')]
    pub objectives: Option<Vec<ObjectiveKind>>,

    /// Solve objectives on worker threads
    #[arg(long)]
    pub parallel: bool,

    #[command(flatten)]
    pub constraints: ConstraintArgs,
}

pub fn run_optimize(args: OptimizeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let request: OptimizationInput = match super::load_request(&args.input)? {
        Some(r) => r,
        None => {
            let objective = match (args.objective, args.max_volatility) {
                (ObjectiveKind::MaxReturn { .. }, cap) => ObjectiveKind::MaxReturn {
                    max_volatility: cap,
                },
                (other, None) => other,
                (_, Some(_)) => {
                    return Err("--max-volatility only applies to --objective max_return".into())
                }
            };
            OptimizationInput {
                statistics: super::load_statistics(&args.statistics, "optimize")?,
                objective,
                constraints: args.constraints.to_constraints(),
                settings: None,
            }
        }
    };

    info!(objective = %request.objective, assets = request.statistics.len(), "optimising");
    let result = optimize_portfolio(&request)?;
    debug!(
        iterations = result.result.iterations,
        restarts = result.result.restarts,
        elapsed_us = result.metadata.computation_time_us,
        "solver finished"
    );
    Ok(serde_json::to_value(result)?)
}

pub fn run_compare(args: CompareArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let request: ComparisonInput = match super::load_request(&args.input)? {
        Some(r) => r,
        None => ComparisonInput {
            statistics: super::load_statistics(&args.statistics, "compare")?,
            constraints: args.constraints.to_constraints(),
            objectives: args.objectives,
            settings: None,
            parallel: args.parallel,
        },
    };

    info!(parallel = request.parallel, "comparing strategies");
    let result = compare_strategies(&request)?;
    for row in &result.result.strategies {
        if let Some(ref e) = row.error {
            debug!(objective = %row.objective, error = %e, "strategy failed");
        }
    }
    Ok(serde_json::to_value(result)?)
}
