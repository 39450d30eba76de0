use clap::Args;
use serde_json::Value;
use tracing::info;

use mpt_core::monte_carlo::{
    compare_scenarios, run_simulation, ScenarioComparisonInput, SimulationInput, SimulationModel,
};

/// Arguments for a Monte Carlo projection
#[derive(Args)]
pub struct SimulateArgs {
    /// Path to a JSON/YAML SimulationInput
    #[arg(long)]
    pub input: Option<String>,

    /// Path to a JSON/YAML MarketStatistics file
    #[arg(long, conflicts_with = "input")]
    pub statistics: Option<String>,

    /// Comma-separated portfolio weights
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub weights: Option<Vec<f64>>,

    /// Starting portfolio value
    #[arg(long, default_value = "10000")]
    pub initial_value: f64,

    /// Number of steps to project
    #[arg(long, default_value = "10")]
    pub horizon: usize,

    /// Number of trials
    #[arg(long, default_value = "10000")]
    pub trials: usize,

    /// Contribution added at the end of every step
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub contribution: f64,

    /// Steps per year (1 = annual, 12 = monthly)
    #[arg(long, default_value = "1")]
    pub steps_per_year: u32,

    /// Seed for a reproducible run
    #[arg(long)]
    pub seed: Option<u64>,

    /// Goal value for success-probability analysis
    #[arg(long)]
    pub goal: Option<f64>,

    /// Draw joint per-asset returns instead of one aggregate return
    #[arg(long)]
    pub correlated: bool,

    /// Run trials on worker threads
    #[arg(long)]
    pub parallel: bool,
}

/// Arguments for projecting several scenarios against one base simulation
#[derive(Args)]
pub struct ScenariosArgs {
    /// Path to a JSON/YAML ScenarioComparisonInput (reads stdin when omitted)
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_simulate(args: SimulateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let request: SimulationInput = match super::load_request(&args.input)? {
        Some(r) => r,
        None => {
            let weights = args
                .weights
                .ok_or("--weights is required with --statistics")?;
            SimulationInput {
                weights,
                statistics: super::load_statistics(&args.statistics, "simulate")?,
                initial_value: args.initial_value,
                horizon_periods: args.horizon,
                n_trials: args.trials,
                periodic_contribution: args.contribution,
                steps_per_year: args.steps_per_year,
                percentiles: vec![10.0, 25.0, 50.0, 75.0, 90.0],
                model: if args.correlated {
                    SimulationModel::CorrelatedAssets
                } else {
                    SimulationModel::AggregateNormal
                },
                seed: args.seed,
                goal: args.goal,
                parallel: args.parallel,
            }
        }
    };

    info!(
        trials = request.n_trials,
        horizon = request.horizon_periods,
        model = ?request.model,
        "running simulation"
    );
    let result = run_simulation(&request)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_scenarios(args: ScenariosArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let request: ScenarioComparisonInput = super::load_request(&args.input)?
        .ok_or("--input <request> (or piped stdin) required for scenarios")?;

    info!(
        scenarios = request.scenarios.len(),
        trials = request.base.n_trials,
        "comparing scenarios"
    );
    let result = compare_scenarios(&request)?;

    let mut value = serde_json::to_value(&result)?;
    if let Some(rows) = value.pointer("/result/scenarios").cloned() {
        value["results"] = rows;
    }
    Ok(value)
}
