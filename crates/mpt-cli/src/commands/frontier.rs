use clap::Args;
use serde_json::Value;
use tracing::{info, warn};

use mpt_core::frontier::{generate_frontier, FrontierInput};

use super::ConstraintArgs;

/// Arguments for efficient-frontier generation
#[derive(Args)]
pub struct FrontierArgs {
    /// Path to a JSON/YAML FrontierInput
    #[arg(long)]
    pub input: Option<String>,

    /// Path to a JSON/YAML MarketStatistics file
    #[arg(long, conflicts_with = "input")]
    pub statistics: Option<String>,

    /// Number of target returns to sweep
    #[arg(long, default_value = "20")]
    pub points: usize,

    #[command(flatten)]
    pub constraints: ConstraintArgs,
}

pub fn run_frontier(args: FrontierArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let request: FrontierInput = match super::load_request(&args.input)? {
        Some(r) => r,
        None => FrontierInput {
            statistics: super::load_statistics(&args.statistics, "frontier")?,
            constraints: args.constraints.to_constraints(),
            n_points: args.points,
            settings: None,
        },
    };

    info!(points = request.n_points, "sweeping frontier");
    let result = generate_frontier(&request)?;
    let r = &result.result;
    if r.skipped + r.dominated > 0 {
        warn!(
            skipped = r.skipped,
            dominated = r.dominated,
            "frontier points dropped"
        );
    }

    // Table/CSV renderers work best with the point list as the primary payload.
    let mut value = serde_json::to_value(&result)?;
    if let Some(points) = value.pointer("/result/points").cloned() {
        value["results"] = points;
    }
    Ok(value)
}
