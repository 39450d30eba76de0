use clap::Args;
use serde_json::Value;
use tracing::debug;

use mpt_core::market::{
    estimate_statistics, AssetUniverse, EstimationConfig, ReturnKind, StatisticsInput,
};

use crate::input;

/// Arguments for estimating annualised market statistics
#[derive(Args)]
pub struct StatsArgs {
    /// Path to a JSON/YAML StatisticsInput
    #[arg(long)]
    pub input: Option<String>,

    /// CSV price table: header of asset names, optional leading date column
    #[arg(long, conflicts_with = "input")]
    pub prices: Option<String>,

    /// Use log returns instead of simple returns
    #[arg(long)]
    pub log_returns: bool,

    /// Observations per year used for annualisation
    #[arg(long, default_value = "252")]
    pub periods_per_year: f64,

    /// Annualised risk-free rate
    #[arg(long, default_value = "0.02")]
    pub risk_free_rate: f64,

    /// Minimum number of return observations
    #[arg(long, default_value = "30")]
    pub min_observations: usize,
}

pub fn run_stats(args: StatsArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let stats_input: StatisticsInput = if let Some(ref path) = args.prices {
        let table = input::file::read_price_csv(path)?;
        debug!(assets = table.assets.len(), rows = table.rows.len(), "loaded price table");
        StatisticsInput {
            assets: AssetUniverse::new(table.assets)?,
            prices: Some(table.rows),
            returns: None,
            config: EstimationConfig {
                return_kind: if args.log_returns {
                    ReturnKind::Log
                } else {
                    ReturnKind::Simple
                },
                periods_per_year: args.periods_per_year,
                risk_free_rate: args.risk_free_rate,
                min_observations: args.min_observations,
            },
        }
    } else if let Some(request) = super::load_request(&args.input)? {
        request
    } else {
        return Err("--prices <file.csv>, --input <file> or stdin required for stats".into());
    };

    let result = estimate_statistics(&stats_input)?;
    Ok(serde_json::to_value(result)?)
}
