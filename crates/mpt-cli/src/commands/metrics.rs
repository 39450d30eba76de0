use clap::Args;
use serde_json::Value;

use mpt_core::metrics::{calculate_metrics, MetricsConfig, MetricsInput};

/// Arguments for the risk/performance report
#[derive(Args)]
pub struct MetricsArgs {
    /// Path to a JSON/YAML MetricsInput
    #[arg(long)]
    pub input: Option<String>,

    /// Path to a JSON/YAML MarketStatistics file
    #[arg(long, conflicts_with = "input")]
    pub statistics: Option<String>,

    /// Comma-separated portfolio weights
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub weights: Option<Vec<f64>>,

    /// Confidence level for VaR/CVaR
    #[arg(long, default_value = "0.95")]
    pub confidence: f64,
}

pub fn run_metrics(args: MetricsArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let request: MetricsInput = match super::load_request(&args.input)? {
        Some(r) => r,
        None => {
            let weights = args
                .weights
                .ok_or("--weights is required with --statistics")?;
            MetricsInput {
                weights,
                statistics: super::load_statistics(&args.statistics, "metrics")?,
                returns: None,
                benchmark_returns: None,
                config: MetricsConfig {
                    confidence: args.confidence,
                    ..MetricsConfig::default()
                },
            }
        }
    };

    let result = calculate_metrics(&request)?;
    Ok(serde_json::to_value(result)?)
}
