use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::info;

use mpt_core::rebalance::{calculate_rebalance, RebalanceInput};

/// Arguments for a drift check
#[derive(Args)]
pub struct RebalanceArgs {
    /// Path to a JSON/YAML RebalanceInput
    #[arg(long)]
    pub input: Option<String>,

    /// Comma-separated target weights
    #[arg(long, value_delimiter = ',', conflicts_with = "input")]
    pub targets: Option<Vec<Decimal>>,

    /// Comma-separated current position values
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub values: Option<Vec<Decimal>>,

    /// Comma-separated asset names
    #[arg(long, value_delimiter = ',')]
    pub assets: Option<Vec<String>>,

    /// Comma-separated current prices, to express trades in shares
    #[arg(long, value_delimiter = ',')]
    pub prices: Option<Vec<Decimal>>,

    /// Absolute drift band, e.g. 0.05 for five percentage points
    #[arg(long, default_value = "0.05")]
    pub threshold: Decimal,

    /// Transaction cost in basis points of traded value
    #[arg(long, default_value = "0")]
    pub cost_bps: Decimal,
}

pub fn run_rebalance(args: RebalanceArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let request: RebalanceInput = match super::load_request(&args.input)? {
        Some(r) => r,
        None => {
            let (targets, values) = match (args.targets, args.values) {
                (Some(t), Some(v)) => (t, v),
                _ => {
                    return Err(
                        "--input <file>, stdin, or both --targets and --values required for rebalance"
                            .into(),
                    )
                }
            };
            RebalanceInput {
                assets: args.assets,
                target_weights: targets,
                current_values: values,
                drift_threshold: args.threshold,
                prices: args.prices,
                transaction_cost_bps: args.cost_bps,
            }
        }
    };

    info!(assets = request.target_weights.len(), threshold = %request.drift_threshold, "checking drift");
    let result = calculate_rebalance(&request)?;

    let mut value = serde_json::to_value(&result)?;
    if let Some(rows) = value.pointer("/result/instructions").cloned() {
        value["results"] = rows;
    }
    Ok(value)
}
