pub mod frontier;
pub mod metrics;
pub mod optimize;
pub mod rebalance;
pub mod simulate;
pub mod stats;

use clap::Args;
use serde::de::DeserializeOwned;

use mpt_core::market::MarketStatistics;
use mpt_core::optimizer::{ConstraintSet, WeightBound};

use crate::input;

/// Weight bounds shared by the optimisation commands.
#[derive(Args, Debug, Clone)]
pub struct ConstraintArgs {
    /// Minimum weight applied to every asset
    #[arg(long, allow_hyphen_values = true)]
    pub min_weight: Option<f64>,

    /// Maximum weight applied to every asset
    #[arg(long)]
    pub max_weight: Option<f64>,

    /// Permit negative weights
    #[arg(long)]
    pub allow_short: bool,
}

impl ConstraintArgs {
    pub fn to_constraints(&self) -> ConstraintSet {
        ConstraintSet {
            min_weights: self.min_weight.map(WeightBound::Uniform),
            max_weights: self.max_weight.map(WeightBound::Uniform),
            allow_short: self.allow_short,
        }
    }
}

/// Full request from `--input`, or from piped stdin. `None` when neither is present.
pub fn load_request<T: DeserializeOwned>(
    path: &Option<String>,
) -> Result<Option<T>, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        return Ok(Some(input::file::read_structured(path)?));
    }
    match input::stdin::read_stdin()? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Market statistics from a JSON/YAML file.
pub fn load_statistics(
    path: &Option<String>,
    command: &str,
) -> Result<MarketStatistics, Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            let stats: MarketStatistics = input::file::read_structured(p)?;
            stats.validate()?;
            Ok(stats)
        }
        None => Err(format!(
            "--input <request> or --statistics <file> (or piped stdin) required for {command}"
        )
        .into()),
    }
}
