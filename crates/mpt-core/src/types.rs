use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::Deref;

use crate::error::MptError;
use crate::MptResult;

/// All monetary values handled by the rebalancer. Wraps Decimal to prevent accidental f64 usage.
pub type Money = Decimal;

/// Tolerance used for the fully-invested invariant (sum of weights == 1).
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Portfolio weights indexed positionally against an `AssetUniverse`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightVector(Vec<f64>);

impl WeightVector {
    /// Wrap caller-supplied weights, rejecting empty or non-finite vectors.
    pub fn new(weights: Vec<f64>) -> MptResult<Self> {
        if weights.is_empty() {
            return Err(MptError::InvalidInput {
                field: "weights".into(),
                reason: "At least one weight required".into(),
            });
        }
        if let Some(i) = weights.iter().position(|w| !w.is_finite()) {
            return Err(MptError::InvalidInput {
                field: format!("weights[{i}]"),
                reason: "Weight must be finite".into(),
            });
        }
        Ok(Self(weights))
    }

    /// The 1/N portfolio.
    pub fn equal(n: usize) -> Self {
        Self(vec![1.0 / n as f64; n])
    }

    pub(crate) fn from_raw(weights: Vec<f64>) -> Self {
        Self(weights)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Herfindahl-Hirschman index: sum of squared weights.
    pub fn hhi(&self) -> f64 {
        self.0.iter().map(|w| w * w).sum()
    }

    pub fn is_fully_invested(&self) -> bool {
        (self.sum() - 1.0).abs() <= WEIGHT_SUM_TOLERANCE
    }
}

impl Deref for WeightVector {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.0
    }
}

impl From<WeightVector> for Vec<f64> {
    fn from(w: WeightVector) -> Self {
        w.0
    }
}

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Wrap a floating-point computation result with metadata.
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    envelope(methodology, assumptions, warnings, elapsed_us, "ieee754_f64", result)
}

/// Wrap a Decimal computation result with metadata.
pub fn with_decimal_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    envelope(
        methodology,
        assumptions,
        warnings,
        elapsed_us,
        "rust_decimal_128bit",
        result,
    )
}

fn envelope<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    precision: &str,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: precision.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_weight_vector() {
        let w = WeightVector::equal(4);
        assert_eq!(w.len(), 4);
        assert!(w.is_fully_invested());
        assert!((w.hhi() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_weight_vector_rejects_nan() {
        assert!(WeightVector::new(vec![0.5, f64::NAN]).is_err());
        assert!(WeightVector::new(vec![]).is_err());
    }

    #[test]
    fn test_precision_tags() {
        let a = with_metadata("m", &serde_json::json!({}), vec![], 0, 1.0);
        let b = with_decimal_metadata("m", &serde_json::json!({}), vec![], 0, 1.0);
        assert_eq!(a.metadata.precision, "ieee754_f64");
        assert_eq!(b.metadata.precision, "rust_decimal_128bit");
    }
}
