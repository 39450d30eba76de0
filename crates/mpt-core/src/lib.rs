pub mod error;
pub mod market;
pub mod types;

mod linalg;

#[cfg(feature = "metrics")]
pub mod metrics;

#[cfg(feature = "optimizer")]
pub mod optimizer;

#[cfg(feature = "frontier")]
pub mod frontier;

#[cfg(feature = "monte_carlo")]
pub mod monte_carlo;

#[cfg(feature = "rebalance")]
pub mod rebalance;

pub use error::MptError;
pub use types::*;

/// Standard result type for all portfolio-engine operations
pub type MptResult<T> = Result<T, MptError>;
