use thiserror::Error;

#[derive(Debug, Error)]
pub enum MptError {
    #[error("Invalid input: {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Infeasible constraints: {constraint}: {reason}")]
    InfeasibleConstraints { constraint: String, reason: String },

    #[error("Convergence failure: {objective} did not converge after {iterations} iterations and {restarts} restarts (residual: {last_delta:e})")]
    ConvergenceFailure {
        objective: String,
        iterations: u32,
        restarts: u32,
        last_delta: f64,
        /// Best weight vector found, already re-normalised to sum to one.
        best_weights: Vec<f64>,
    },

    #[error("Singular covariance: condition number {condition_number:.3e}{}", describe_pair(.asset_pair))]
    SingularCovariance {
        condition_number: f64,
        asset_pair: Option<(String, String)>,
    },

    #[error("Insufficient history: {required} return observations required, {available} available")]
    InsufficientHistory { required: usize, available: usize },

    #[error("Division by zero in {context}")]
    DivisionByZero { context: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl MptError {
    /// Best-effort weights carried by a `ConvergenceFailure`.
    pub fn best_effort_weights(&self) -> Option<&[f64]> {
        match self {
            MptError::ConvergenceFailure { best_weights, .. } => Some(best_weights),
            _ => None,
        }
    }

    /// Only solver exhaustion can succeed on a retry with a larger budget or another seed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MptError::ConvergenceFailure { .. })
    }
}

fn describe_pair(pair: &Option<(String, String)>) -> String {
    match pair {
        Some((a, b)) => format!(" (near-duplicate assets: {a} / {b})"),
        None => String::new(),
    }
}

impl From<serde_json::Error> for MptError {
    fn from(e: serde_json::Error) -> Self {
        MptError::SerializationError(e.to_string())
    }
}
