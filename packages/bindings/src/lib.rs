use napi::Result as NapiResult;
use napi_derive::napi;
use serde::de::DeserializeOwned;
use serde::Serialize;

use mpt_core::MptResult;

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

/// Parse the JSON request, run the calculation, serialise the envelope.
fn call<I, O>(input_json: &str, f: impl FnOnce(&I) -> MptResult<O>) -> NapiResult<String>
where
    I: DeserializeOwned,
    O: Serialize,
{
    let input: I = serde_json::from_str(input_json).map_err(to_napi_error)?;
    let output = f(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Market statistics
// ---------------------------------------------------------------------------

#[napi]
pub fn estimate_statistics(input_json: String) -> NapiResult<String> {
    call(&input_json, mpt_core::market::estimate_statistics)
}

// ---------------------------------------------------------------------------
// Optimisation
// ---------------------------------------------------------------------------

#[napi]
pub fn optimize_portfolio(input_json: String) -> NapiResult<String> {
    call(&input_json, mpt_core::optimizer::optimize_portfolio)
}

#[napi]
pub fn compare_strategies(input_json: String) -> NapiResult<String> {
    call(&input_json, mpt_core::optimizer::compare_strategies)
}

#[napi]
pub fn generate_frontier(input_json: String) -> NapiResult<String> {
    call(&input_json, mpt_core::frontier::generate_frontier)
}

// ---------------------------------------------------------------------------
// Risk metrics
// ---------------------------------------------------------------------------

#[napi]
pub fn calculate_metrics(input_json: String) -> NapiResult<String> {
    call(&input_json, mpt_core::metrics::calculate_metrics)
}

// ---------------------------------------------------------------------------
// Monte Carlo
// ---------------------------------------------------------------------------

#[napi]
pub fn run_simulation(input_json: String) -> NapiResult<String> {
    call(&input_json, mpt_core::monte_carlo::run_simulation)
}

#[napi]
pub fn compare_scenarios(input_json: String) -> NapiResult<String> {
    call(&input_json, mpt_core::monte_carlo::compare_scenarios)
}

// ---------------------------------------------------------------------------
// Rebalancing
// ---------------------------------------------------------------------------

#[napi]
pub fn calculate_rebalance(input_json: String) -> NapiResult<String> {
    call(&input_json, mpt_core::rebalance::calculate_rebalance)
}
