use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::MptError;
use crate::monte_carlo::simulation::{run_simulation, SimulationInput};
use crate::types::*;
use crate::MptResult;

/// Overrides applied to the base simulation for one named scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizon_periods: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub periodic_contribution: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioComparisonInput {
    pub base: SimulationInput,
    pub scenarios: Vec<Scenario>,
}

/// Terminal-value summary of one scenario. A failed scenario keeps its row with `error` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub initial_value: f64,
    pub horizon_periods: usize,
    pub periodic_contribution: f64,
    pub total_contributions: f64,
    pub median_final: Option<f64>,
    pub mean_final: Option<f64>,
    pub var_95: Option<f64>,
    pub probability_of_loss: Option<f64>,
    /// Share of trials at or above the goal, when a goal applies.
    pub success_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioComparison {
    pub scenarios: Vec<ScenarioOutcome>,
    pub best_median: Option<String>,
    pub lowest_loss_probability: Option<String>,
    /// Seed every scenario ran with.
    pub seed: u64,
}

fn apply(base: &SimulationInput, scenario: &Scenario, seed: u64) -> SimulationInput {
    let mut input = base.clone();
    if let Some(v) = scenario.initial_value {
        input.initial_value = v;
    }
    if let Some(h) = scenario.horizon_periods {
        input.horizon_periods = h;
    }
    if let Some(c) = scenario.periodic_contribution {
        input.periodic_contribution = c;
    }
    if scenario.goal.is_some() {
        input.goal = scenario.goal;
    }
    input.seed = Some(seed);
    input
}

fn run_one(input: &SimulationInput, name: &str) -> ScenarioOutcome {
    let mut outcome = ScenarioOutcome {
        name: name.to_string(),
        initial_value: input.initial_value,
        horizon_periods: input.horizon_periods,
        periodic_contribution: input.periodic_contribution,
        total_contributions: input.periodic_contribution * input.horizon_periods as f64,
        median_final: None,
        mean_final: None,
        var_95: None,
        probability_of_loss: None,
        success_rate: None,
        error: None,
    };
    match run_simulation(input) {
        Ok(out) => {
            let t = &out.result.terminal;
            outcome.median_final = Some(t.median);
            outcome.mean_final = Some(t.mean);
            outcome.var_95 = Some(t.var_95);
            outcome.probability_of_loss = Some(t.probability_of_loss);
            outcome.success_rate = t.goal.as_ref().map(|g| g.success_rate);
        }
        Err(e) => outcome.error = Some(e.to_string()),
    }
    outcome
}

fn pick_best<F>(rows: &[ScenarioOutcome], key: F) -> Option<String>
where
    F: Fn(&ScenarioOutcome) -> Option<f64>,
{
    rows.iter()
        .filter_map(|r| key(r).map(|k| (r, k)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(r, _)| r.name.clone())
}

/// Run the base simulation once per scenario with the scenario's overrides.
///
/// Every scenario shares one seed, so differences between rows come from the overrides
/// rather than from sampling noise.
pub fn compare_scenarios(
    input: &ScenarioComparisonInput,
) -> MptResult<ComputationOutput<ScenarioComparison>> {
    let start = Instant::now();
    validate(input)?;
    let mut warnings = Vec::new();

    let seed = match input.base.seed {
        Some(s) => s,
        None => StdRng::from_entropy().gen(),
    };
    let scenarios: Vec<ScenarioOutcome> = input
        .scenarios
        .iter()
        .map(|s| run_one(&apply(&input.base, s, seed), &s.name))
        .collect();

    let failed = scenarios.iter().filter(|s| s.error.is_some()).count();
    if failed > 0 {
        warnings.push(format!("{failed} of {} scenarios failed", scenarios.len()));
    }

    let output = ScenarioComparison {
        best_median: pick_best(&scenarios, |s| s.median_final),
        lowest_loss_probability: pick_best(&scenarios, |s| s.probability_of_loss.map(|p| -p)),
        scenarios,
        seed,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Monte Carlo projection per scenario with common random numbers",
        &serde_json::json!({
            "n_trials": input.base.n_trials,
            "model": input.base.model,
            "seed": seed,
            "scenarios": input.scenarios.len(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

fn validate(input: &ScenarioComparisonInput) -> MptResult<()> {
    if input.scenarios.is_empty() {
        return Err(MptError::InvalidInput {
            field: "scenarios".into(),
            reason: "At least one scenario is required".into(),
        });
    }
    for (i, s) in input.scenarios.iter().enumerate() {
        if s.name.trim().is_empty() {
            return Err(MptError::InvalidInput {
                field: format!("scenarios[{i}].name"),
                reason: "Scenario name cannot be empty".into(),
            });
        }
        if input.scenarios[..i].iter().any(|p| p.name == s.name) {
            return Err(MptError::InvalidInput {
                field: format!("scenarios[{i}].name"),
                reason: format!("Duplicate scenario name '{}'", s.name),
            });
        }
    }
    Ok(())
}
