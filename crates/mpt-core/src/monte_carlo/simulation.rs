use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use std::time::Instant;

use crate::error::MptError;
use crate::linalg::{cholesky, mat_vec_multiply, percentile_sorted, sort_ascending};
use crate::market::MarketStatistics;
use crate::metrics::performance;
use crate::types::*;
use crate::MptResult;

/// Upper bound on stored path values (trials x (horizon + 1)).
const MAX_PATH_CELLS: usize = 20_000_000;

/// Confidence levels reported by the goal analysis.
const GOAL_CONFIDENCE_LEVELS: [f64; 4] = [0.50, 0.75, 0.90, 0.95];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How per-step returns are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationModel {
    /// The portfolio is one asset with Gaussian returns N(w'mu, w' Sigma w), scaled per step.
    #[default]
    AggregateNormal,
    /// Joint Gaussian asset returns through the Cholesky factor of the per-step covariance,
    /// rebalanced to the fixed weights every step.
    CorrelatedAssets,
}

/// Input for a forward Monte Carlo projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationInput {
    pub weights: Vec<f64>,
    pub statistics: MarketStatistics,
    #[serde(default = "default_initial_value")]
    pub initial_value: f64,
    /// Number of steps to project.
    #[serde(default = "default_horizon_periods")]
    pub horizon_periods: usize,
    /// Number of independent trials (minimum 100).
    #[serde(default = "default_n_trials")]
    pub n_trials: usize,
    /// Added to the portfolio at the end of every step.
    #[serde(default)]
    pub periodic_contribution: f64,
    /// Steps per year; 1 means annual steps.
    #[serde(default = "default_steps_per_year")]
    pub steps_per_year: u32,
    #[serde(default = "default_percentiles")]
    pub percentiles: Vec<f64>,
    #[serde(default)]
    pub model: SimulationModel,
    /// Optional seed for reproducibility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Target terminal value for the goal analysis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<f64>,
    /// Run trials on worker threads (needs the `parallel` feature).
    #[serde(default)]
    pub parallel: bool,
}

fn default_initial_value() -> f64 {
    10_000.0
}
fn default_horizon_periods() -> usize {
    10
}
fn default_n_trials() -> usize {
    10_000
}
fn default_steps_per_year() -> u32 {
    1
}
fn default_percentiles() -> Vec<f64> {
    vec![10.0, 25.0, 50.0, 75.0, 90.0]
}

/// One percentile band: the cross-section of all trials at every step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PercentileBand {
    pub percentile: f64,
    /// Value at step 0..=horizon.
    pub values: Vec<f64>,
}

/// Probability of reaching a goal and the typical miss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalAnalysis {
    pub goal: f64,
    /// Share of trials finishing at or above the goal.
    pub success_rate: f64,
    /// Mean (goal - final) over the trials that miss; 0 when none miss.
    pub average_shortfall: f64,
    /// Per confidence level, the first step at which that share of trials is at or above the
    /// goal. Only steps `0..=horizon_periods` are searched, so `None` means the goal is not
    /// reached within the simulated horizon; rerun with a longer horizon (or compare horizons
    /// with `compare_scenarios`) to locate it.
    pub steps_needed: Vec<(f64, Option<usize>)>,
}

/// Distribution of terminal values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSummary {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// Share of trials ending below the initial value.
    pub probability_of_loss: f64,
    /// 5th percentile of terminal value.
    pub var_95: f64,
    /// Mean terminal value of the trials at or below `var_95`.
    pub cvar_95: f64,
    pub total_contributions: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<GoalAnalysis>,
}

/// Percentile trajectories plus terminal statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub n_trials: usize,
    pub horizon_periods: usize,
    /// Time in years of each step.
    pub times: Vec<f64>,
    pub bands: Vec<PercentileBand>,
    pub mean_path: Vec<f64>,
    pub portfolio_return: f64,
    pub portfolio_volatility: f64,
    pub terminal: TerminalSummary,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_input(input: &SimulationInput) -> MptResult<()> {
    input.statistics.validate()?;
    if input.weights.len() != input.statistics.len() {
        return Err(MptError::InvalidInput {
            field: "weights".into(),
            reason: format!(
                "Expected {} weights, got {}",
                input.statistics.len(),
                input.weights.len()
            ),
        });
    }
    if !(input.initial_value.is_finite() && input.initial_value > 0.0) {
        return Err(MptError::InvalidInput {
            field: "initial_value".into(),
            reason: "Must be positive and finite".into(),
        });
    }
    if input.horizon_periods == 0 {
        return Err(MptError::InvalidInput {
            field: "horizon_periods".into(),
            reason: "At least one period required".into(),
        });
    }
    if input.n_trials < 100 {
        return Err(MptError::InvalidInput {
            field: "n_trials".into(),
            reason: "Minimum 100 trials required".into(),
        });
    }
    if input.n_trials.saturating_mul(input.horizon_periods + 1) > MAX_PATH_CELLS {
        return Err(MptError::InvalidInput {
            field: "n_trials".into(),
            reason: format!("n_trials x (horizon + 1) must not exceed {MAX_PATH_CELLS}"),
        });
    }
    if input.steps_per_year == 0 {
        return Err(MptError::InvalidInput {
            field: "steps_per_year".into(),
            reason: "Must be at least 1".into(),
        });
    }
    if !input.periodic_contribution.is_finite() {
        return Err(MptError::InvalidInput {
            field: "periodic_contribution".into(),
            reason: "Must be finite".into(),
        });
    }
    if let Some(p) = input
        .percentiles
        .iter()
        .find(|p| !(p.is_finite() && **p >= 0.0 && **p <= 100.0))
    {
        return Err(MptError::InvalidInput {
            field: "percentiles".into(),
            reason: format!("Percentile {p} outside [0, 100]"),
        });
    }
    if let Some(goal) = input.goal {
        if !(goal.is_finite() && goal > 0.0) {
            return Err(MptError::InvalidInput {
                field: "goal".into(),
                reason: "Must be positive and finite".into(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Trial generation
// ---------------------------------------------------------------------------

/// SplitMix64 finaliser, used to derive an independent seed per trial.
fn trial_seed(base: u64, trial: u64) -> u64 {
    let mut z = base ^ trial.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Per-step return generator shared by every trial.
enum StepModel {
    Aggregate { mean: f64, std_dev: f64 },
    Correlated {
        weights: Vec<f64>,
        means: Vec<f64>,
        factor: Vec<Vec<f64>>,
    },
}

impl StepModel {
    fn draw(&self, rng: &mut StdRng, normal: &Normal, scratch: &mut Vec<f64>) -> f64 {
        match self {
            StepModel::Aggregate { mean, std_dev } => mean + std_dev * rng.sample(normal),
            StepModel::Correlated {
                weights,
                means,
                factor,
            } => {
                scratch.clear();
                scratch.extend((0..means.len()).map(|_| rng.sample(normal)));
                let shocks = mat_vec_multiply(factor, scratch);
                weights
                    .iter()
                    .zip(means.iter().zip(shocks.iter()))
                    .map(|(w, (m, s))| w * (m + s))
                    .sum()
            }
        }
    }
}

struct TrialPlan<'a> {
    model: &'a StepModel,
    normal: &'a Normal,
    base_seed: u64,
    horizon: usize,
    initial_value: f64,
    contribution: f64,
}

impl TrialPlan<'_> {
    fn run(&self, trial: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(trial_seed(self.base_seed, trial as u64));
        let mut scratch = Vec::new();
        let mut path = Vec::with_capacity(self.horizon + 1);
        let mut value = self.initial_value;
        path.push(value);
        for _ in 0..self.horizon {
            let r = self.model.draw(&mut rng, self.normal, &mut scratch);
            value = value * (1.0 + r) + self.contribution;
            path.push(value);
        }
        path
    }
}

fn build_step_model(input: &SimulationInput, mean: f64, vol: f64) -> MptResult<StepModel> {
    let p = input.steps_per_year as f64;
    match input.model {
        SimulationModel::AggregateNormal => Ok(StepModel::Aggregate {
            mean: mean / p,
            std_dev: vol / p.sqrt(),
        }),
        SimulationModel::CorrelatedAssets => {
            let stats = &input.statistics;
            let scaled: Vec<Vec<f64>> = stats
                .covariance
                .iter()
                .map(|row| row.iter().map(|c| c / p).collect())
                .collect();
            let factor = cholesky(&scaled).ok_or_else(|| MptError::SingularCovariance {
                condition_number: stats.condition_number(),
                asset_pair: stats.most_correlated_pair().map(|(a, b, _)| (a, b)),
            })?;
            Ok(StepModel::Correlated {
                weights: input.weights.clone(),
                means: stats.mean_returns.iter().map(|m| m / p).collect(),
                factor,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Project portfolio value forward over `horizon_periods` annual steps with the default
/// model, percentiles and trial seed policy.
pub fn simulate(
    weights: &[f64],
    stats: &MarketStatistics,
    initial_value: f64,
    horizon_periods: usize,
    n_trials: usize,
    periodic_contribution: f64,
) -> MptResult<SimulationResult> {
    let input = SimulationInput {
        weights: weights.to_vec(),
        statistics: stats.clone(),
        initial_value,
        horizon_periods,
        n_trials,
        periodic_contribution,
        steps_per_year: default_steps_per_year(),
        percentiles: default_percentiles(),
        model: SimulationModel::default(),
        seed: None,
        goal: None,
        parallel: false,
    };
    Ok(run_simulation(&input)?.result)
}

/// Run a Monte Carlo projection.
///
/// Every trial owns an RNG derived from (seed, trial index), so a seeded run produces the
/// same result sequentially and in parallel. Percentiles are taken independently across
/// trials at each step.
pub fn run_simulation(input: &SimulationInput) -> MptResult<ComputationOutput<SimulationResult>> {
    let start = Instant::now();
    validate_input(input)?;
    let mut warnings = Vec::new();

    let stats = &input.statistics;
    let mean = performance::expected_return(&input.weights, stats)?;
    let vol = performance::volatility(&input.weights, stats)?;

    let weight_sum: f64 = input.weights.iter().sum();
    if (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        warnings.push(format!("Weights sum to {weight_sum:.6}, not 1"));
    }
    warnings.push(
        "Per-step returns are Gaussian; tail percentiles understate fat-tailed losses".into(),
    );
    if input.model == SimulationModel::AggregateNormal {
        warnings.push(
            "Portfolio simulated as a single aggregate asset; correlation changes under stress \
             are not modelled"
                .into(),
        );
    }

    let model = build_step_model(input, mean, vol)?;
    let normal = Normal::new(0.0, 1.0).map_err(|e| MptError::InvalidInput {
        field: "normal".into(),
        reason: e.to_string(),
    })?;
    let base_seed = match input.seed {
        Some(s) => s,
        None => StdRng::from_entropy().gen(),
    };
    let plan = TrialPlan {
        model: &model,
        normal: &normal,
        base_seed,
        horizon: input.horizon_periods,
        initial_value: input.initial_value,
        contribution: input.periodic_contribution,
    };

    #[cfg(feature = "parallel")]
    let paths: Vec<Vec<f64>> = if input.parallel {
        (0..input.n_trials).into_par_iter().map(|t| plan.run(t)).collect()
    } else {
        (0..input.n_trials).map(|t| plan.run(t)).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let paths: Vec<Vec<f64>> = {
        if input.parallel {
            warnings.push("Built without the parallel feature; trials ran sequentially".into());
        }
        (0..input.n_trials).map(|t| plan.run(t)).collect()
    };

    let result = summarise(input, &paths, mean, vol);
    if let Some(goal) = &result.terminal.goal {
        let unreached: Vec<String> = goal
            .steps_needed
            .iter()
            .filter(|(_, step)| step.is_none())
            .map(|(c, _)| format!("{:.0}%", c * 100.0))
            .collect();
        if !unreached.is_empty() {
            warnings.push(format!(
                "Goal not reached within {} periods at {} confidence",
                input.horizon_periods,
                unreached.join(", ")
            ));
        }
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Monte Carlo projection with per-step Gaussian returns and periodic contributions",
        &serde_json::json!({
            "model": input.model,
            "n_trials": input.n_trials,
            "horizon_periods": input.horizon_periods,
            "steps_per_year": input.steps_per_year,
            "periodic_contribution": input.periodic_contribution,
            "seed": input.seed,
            "distribution": "normal",
            "percentile_method": "linear interpolation, cross-section per step",
            "goal_search": "steps 0..=horizon_periods at the (1 - confidence) percentile",
        }),
        warnings,
        elapsed,
        result,
    ))
}

fn summarise(input: &SimulationInput, paths: &[Vec<f64>], mean: f64, vol: f64) -> SimulationResult {
    let horizon = input.horizon_periods;
    let n = paths.len();

    // Sorted cross-section at every step.
    let cross_sections: Vec<Vec<f64>> = (0..=horizon)
        .map(|t| {
            let mut column: Vec<f64> = paths.iter().map(|p| p[t]).collect();
            sort_ascending(&mut column);
            column
        })
        .collect();

    let bands = input
        .percentiles
        .iter()
        .map(|&pct| PercentileBand {
            percentile: pct,
            values: cross_sections
                .iter()
                .map(|col| percentile_sorted(col, pct))
                .collect(),
        })
        .collect();

    let mean_path = cross_sections
        .iter()
        .map(|col| col.iter().sum::<f64>() / n as f64)
        .collect();

    let finals = &cross_sections[horizon];
    let final_mean = finals.iter().sum::<f64>() / n as f64;
    let final_var = finals.iter().map(|v| (v - final_mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    let var_95 = percentile_sorted(finals, 5.0);
    let tail: Vec<f64> = finals.iter().copied().filter(|v| *v <= var_95).collect();
    let cvar_95 = if tail.is_empty() {
        var_95
    } else {
        tail.iter().sum::<f64>() / tail.len() as f64
    };

    let goal = input.goal.map(|goal| {
        let successes = finals.iter().filter(|v| **v >= goal).count();
        let misses: Vec<f64> = finals.iter().filter(|v| **v < goal).map(|v| goal - v).collect();
        let steps_needed = GOAL_CONFIDENCE_LEVELS
            .iter()
            .map(|&c| {
                let step = cross_sections
                    .iter()
                    .position(|col| percentile_sorted(col, (1.0 - c) * 100.0) >= goal);
                (c, step)
            })
            .collect();
        GoalAnalysis {
            goal,
            success_rate: successes as f64 / n as f64,
            average_shortfall: if misses.is_empty() {
                0.0
            } else {
                misses.iter().sum::<f64>() / misses.len() as f64
            },
            steps_needed,
        }
    });

    let terminal = TerminalSummary {
        mean: final_mean,
        median: percentile_sorted(finals, 50.0),
        std_dev: final_var.max(0.0).sqrt(),
        min: finals.first().copied().unwrap_or(f64::NAN),
        max: finals.last().copied().unwrap_or(f64::NAN),
        probability_of_loss: finals.iter().filter(|v| **v < input.initial_value).count() as f64
            / n as f64,
        var_95,
        cvar_95,
        total_contributions: input.periodic_contribution * horizon as f64,
        goal,
    };

    let p = input.steps_per_year as f64;
    SimulationResult {
        n_trials: n,
        horizon_periods: horizon,
        times: (0..=horizon).map(|t| t as f64 / p).collect(),
        bands,
        mean_path,
        portfolio_return: mean,
        portfolio_volatility: vol,
        terminal,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::AssetUniverse;

    fn stats() -> MarketStatistics {
        MarketStatistics::new(
            AssetUniverse::new(["A", "B", "C"]).unwrap(),
            vec![0.08, 0.05, 0.11],
            vec![
                vec![0.04, 0.006, 0.01],
                vec![0.006, 0.01, 0.004],
                vec![0.01, 0.004, 0.09],
            ],
            0.02,
        )
        .unwrap()
    }

    fn input(seed: u64) -> SimulationInput {
        SimulationInput {
            weights: vec![0.4, 0.4, 0.2],
            statistics: stats(),
            initial_value: 100_000.0,
            horizon_periods: 10,
            n_trials: 2_000,
            periodic_contribution: 0.0,
            steps_per_year: 1,
            percentiles: default_percentiles(),
            model: SimulationModel::AggregateNormal,
            seed: Some(seed),
            goal: None,
            parallel: false,
        }
    }

    // --- 1. Step zero is the initial value for every band ---
    #[test]
    fn test_step_zero_is_initial_value() {
        let out = run_simulation(&input(7)).unwrap();
        for band in &out.result.bands {
            assert_eq!(band.values[0], 100_000.0);
            assert_eq!(band.values.len(), 11);
        }
    }

    // --- 2. Bands are ordered at every step ---
    #[test]
    fn test_bands_ordered() {
        let out = run_simulation(&input(7)).unwrap();
        let bands = &out.result.bands;
        for t in 0..=10 {
            for pair in bands.windows(2) {
                assert!(pair[0].values[t] <= pair[1].values[t]);
            }
        }
    }

    // --- 3. Same seed, same answer ---
    #[test]
    fn test_seed_reproducible() {
        let a = run_simulation(&input(11)).unwrap();
        let b = run_simulation(&input(11)).unwrap();
        assert_eq!(a.result.terminal.mean, b.result.terminal.mean);
        assert_eq!(a.result.bands[2].values, b.result.bands[2].values);
    }

    // --- 4. Mean terminal value near the analytic expectation ---
    #[test]
    fn test_mean_close_to_expectation() {
        let mut inp = input(3);
        inp.n_trials = 20_000;
        let out = run_simulation(&inp).unwrap();
        let mu: f64 = 0.4 * 0.08 + 0.4 * 0.05 + 0.2 * 0.11;
        let expected = 100_000.0 * (1.0 + mu).powi(10);
        let rel = (out.result.terminal.mean - expected).abs() / expected;
        assert!(rel < 0.02, "mean {} vs expected {expected}", out.result.terminal.mean);
    }

    // --- 5. Contributions with zero volatility compound deterministically ---
    #[test]
    fn test_zero_volatility_contributions() {
        let flat = MarketStatistics::new(
            AssetUniverse::new(["A", "B", "C"]).unwrap(),
            vec![0.05, 0.05, 0.05],
            vec![vec![0.0; 3]; 3],
            0.0,
        )
        .unwrap();
        let res = simulate(&[0.2, 0.3, 0.5], &flat, 1_000.0, 2, 100, 100.0).unwrap();
        // 1000 * 1.05 + 100 = 1150 ; 1150 * 1.05 + 100 = 1307.5
        assert!((res.terminal.median - 1307.5).abs() < 1e-9);
        assert_eq!(res.terminal.total_contributions, 200.0);
        assert_eq!(res.terminal.probability_of_loss, 0.0);
    }

    // --- 6. Goal analysis ---
    #[test]
    fn test_goal_analysis() {
        let mut inp = input(5);
        inp.goal = Some(150_000.0);
        let out = run_simulation(&inp).unwrap();
        let goal = out.result.terminal.goal.unwrap();
        assert!(goal.success_rate > 0.0 && goal.success_rate < 1.0);
        assert!(goal.average_shortfall > 0.0);
        assert_eq!(goal.steps_needed.len(), 4);
    }

    #[test]
    fn test_goal_beyond_horizon_is_reported() {
        let mut inp = input(5);
        inp.goal = Some(10_000_000.0);
        let out = run_simulation(&inp).unwrap();
        let goal = out.result.terminal.goal.as_ref().unwrap();
        assert!(goal.steps_needed.iter().all(|(_, step)| step.is_none()));
        assert!(
            out.warnings
                .iter()
                .any(|w| w.starts_with("Goal not reached within 10 periods at 50%")),
            "{:?}",
            out.warnings
        );
        assert!(out.assumptions.get("goal_search").is_some());
    }

    // --- 7. Correlated model agrees with aggregate in mean ---
    #[test]
    fn test_correlated_model_mean() {
        let mut inp = input(9);
        inp.n_trials = 20_000;
        inp.model = SimulationModel::CorrelatedAssets;
        let out = run_simulation(&inp).unwrap();
        let mu: f64 = 0.4 * 0.08 + 0.4 * 0.05 + 0.2 * 0.11;
        let expected = 100_000.0 * (1.0 + mu).powi(10);
        let rel = (out.result.terminal.mean - expected).abs() / expected;
        assert!(rel < 0.02);
        assert!(!out.warnings.iter().any(|w| w.contains("aggregate")));
    }

    // --- 8. Validation ---
    #[test]
    fn test_too_few_trials() {
        let mut inp = input(1);
        inp.n_trials = 50;
        assert!(matches!(
            run_simulation(&inp),
            Err(MptError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_gaussian_warning_present() {
        let out = run_simulation(&input(1)).unwrap();
        assert!(out.warnings.iter().any(|w| w.contains("Gaussian")));
    }
}
