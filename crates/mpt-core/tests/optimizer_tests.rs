use mpt_core::market::{AssetUniverse, MarketStatistics};
use mpt_core::metrics::{diversification, risk_contributions, volatility};
use mpt_core::optimizer::{
    compare_strategies, optimize, optimize_with, ComparisonInput, ConstraintSet, ObjectiveKind,
    SolverSettings,
};
use mpt_core::MptError;
use pretty_assertions::assert_eq;

// ===========================================================================
// Fixtures
// ===========================================================================

fn three_asset_stats() -> MarketStatistics {
    MarketStatistics::new(
        AssetUniverse::new(["EQUITY", "BONDS", "GOLD"]).unwrap(),
        vec![0.09, 0.04, 0.06],
        vec![
            vec![0.0400, 0.0030, 0.0050],
            vec![0.0030, 0.0064, 0.0010],
            vec![0.0050, 0.0010, 0.0225],
        ],
        0.02,
    )
    .unwrap()
}

fn n_asset_stats(n: usize) -> MarketStatistics {
    let names: Vec<String> = (0..n).map(|i| format!("A{i}")).collect();
    let mu: Vec<f64> = (0..n).map(|i| 0.04 + 0.01 * i as f64).collect();
    let vols: Vec<f64> = (0..n).map(|i| 0.10 + 0.03 * i as f64).collect();
    let cov: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            (0..n)
                .map(|j| {
                    let rho = if i == j { 1.0 } else { 0.25 };
                    rho * vols[i] * vols[j]
                })
                .collect()
        })
        .collect();
    MarketStatistics::new(AssetUniverse::new(names).unwrap(), mu, cov, 0.02).unwrap()
}

fn assert_valid_weights(w: &[f64], lo: f64, hi: f64) {
    let sum: f64 = w.iter().sum();
    assert!((sum - 1.0).abs() < 1e-6, "weights sum to {sum}");
    for (i, x) in w.iter().enumerate() {
        assert!(
            *x >= lo - 1e-9 && *x <= hi + 1e-9,
            "weight {i} = {x} outside [{lo}, {hi}]"
        );
    }
}

// ===========================================================================
// Weight invariants
// ===========================================================================

#[test]
fn test_every_objective_sums_to_one_within_bounds() {
    let stats = three_asset_stats();
    let constraints = ConstraintSet::uniform(0.05, 0.60);
    for objective in ObjectiveKind::all() {
        let w = optimize(&stats, objective, &constraints)
            .unwrap_or_else(|e| panic!("{objective} failed: {e}"));
        assert_valid_weights(&w, 0.05, 0.60);
    }
}

#[test]
fn test_equal_weight_exact() {
    for n in 3..=10 {
        let stats = n_asset_stats(n);
        let w = optimize(&stats, ObjectiveKind::EqualWeight, &ConstraintSet::long_only()).unwrap();
        let expected = vec![1.0 / n as f64; n];
        assert_eq!(w.as_slice(), expected.as_slice());
    }
}

// ===========================================================================
// Minimum volatility: global optimum against a grid oracle
// ===========================================================================

#[test]
fn test_min_volatility_beats_equal_weight_and_grid() {
    let stats = three_asset_stats();
    let w = optimize(&stats, ObjectiveKind::MinVolatility, &ConstraintSet::long_only()).unwrap();
    let vol = volatility(&w, &stats).unwrap();

    let ew = volatility(&[1.0 / 3.0; 3], &stats).unwrap();
    assert!(vol <= ew + 1e-12, "min-vol {vol} above equal weight {ew}");

    let steps = 50;
    let mut grid_best = f64::INFINITY;
    for i in 0..=steps {
        for j in 0..=(steps - i) {
            let a = i as f64 / steps as f64;
            let b = j as f64 / steps as f64;
            let c = 1.0 - a - b;
            let v = volatility(&[a, b, c], &stats).unwrap();
            grid_best = grid_best.min(v);
        }
    }
    assert!(
        vol <= grid_best + 1e-9,
        "min-vol {vol} worse than grid oracle {grid_best}"
    );
}

// ===========================================================================
// Risk parity
// ===========================================================================

#[test]
fn test_risk_parity_equal_contributions() {
    for n in [3, 5, 8] {
        let stats = n_asset_stats(n);
        let w = optimize(&stats, ObjectiveKind::RiskParity, &ConstraintSet::long_only()).unwrap();
        let rc = risk_contributions(&w, &stats).unwrap();
        let target = 1.0 / n as f64;
        for c in &rc {
            assert!(
                (c.fraction - target).abs() < 1e-4,
                "n={n}: {} contributes {} (target {target})",
                c.asset,
                c.fraction
            );
        }
    }
}

// ===========================================================================
// Max Sharpe / Max return
// ===========================================================================

#[test]
fn test_max_sharpe_dominates_other_objectives() {
    let stats = three_asset_stats();
    let constraints = ConstraintSet::long_only();
    let best = optimize_with(
        &stats,
        ObjectiveKind::MaxSharpe,
        &constraints,
        &ObjectiveKind::MaxSharpe.default_settings(),
    )
    .unwrap();
    let best_sharpe = best.result.sharpe_ratio.unwrap();
    for other in [ObjectiveKind::MinVolatility, ObjectiveKind::EqualWeight, ObjectiveKind::RiskParity] {
        let out = optimize_with(&stats, other, &constraints, &other.default_settings()).unwrap();
        let s = out.result.sharpe_ratio.unwrap();
        assert!(best_sharpe >= s - 1e-6, "{other} Sharpe {s} beats max-Sharpe {best_sharpe}");
    }
}

#[test]
fn test_max_return_with_volatility_cap() {
    let stats = three_asset_stats();
    let cap = 0.15;
    let objective = ObjectiveKind::MaxReturn {
        max_volatility: Some(cap),
    };
    let w = optimize(&stats, objective, &ConstraintSet::long_only()).unwrap();
    let vol = volatility(&w, &stats).unwrap();
    assert!(vol <= cap + 1e-6, "volatility {vol} exceeds cap {cap}");
    assert_valid_weights(&w, 0.0, 1.0);
}

#[test]
fn test_max_return_cap_below_min_variance_is_infeasible() {
    let stats = three_asset_stats();
    let objective = ObjectiveKind::MaxReturn {
        max_volatility: Some(0.01),
    };
    let err = optimize(&stats, objective, &ConstraintSet::long_only()).unwrap_err();
    assert!(matches!(err, MptError::InfeasibleConstraints { .. }), "got {err}");
}

// ===========================================================================
// Feasibility boundary
// ===========================================================================

#[test]
fn test_min_weight_boundary_exactly_one_accepted() {
    let stats = n_asset_stats(4);
    let w = optimize(
        &stats,
        ObjectiveKind::MinVolatility,
        &ConstraintSet::uniform(0.25, 1.0),
    )
    .unwrap();
    assert_eq!(w.as_slice().len(), 4);
    for x in w.iter() {
        assert!((x - 0.25).abs() < 1e-9);
    }
}

#[test]
fn test_min_weight_above_boundary_rejected() {
    for n in [4, 5] {
        let stats = n_asset_stats(n);
        for objective in ObjectiveKind::all() {
            let err = optimize(&stats, objective, &ConstraintSet::uniform(0.3, 1.0)).unwrap_err();
            assert!(
                matches!(err, MptError::InfeasibleConstraints { .. }),
                "n={n} {objective}: expected infeasible, got {err}"
            );
        }
    }
}

#[test]
fn test_max_weights_too_small_rejected() {
    let stats = n_asset_stats(3);
    let err = optimize(
        &stats,
        ObjectiveKind::EqualWeight,
        &ConstraintSet::uniform(0.0, 0.3),
    )
    .unwrap_err();
    assert!(matches!(err, MptError::InfeasibleConstraints { .. }));
}

// ===========================================================================
// Singular covariance
// ===========================================================================

#[test]
fn test_duplicate_assets_reported_as_singular() {
    let stats = MarketStatistics::new(
        AssetUniverse::new(["SPY", "IVV", "AGG"]).unwrap(),
        vec![0.08, 0.08, 0.04],
        vec![
            vec![0.04, 0.04, 0.002],
            vec![0.04, 0.04, 0.002],
            vec![0.002, 0.002, 0.0064],
        ],
        0.02,
    )
    .unwrap();
    let err = optimize(&stats, ObjectiveKind::MinVolatility, &ConstraintSet::long_only())
        .unwrap_err();
    match err {
        MptError::SingularCovariance { asset_pair, .. } => {
            assert_eq!(asset_pair, Some(("SPY".to_string(), "IVV".to_string())));
        }
        other => panic!("expected SingularCovariance, got {other}"),
    }
    // Equal weight does not depend on the covariance inverse.
    assert!(optimize(&stats, ObjectiveKind::EqualWeight, &ConstraintSet::long_only()).is_ok());
}

// ===========================================================================
// Strategy comparison
// ===========================================================================

#[test]
fn test_compare_all_strategies() {
    let input = ComparisonInput {
        statistics: three_asset_stats(),
        constraints: ConstraintSet::long_only(),
        objectives: None,
        settings: None,
        parallel: false,
    };
    let out = compare_strategies(&input).unwrap();
    assert_eq!(out.result.strategies.len(), 5);
    assert!(out.result.strategies.iter().all(|s| s.portfolio.is_some()));
    assert_eq!(out.result.lowest_volatility, Some(ObjectiveKind::MinVolatility));
    assert_eq!(out.result.best_sharpe, Some(ObjectiveKind::MaxSharpe));
}

#[test]
fn test_restart_seed_is_deterministic() {
    let stats = n_asset_stats(6);
    let settings = SolverSettings {
        seed: 7,
        ..SolverSettings::default()
    };
    let a = optimize_with(&stats, ObjectiveKind::MaxSharpe, &ConstraintSet::long_only(), &settings)
        .unwrap();
    let b = optimize_with(&stats, ObjectiveKind::MaxSharpe, &ConstraintSet::long_only(), &settings)
        .unwrap();
    assert_eq!(a.result.weights.as_slice(), b.result.weights.as_slice());
}

// ===========================================================================
// Diversification
// ===========================================================================

#[test]
fn test_diversification_score_four_assets() {
    let report = diversification(&[0.25; 4]);
    assert!((report.hhi - 0.25).abs() < 1e-12);
    assert!((report.effective_assets - 4.0).abs() < 1e-12);
    assert!((report.score - 100.0).abs() < 1e-9);

    let concentrated = diversification(&[1.0, 0.0, 0.0, 0.0]);
    assert!(concentrated.score.abs() < 1e-9);
}
