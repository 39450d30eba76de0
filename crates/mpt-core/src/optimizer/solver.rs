//! Shared constrained-minimisation routine used by every solver-backed objective.
//!
//! Inner solver: projected gradient on {sum(w) = 1, lower <= w <= upper} with
//! Barzilai-Borwein step lengths and Armijo backtracking along the projection arc.
//! Side constraints (target return, volatility cap) are handled by an augmented
//! Lagrangian outer loop around the inner solver.

use crate::linalg::{mat_vec_multiply, quadratic_form, vec_dot};
use crate::optimizer::constraints::{project, Bounds};

const ARMIJO_C: f64 = 1e-4;
const MAX_BACKTRACKS: u32 = 60;
const MIN_STEP: f64 = 1e-12;
const MAX_STEP: f64 = 1e12;

/// Side-constraint violation accepted as feasible.
pub(crate) const FEASIBILITY_TOLERANCE: f64 = 1e-8;

/// A smooth function of the weight vector.
pub(crate) trait Objective {
    fn value(&self, w: &[f64]) -> f64;
    fn gradient(&self, w: &[f64]) -> Vec<f64>;
}

#[derive(Debug, Clone)]
pub(crate) struct SolveOutcome {
    pub weights: Vec<f64>,
    pub value: f64,
    pub iterations: u32,
    /// Projected-gradient residual (plus side-constraint violation for the outer loop).
    pub residual: f64,
    pub converged: bool,
}

fn stationarity_residual(w: &[f64], g: &[f64], bounds: &Bounds) -> f64 {
    let trial: Vec<f64> = w.iter().zip(g.iter()).map(|(x, gi)| x - gi).collect();
    project(&trial, bounds)
        .iter()
        .zip(w.iter())
        .map(|(p, x)| (p - x).abs())
        .fold(0.0, f64::max)
}

/// Minimise `objective` over the bounded simplex starting from `start`.
pub(crate) fn projected_gradient(
    objective: &dyn Objective,
    bounds: &Bounds,
    start: &[f64],
    max_iterations: u32,
    tolerance: f64,
) -> SolveOutcome {
    let mut w = project(start, bounds);
    let mut f = objective.value(&w);
    let mut g = objective.gradient(&w);
    let g_norm = g.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
    let mut step = if g_norm > 0.0 { 1.0 / g_norm } else { 1.0 };
    let mut residual = stationarity_residual(&w, &g, bounds);

    for iteration in 0..max_iterations {
        if residual < tolerance {
            return SolveOutcome {
                weights: w,
                value: f,
                iterations: iteration,
                residual,
                converged: true,
            };
        }

        // Backtracking along the projection arc.
        let mut accepted = None;
        let mut alpha = step;
        for _ in 0..MAX_BACKTRACKS {
            let trial: Vec<f64> = w.iter().zip(g.iter()).map(|(x, gi)| x - alpha * gi).collect();
            let candidate = project(&trial, bounds);
            let direction: Vec<f64> = candidate.iter().zip(w.iter()).map(|(c, x)| c - x).collect();
            let decrease = vec_dot(&g, &direction);
            let f_candidate = objective.value(&candidate);
            let noise = 4.0 * f64::EPSILON * f.abs();
            if f_candidate.is_finite() && f_candidate <= f + ARMIJO_C * decrease + noise {
                accepted = Some((candidate, f_candidate));
                break;
            }
            alpha *= 0.5;
            if alpha < MIN_STEP * 1e-6 {
                break;
            }
        }

        let (w_next, f_next) = match accepted {
            Some(found) => found,
            None => {
                return SolveOutcome {
                    weights: w,
                    value: f,
                    iterations: iteration,
                    residual,
                    converged: false,
                }
            }
        };

        let g_next = objective.gradient(&w_next);
        let s: Vec<f64> = w_next.iter().zip(w.iter()).map(|(a, b)| a - b).collect();
        let y: Vec<f64> = g_next.iter().zip(g.iter()).map(|(a, b)| a - b).collect();
        let sy = vec_dot(&s, &y);
        let ss = vec_dot(&s, &s);
        step = if sy > 0.0 && ss > 0.0 {
            (ss / sy).clamp(MIN_STEP, MAX_STEP)
        } else {
            (alpha * 2.0).clamp(MIN_STEP, MAX_STEP)
        };

        w = w_next;
        f = f_next;
        g = g_next;
        residual = stationarity_residual(&w, &g, bounds);
    }

    SolveOutcome {
        converged: residual < tolerance,
        weights: w,
        value: f,
        iterations: max_iterations,
        residual,
    }
}

// ---------------------------------------------------------------------------
// Augmented Lagrangian
// ---------------------------------------------------------------------------

/// Constraint added on top of the bounded simplex.
#[derive(Debug, Clone)]
pub(crate) enum SideConstraint<'a> {
    /// mu'w = target
    ReturnEquals { mu: &'a [f64], target: f64 },
    /// w' Sigma w <= cap
    VarianceAtMost { cov: &'a [Vec<f64>], cap: f64 },
}

impl SideConstraint<'_> {
    fn raw(&self, w: &[f64]) -> f64 {
        match self {
            SideConstraint::ReturnEquals { mu, target } => vec_dot(mu, w) - target,
            SideConstraint::VarianceAtMost { cov, cap } => quadratic_form(w, cov) - cap,
        }
    }

    fn raw_gradient(&self, w: &[f64]) -> Vec<f64> {
        match self {
            SideConstraint::ReturnEquals { mu, .. } => mu.to_vec(),
            SideConstraint::VarianceAtMost { cov, .. } => {
                mat_vec_multiply(cov, w).iter().map(|x| 2.0 * x).collect()
            }
        }
    }

    pub(crate) fn violation(&self, w: &[f64]) -> f64 {
        match self {
            SideConstraint::ReturnEquals { .. } => self.raw(w).abs(),
            SideConstraint::VarianceAtMost { .. } => self.raw(w).max(0.0),
        }
    }
}

struct Lagrangian<'a> {
    base: &'a dyn Objective,
    constraint: &'a SideConstraint<'a>,
    multiplier: f64,
    penalty: f64,
}

impl Objective for Lagrangian<'_> {
    fn value(&self, w: &[f64]) -> f64 {
        let f = self.base.value(w);
        let c = self.constraint.raw(w);
        match self.constraint {
            SideConstraint::ReturnEquals { .. } => {
                f + self.multiplier * c + 0.5 * self.penalty * c * c
            }
            SideConstraint::VarianceAtMost { .. } => {
                let shifted = (c + self.multiplier / self.penalty).max(0.0);
                f + 0.5 * self.penalty * shifted * shifted
                    - self.multiplier * self.multiplier / (2.0 * self.penalty)
            }
        }
    }

    fn gradient(&self, w: &[f64]) -> Vec<f64> {
        let mut g = self.base.gradient(w);
        let c = self.constraint.raw(w);
        let scale = match self.constraint {
            SideConstraint::ReturnEquals { .. } => self.multiplier + self.penalty * c,
            SideConstraint::VarianceAtMost { .. } => {
                (self.multiplier + self.penalty * c).max(0.0)
            }
        };
        if scale != 0.0 {
            for (gi, ci) in g.iter_mut().zip(self.constraint.raw_gradient(w)) {
                *gi += scale * ci;
            }
        }
        g
    }
}

/// Minimise `objective` subject to the bounded simplex and one side constraint.
pub(crate) fn augmented_lagrangian(
    objective: &dyn Objective,
    constraint: &SideConstraint<'_>,
    bounds: &Bounds,
    start: &[f64],
    max_iterations: u32,
    tolerance: f64,
) -> SolveOutcome {
    let mut multiplier = 0.0;
    let mut penalty = 10.0;
    let mut w = project(start, bounds);
    let mut previous_violation = f64::INFINITY;
    let mut total_iterations = 0u32;
    let mut last = None;

    for _outer in 0..50 {
        let lagrangian = Lagrangian {
            base: objective,
            constraint,
            multiplier,
            penalty,
        };
        let inner = projected_gradient(&lagrangian, bounds, &w, max_iterations, tolerance);
        total_iterations = total_iterations.saturating_add(inner.iterations);
        w = inner.weights.clone();

        let violation = constraint.violation(&w);
        let done = inner.converged && violation <= FEASIBILITY_TOLERANCE;
        last = Some(SolveOutcome {
            value: objective.value(&w),
            weights: w.clone(),
            iterations: total_iterations,
            residual: inner.residual.max(violation),
            converged: done,
        });
        if done {
            break;
        }

        let c = constraint.raw(&w);
        multiplier = match constraint {
            SideConstraint::ReturnEquals { .. } => multiplier + penalty * c,
            SideConstraint::VarianceAtMost { .. } => (multiplier + penalty * c).max(0.0),
        };
        if violation > 0.25 * previous_violation {
            penalty = (penalty * 10.0).min(1e10);
        }
        previous_violation = violation;
    }

    last.unwrap_or_else(|| SolveOutcome {
        value: objective.value(&w),
        weights: w,
        iterations: total_iterations,
        residual: f64::INFINITY,
        converged: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::constraints::ConstraintSet;

    struct Quadratic {
        cov: Vec<Vec<f64>>,
    }

    impl Objective for Quadratic {
        fn value(&self, w: &[f64]) -> f64 {
            quadratic_form(w, &self.cov)
        }
        fn gradient(&self, w: &[f64]) -> Vec<f64> {
            mat_vec_multiply(&self.cov, w).iter().map(|x| 2.0 * x).collect()
        }
    }

    fn diag(v: &[f64]) -> Vec<Vec<f64>> {
        let n = v.len();
        (0..n)
            .map(|i| (0..n).map(|j| if i == j { v[i] } else { 0.0 }).collect())
            .collect()
    }

    #[test]
    fn test_diagonal_min_variance_is_inverse_variance() {
        // For a diagonal covariance the minimum-variance weights are 1/var_i normalised.
        let obj = Quadratic {
            cov: diag(&[0.04, 0.01, 0.09]),
        };
        let bounds = ConstraintSet::long_only().resolve(3).unwrap();
        let out = projected_gradient(&obj, &bounds, &[1.0 / 3.0; 3], 2000, 1e-10);
        assert!(out.converged, "residual {}", out.residual);

        let inv = [25.0, 100.0, 1.0 / 0.09];
        let total: f64 = inv.iter().sum();
        for i in 0..3 {
            assert!(
                (out.weights[i] - inv[i] / total).abs() < 1e-7,
                "w[{i}] = {}",
                out.weights[i]
            );
        }
    }

    #[test]
    fn test_bound_active_solution() {
        let obj = Quadratic {
            cov: diag(&[0.04, 0.01, 0.09]),
        };
        let bounds = ConstraintSet::uniform(0.0, 0.5).resolve(3).unwrap();
        let out = projected_gradient(&obj, &bounds, &[1.0 / 3.0; 3], 2000, 1e-10);
        assert!(out.converged);
        assert!((out.weights[1] - 0.5).abs() < 1e-9);
        assert!(bounds.contains(&out.weights, 1e-12));
    }

    #[test]
    fn test_equality_side_constraint() {
        let obj = Quadratic {
            cov: diag(&[0.04, 0.01, 0.09]),
        };
        let mu = [0.08, 0.04, 0.12];
        let bounds = ConstraintSet::long_only().resolve(3).unwrap();
        let constraint = SideConstraint::ReturnEquals {
            mu: &mu,
            target: 0.09,
        };
        let out = augmented_lagrangian(&obj, &constraint, &bounds, &[1.0 / 3.0; 3], 2000, 1e-10);
        assert!(out.converged, "residual {}", out.residual);
        assert!((vec_dot(&mu, &out.weights) - 0.09).abs() < 1e-7);
        assert!((out.weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }
}
