use optimization_engine::constraints::{Constraint, Rectangle};
use optimization_engine::core::ExitStatus;
use optimization_engine::panoc::{PANOCCache, PANOCOptimizer};
use optimization_engine::{Optimizer, SolverError};
use std::time::{Duration, Instant};

use prelude::*;
use crate::derivatives::{self, Jacobian};
use crate::{check_dimensions, Bounds, Error, Options, Problem, Solution, Solver, Status};

/// Settings of the augmented Lagrangian outer loop and the PANOC inner solver.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AlmSettings {
    /// PANOC fixed point residual accepted by the last inner solve.
    pub tolerance: float,
    /// Largest absolute constraint residual accepted as feasible.
    pub constraint_tolerance: float,
    pub lbfgs_memory: usize,
    pub max_outer_iterations: usize,
    pub max_inner_iterations: usize,
    pub initial_inner_tolerance: float,
    pub inner_tolerance_update_factor: float,
    pub initial_penalty: float,
    pub penalty_update_factor: float,
    /// The penalty is never raised above this.
    pub max_penalty: float,
    /// The penalty is kept when the residual shrank by at least this factor.
    pub sufficient_decrease: float,
    /// Bound on the magnitude of each multiplier.
    pub max_multiplier: float,
}

impl Default for AlmSettings {
    fn default() -> AlmSettings {
        AlmSettings {
            tolerance: 1e-6,
            constraint_tolerance: 1e-4,
            lbfgs_memory: 20,
            max_outer_iterations: 30,
            max_inner_iterations: 500,
            initial_inner_tolerance: 1e-4,
            inner_tolerance_update_factor: 0.1,
            initial_penalty: 100.0,
            penalty_update_factor: 5.0,
            max_penalty: 1e5,
            sufficient_decrease: 0.25,
            max_multiplier: 1e8,
        }
    }
}

impl AlmSettings {
    pub fn validate(&self) -> Result<(), Error> {
        let positive = [
            ("tolerance", self.tolerance),
            ("constraint_tolerance", self.constraint_tolerance),
            ("initial_penalty", self.initial_penalty),
            ("max_multiplier", self.max_multiplier),
        ];
        for &(name, value) in positive.iter() {
            if !(value > 0.0 && value.is_finite()) {
                return Err(Error::InvalidSetting { name, value });
            }
        }
        if !(self.initial_inner_tolerance >= self.tolerance) {
            return Err(Error::InvalidSetting {
                name: "initial_inner_tolerance",
                value: self.initial_inner_tolerance,
            });
        }
        let fractions = [
            ("inner_tolerance_update_factor", self.inner_tolerance_update_factor),
            ("sufficient_decrease", self.sufficient_decrease),
        ];
        for &(name, value) in fractions.iter() {
            if !(value > 0.0 && value < 1.0) {
                return Err(Error::InvalidSetting { name, value });
            }
        }
        if !(self.penalty_update_factor > 1.0 && self.penalty_update_factor.is_finite()) {
            return Err(Error::InvalidSetting {
                name: "penalty_update_factor",
                value: self.penalty_update_factor,
            });
        }
        if !(self.max_penalty >= self.initial_penalty && self.max_penalty.is_finite()) {
            return Err(Error::InvalidSetting {
                name: "max_penalty",
                value: self.max_penalty,
            });
        }
        let counts = [
            ("lbfgs_memory", self.lbfgs_memory),
            ("max_outer_iterations", self.max_outer_iterations),
            ("max_inner_iterations", self.max_inner_iterations),
        ];
        for &(name, value) in counts.iter() {
            if value == 0 {
                return Err(Error::InvalidSetting {
                    name,
                    value: value as float,
                });
            }
        }
        Ok(())
    }
}

/// What the last solve did, for logging and inspection.
#[derive(Clone, Debug, PartialEq)]
pub struct AlmReport {
    pub outer_iterations: usize,
    pub inner_iterations: usize,
    /// Penalty in force at the end of the solve.
    pub penalty: float,
    /// Largest absolute constraint residual at the returned point.
    pub violation: float,
    /// One multiplier estimate per constraint row.
    pub multipliers: Vec<float>,
}

/// Solves equality constrained problems with an augmented Lagrangian method,
/// using `optimization_engine`'s PANOC on the variable box for each subproblem.
///
/// Constraint rows must have equal lower and upper bounds. For residuals
/// `h = g(x) - bound` each subproblem minimises
/// `f(x) + lambda.h + penalty/2 |h|^2`, after which the multipliers move by
/// `penalty * h`. The penalty grows only while the residual stalls and never
/// past `max_penalty`.
#[derive(Clone, Debug, Default)]
pub struct AlmSolver {
    settings: AlmSettings,
    report: Option<AlmReport>,
}

impl AlmSolver {
    pub fn new(settings: AlmSettings) -> AlmSolver {
        AlmSolver {
            settings,
            report: None,
        }
    }

    pub fn settings(&self) -> &AlmSettings {
        &self.settings
    }

    pub fn last_report(&self) -> Option<&AlmReport> {
        self.report.as_ref()
    }
}

fn equality_targets(bounds: &Bounds) -> Result<Vec<float>, Error> {
    bounds
        .constraints_lower
        .iter()
        .zip(bounds.constraints_upper.iter())
        .enumerate()
        .map(|(row, (&lower, &upper))| {
            if lower == upper {
                Ok(lower)
            } else {
                Err(Error::InequalityConstraint { row, lower, upper })
            }
        })
        .collect()
}

fn max_duration(options: &Options) -> Result<Duration, Error> {
    let t = options.max_cpu_time;
    if t > 0.0 && t.is_finite() {
        Ok(Duration::from_secs_f64(t))
    } else {
        Err(Error::InvalidSetting {
            name: "max_cpu_time",
            value: t,
        })
    }
}

/// Writes `g(x) - targets` into `residuals` and returns the objective.
fn residuals<P: Problem>(
    problem: &P,
    x: &[float],
    targets: &[float],
    residuals: &mut [float],
) -> float {
    let cost = problem.eval(x, residuals);
    for (r, t) in residuals.iter_mut().zip(targets) {
        *r -= t;
    }
    cost
}

/// Largest magnitude, NaN if any entry is NaN.
fn max_abs(values: &[float]) -> float {
    values.iter().map(|v| v.abs()).fold(0.0, |max: float, v| {
        if v > max || v.is_nan() {
            v
        } else {
            max
        }
    })
}

impl Solver for AlmSolver {
    fn solve<P: Problem>(
        &mut self,
        problem: &P,
        initial: &Vector,
        bounds: &Bounds,
        options: &Options,
    ) -> Result<Solution, Error> {
        let _guard = flame::start_guard("nlp solve");
        let solve_start = Instant::now();
        self.report = None;

        check_dimensions(problem, initial, bounds)?;
        self.settings.validate()?;
        let targets = equality_targets(bounds)?;
        let time_limit = max_duration(options)?;

        let n = problem.num_vars();
        let m = problem.num_constraints();
        let s = &self.settings;

        let jacobian = flame::span_of("jacobian colouring", || {
            if options.sparse() {
                Jacobian::coloured(problem.constraint_sparsity())
            } else {
                Jacobian::dense(m, n)
            }
        });
        debug!(
            "nlp: {} vars, {} constraints, {} jacobian passes",
            n,
            m,
            jacobian.num_colours()
        );

        let set_u = Rectangle::new(
            Some(bounds.vars_lower.as_slice()),
            Some(bounds.vars_upper.as_slice()),
        );
        let mut x = initial.as_slice().to_vec();
        set_u.project(&mut x);

        let mut h = vec![0.0; m];
        residuals(problem, &x, &targets, &mut h);
        let mut violation = max_abs(&h);

        let mut lambda = vec![0.0; m];
        let mut penalty = s.initial_penalty;
        let mut inner_tolerance = s.initial_inner_tolerance;
        let mut inner_iterations = 0;
        let mut outer_iterations = 0;
        let mut status = Status::MaxIterationsExceeded;

        while outer_iterations < s.max_outer_iterations {
            let remaining = match time_limit.checked_sub(solve_start.elapsed()) {
                Some(remaining) if remaining > Duration::from_secs(0) => remaining,
                _ => {
                    status = Status::MaxTimeExceeded;
                    break;
                }
            };
            outer_iterations += 1;

            let mut candidate = x.clone();
            let inner = {
                let _guard = flame::start_guard("panoc");
                let rho = penalty;
                let lambda = &lambda;
                let targets = &targets;
                let jacobian = &jacobian;

                let psi = |u: &[float], cost: &mut float| -> Result<(), SolverError> {
                    let mut h = vec![0.0; m];
                    let f = residuals(problem, u, targets, &mut h);
                    *cost = f + h
                        .iter()
                        .zip(lambda)
                        .map(|(&h, &l)| l * h + 0.5 * rho * h * h)
                        .sum::<float>();
                    if cost.is_finite() {
                        Ok(())
                    } else {
                        Err(SolverError::NotFiniteComputation)
                    }
                };
                let d_psi = |u: &[float], grad: &mut [float]| -> Result<(), SolverError> {
                    let mut h = vec![0.0; m];
                    residuals(problem, u, targets, &mut h);
                    let weights: Vec<float> =
                        h.iter().zip(lambda).map(|(&h, &l)| l + rho * h).collect();
                    let mut jtw = vec![0.0; n];
                    derivatives::gradient(problem, u, grad);
                    jacobian.transpose_product(problem, u, &weights, &mut jtw);
                    for (g, j) in grad.iter_mut().zip(&jtw) {
                        *g += j;
                    }
                    if grad.iter().all(|g| g.is_finite()) {
                        Ok(())
                    } else {
                        Err(SolverError::NotFiniteComputation)
                    }
                };

                let subproblem = optimization_engine::Problem::new(&set_u, d_psi, psi);
                let mut cache = PANOCCache::new(n, inner_tolerance, s.lbfgs_memory);
                let mut panoc = PANOCOptimizer::new(subproblem, &mut cache)
                    .with_max_iter(s.max_inner_iterations)
                    .with_max_duration(remaining);
                panoc.solve(&mut candidate)
            };

            let inner = match inner {
                Ok(inner) => inner,
                Err(e) => {
                    warn!("nlp inner solve stopped: {:?}", e);
                    status = Status::NumericalError;
                    break;
                }
            };
            x = candidate;
            inner_iterations += inner.iterations();

            residuals(problem, &x, &targets, &mut h);
            let previous = violation;
            violation = max_abs(&h);
            if !violation.is_finite() {
                status = Status::NumericalError;
                break;
            }
            for (l, &h) in lambda.iter_mut().zip(&h) {
                *l = (*l + penalty * h).max(-s.max_multiplier).min(s.max_multiplier);
            }
            debug!(
                "alm outer {}: {} inner {:?}, violation {:.3e}, penalty {:.1e}",
                outer_iterations,
                inner.iterations(),
                inner.exit_status(),
                violation,
                penalty
            );

            if inner.exit_status() == ExitStatus::NotConvergedOutOfTime {
                status = Status::MaxTimeExceeded;
                break;
            }
            if violation <= s.constraint_tolerance
                && inner.has_converged()
                && inner_tolerance <= s.tolerance
            {
                status = Status::Success;
                break;
            }
            if violation > s.sufficient_decrease * previous {
                penalty = (penalty * s.penalty_update_factor).min(s.max_penalty);
            }
            inner_tolerance = if violation <= s.constraint_tolerance {
                s.tolerance
            } else {
                (inner_tolerance * s.inner_tolerance_update_factor).max(s.tolerance)
            };
        }

        let cost = crate::cost(problem, &x);
        if options.print_level > 0 {
            info!(
                "nlp {:?} cost {} in {:.1} ms, {} outer {} inner iterations",
                status,
                cost,
                solve_start.elapsed().as_secs_f64() * 1e3,
                outer_iterations,
                inner_iterations
            );
        } else {
            debug!(
                "nlp {:?} cost {}, violation {:.3e}, {} outer {} inner iterations",
                status, cost, violation, outer_iterations, inner_iterations
            );
        }

        self.report = Some(AlmReport {
            outer_iterations,
            inner_iterations,
            penalty,
            violation,
            multipliers: lambda,
        });

        Ok(Solution {
            status,
            x: Vector::from_vec(x),
            cost,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_problems::{Chain, Projection};

    fn options() -> Options {
        Options {
            max_cpu_time: 5.0,
            ..Options::default()
        }
    }

    fn line_bounds() -> Bounds {
        let mut bounds = Bounds::unbounded(2, 1);
        bounds.constraints_lower[0] = 1.0;
        bounds.constraints_upper[0] = 1.0;
        bounds
    }

    #[test]
    fn projects_onto_line() {
        let mut solver = AlmSolver::default();
        let solution = solver
            .solve(&Projection, &Vector::zeros(2), &line_bounds(), &options())
            .unwrap();

        assert_eq!(solution.status, Status::Success);
        assert!((solution.x[0] - 0.0).abs() < 1e-3, "{}", solution.x);
        assert!((solution.x[1] - 1.0).abs() < 1e-3, "{}", solution.x);

        // grad f + lambda * grad g = 0 at (0, 1) gives lambda = 2
        let report = solver.last_report().unwrap();
        assert!(report.violation <= solver.settings().constraint_tolerance);
        assert!((report.multipliers[0] - 2.0).abs() < 1e-2, "{:?}", report);
    }

    #[test]
    fn box_bounds_are_respected() {
        let mut solver = AlmSolver::default();
        let mut bounds = line_bounds();
        bounds.vars_lower[0] = 0.25;
        bounds.vars_upper[0] = 0.5;

        let solution = solver
            .solve(&Projection, &Vector::zeros(2), &bounds, &options())
            .unwrap();

        assert_eq!(solution.status, Status::Success);
        assert!(solution.x[0] >= 0.25 && solution.x[0] <= 0.5);
        assert!((solution.x[0] - 0.25).abs() < 1e-3, "{}", solution.x);
        assert!((solution.x[1] - 0.75).abs() < 1e-3, "{}", solution.x);
    }

    #[test]
    fn stationary_start_is_kept() {
        // Zero is feasible and optimal for the chain once the cos term is removed
        struct Quiet(Chain);
        impl Problem for Quiet {
            fn num_vars(&self) -> usize {
                self.0.num_vars()
            }
            fn num_constraints(&self) -> usize {
                self.0.num_constraints()
            }
            fn eval<T: Scalar>(&self, vars: &[T], constraints: &mut [T]) -> T {
                self.0.eval(vars, constraints) - vars[0].cos()
            }
            fn constraint_sparsity(&self) -> nalgebra::DMatrix<bool> {
                self.0.constraint_sparsity()
            }
        }

        let problem = Quiet(Chain { n: 6 });
        let mut solver = AlmSolver::default();
        let solution = solver
            .solve(&problem, &Vector::zeros(6), &Bounds::unbounded(6, 5), &options())
            .unwrap();

        assert_eq!(solution.status, Status::Success);
        assert!(solution.x.iter().all(|&v| v.abs() < 1e-9));
        assert!(solution.cost.abs() < 1e-12);
    }

    #[test]
    fn nonlinear_chain_becomes_feasible() {
        // Every feasible point costs at least cos(0) = 1, reached only at zero
        let problem = Chain { n: 6 };
        let start = Vector::from_vec(vec![0.5, 0.3, -0.2, 0.1, 0.4, -0.3]);
        let mut solver = AlmSolver::default();
        let solution = solver
            .solve(&problem, &start, &Bounds::unbounded(6, 5), &options())
            .unwrap();

        assert_eq!(solution.status, Status::Success);
        let mut g = vec![0.0; 5];
        crate::constraints(&problem, solution.x.as_slice(), &mut g);
        assert!(max_abs(&g) <= 1e-4, "{:?}", g);
        assert!(solution.cost < 1.0 + 1e-3, "{}", solution.cost);
        assert!(solution.x.amax() < 0.05, "{}", solution.x);
    }

    #[test]
    fn penalty_stays_capped() {
        let settings = AlmSettings {
            initial_penalty: 1.0,
            max_penalty: 2.0,
            ..AlmSettings::default()
        };
        let mut solver = AlmSolver::new(settings);
        let start = Vector::from_vec(vec![2.0, -1.0, 1.5, -2.0, 1.0, 0.5]);
        let solution = solver
            .solve(&Chain { n: 6 }, &start, &Bounds::unbounded(6, 5), &options())
            .unwrap();

        let report = solver.last_report().unwrap();
        assert!(report.penalty <= 2.0, "{:?}", report);
        assert!(report.outer_iterations >= 1);
        // Multiplier updates close the gap the capped penalty leaves open
        assert_eq!(solution.status, Status::Success, "{:?}", report);
        assert!(report.violation <= 1e-4, "{:?}", report);
    }

    #[test]
    fn non_finite_objective_is_a_numerical_error() {
        struct Undefined;
        impl Problem for Undefined {
            fn num_vars(&self) -> usize {
                1
            }
            fn num_constraints(&self) -> usize {
                1
            }
            fn eval<T: Scalar>(&self, vars: &[T], constraints: &mut [T]) -> T {
                constraints[0] = vars[0];
                vars[0].ln()
            }
        }

        let mut solver = AlmSolver::default();
        let solution = solver
            .solve(
                &Undefined,
                &Vector::from_element(1, -1.0),
                &Bounds::unbounded(1, 1),
                &options(),
            )
            .unwrap();

        assert_eq!(solution.status, Status::NumericalError);
        assert_eq!(solution.x[0], -1.0);
    }

    #[test]
    fn rejects_inequality_rows() {
        let mut solver = AlmSolver::default();
        let mut bounds = Bounds::unbounded(2, 1);
        bounds.constraints_upper[0] = 1.0;

        match solver.solve(&Projection, &Vector::zeros(2), &bounds, &options()) {
            Err(Error::InequalityConstraint { row: 0, .. }) => {}
            other => panic!("unexpected result {:?}", other.map(|s| s.status)),
        }
    }

    #[test]
    fn rejects_bad_settings() {
        let cases = [
            (
                AlmSettings {
                    penalty_update_factor: 1.0,
                    ..AlmSettings::default()
                },
                "penalty_update_factor",
            ),
            (
                AlmSettings {
                    max_penalty: 10.0,
                    ..AlmSettings::default()
                },
                "max_penalty",
            ),
            (
                AlmSettings {
                    max_penalty: INFINITY,
                    ..AlmSettings::default()
                },
                "max_penalty",
            ),
            (
                AlmSettings {
                    sufficient_decrease: 1.0,
                    ..AlmSettings::default()
                },
                "sufficient_decrease",
            ),
            (
                AlmSettings {
                    initial_inner_tolerance: 1e-9,
                    ..AlmSettings::default()
                },
                "initial_inner_tolerance",
            ),
        ];

        for (settings, expected) in cases.iter() {
            let mut solver = AlmSolver::new(settings.clone());
            match solver.solve(&Projection, &Vector::zeros(2), &line_bounds(), &options()) {
                Err(Error::InvalidSetting { name, .. }) => assert_eq!(name, *expected),
                other => panic!("unexpected result {:?}", other.map(|s| s.status)),
            }
        }
    }
}
