//! Boundary between a problem formulation and the nonlinear programming solver.
//!
//! A problem is a single function evaluating the objective together with the
//! equality constraint residuals. It is written over any `Scalar`, so the
//! solver can run it on dual numbers to obtain gradients and Jacobian products
//! without the formulation knowing about it.

extern crate flame;
#[macro_use]
extern crate log;
extern crate nalgebra;
extern crate num_dual;
extern crate optimization_engine;
extern crate prelude;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate thiserror;

use nalgebra::DMatrix;
use thiserror::Error;

use prelude::*;

mod derivatives;
pub use derivatives::Jacobian;

mod alm;
pub use alm::{AlmReport, AlmSettings, AlmSolver};

pub trait Problem {
    fn num_vars(&self) -> usize;

    fn num_constraints(&self) -> usize;

    /// Returns the objective and writes one residual per constraint into `constraints`.
    fn eval<T: Scalar>(&self, vars: &[T], constraints: &mut [T]) -> T;

    /// Boolean mask (constraints x vars) with true wherever a constraint could
    /// depend on a variable.
    fn constraint_sparsity(&self) -> DMatrix<bool> {
        DMatrix::from_element(self.num_constraints(), self.num_vars(), true)
    }
}

/// Variable and constraint bounds. A constraint row with equal lower and upper
/// bounds is an equality.
#[derive(Clone, Debug, PartialEq)]
pub struct Bounds {
    pub vars_lower: Vector,
    pub vars_upper: Vector,
    pub constraints_lower: Vector,
    pub constraints_upper: Vector,
}

impl Bounds {
    pub fn unbounded(num_vars: usize, num_constraints: usize) -> Bounds {
        Bounds {
            vars_lower: Vector::from_element(num_vars, NEG_INFINITY),
            vars_upper: Vector::from_element(num_vars, INFINITY),
            constraints_lower: Vector::zeros(num_constraints),
            constraints_upper: Vector::zeros(num_constraints),
        }
    }
}

/// Options passed with every solve.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Options {
    /// 0 keeps per-solve reports at debug level, anything higher logs them at info.
    pub print_level: u8,
    pub sparse_forward: bool,
    pub sparse_reverse: bool,
    /// Wall clock budget for one solve in seconds.
    pub max_cpu_time: float,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            print_level: 0,
            sparse_forward: true,
            sparse_reverse: true,
            max_cpu_time: 0.5,
        }
    }
}

impl Options {
    /// Either sparse flag enables column-compressed Jacobian evaluation.
    pub fn sparse(&self) -> bool {
        self.sparse_forward || self.sparse_reverse
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Success,
    MaxIterationsExceeded,
    MaxTimeExceeded,
    /// The optimiser stopped on a non-finite evaluation.
    NumericalError,
}

impl Status {
    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

/// Result of a solve. Always carries a point, even when not converged.
#[derive(Clone, Debug)]
pub struct Solution {
    pub status: Status,
    pub x: Vector,
    pub cost: float,
}

pub trait Solver {
    fn solve<P: Problem>(
        &mut self,
        problem: &P,
        initial: &Vector,
        bounds: &Bounds,
        options: &Options,
    ) -> Result<Solution, Error>;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{what} has length {found}, expected {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("constraint {row} has bounds [{lower}, {upper}], only equality constraints are supported")]
    InequalityConstraint { row: usize, lower: float, upper: float },

    #[error("variable {index} has lower bound {lower} above upper bound {upper}")]
    EmptyBounds {
        index: usize,
        lower: float,
        upper: float,
    },

    #[error("invalid solver setting {name}: {value}")]
    InvalidSetting { name: &'static str, value: float },
}

/// Evaluates only the objective with plain floats.
pub fn cost<P: Problem>(problem: &P, vars: &[float]) -> float {
    let mut constraints = vec![0.0; problem.num_constraints()];
    problem.eval(vars, &mut constraints)
}

/// Evaluates only the constraint residuals with plain floats.
pub fn constraints<P: Problem>(problem: &P, vars: &[float], out: &mut [float]) {
    problem.eval(vars, out);
}

pub(crate) fn check_dimensions<P: Problem>(
    problem: &P,
    initial: &Vector,
    bounds: &Bounds,
) -> Result<(), Error> {
    let n = problem.num_vars();
    let m = problem.num_constraints();
    let checks = [
        ("initial guess", n, initial.len()),
        ("variable lower bound", n, bounds.vars_lower.len()),
        ("variable upper bound", n, bounds.vars_upper.len()),
        ("constraint lower bound", m, bounds.constraints_lower.len()),
        ("constraint upper bound", m, bounds.constraints_upper.len()),
    ];
    for &(what, expected, found) in checks.iter() {
        if expected != found {
            return Err(Error::DimensionMismatch {
                what,
                expected,
                found,
            });
        }
    }

    for (index, (&lower, &upper)) in bounds
        .vars_lower
        .iter()
        .zip(bounds.vars_upper.iter())
        .enumerate()
    {
        if !(lower <= upper) {
            return Err(Error::EmptyBounds {
                index,
                lower,
                upper,
            });
        }
    }

    Ok(())
}
