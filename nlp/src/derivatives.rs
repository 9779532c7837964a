use nalgebra::DMatrix;
use num_dual::Dual64;

use prelude::*;
use crate::Problem;

fn seeded(vars: &[float]) -> Vec<Dual64> {
    vars.iter().map(|&v| Dual64::from(v)).collect()
}

/// Gradient of the objective by one forward dual pass per variable.
pub fn gradient<P: Problem>(problem: &P, vars: &[float], grad: &mut [float]) {
    let mut u = seeded(vars);
    let mut g = vec![Dual64::from(0.0); problem.num_constraints()];
    for i in 0..u.len() {
        u[i].eps = 1.0;
        grad[i] = problem.eval(&u, &mut g).eps;
        u[i].eps = 0.0;
    }
}

/// Forward mode constraint Jacobian with column compression.
///
/// Columns that never share a constraint row are given the same colour and
/// seeded in a single pass. Without a sparsity mask every column has its own
/// colour and this reduces to one pass per variable.
pub struct Jacobian {
    mask: DMatrix<bool>,
    colours: Vec<Vec<usize>>,
}

impl Jacobian {
    pub fn dense(num_constraints: usize, num_vars: usize) -> Jacobian {
        Jacobian {
            mask: DMatrix::from_element(num_constraints, num_vars, true),
            colours: (0..num_vars).map(|j| vec![j]).collect(),
        }
    }

    pub fn coloured(mask: DMatrix<bool>) -> Jacobian {
        let colours = colour_columns(&mask);
        Jacobian { mask, colours }
    }

    pub fn num_colours(&self) -> usize {
        self.colours.len()
    }

    /// Writes J(vars)^T * d into `out`.
    pub fn transpose_product<P: Problem>(
        &self,
        problem: &P,
        vars: &[float],
        d: &[float],
        out: &mut [float],
    ) {
        let mut u = seeded(vars);
        let mut g = vec![Dual64::from(0.0); problem.num_constraints()];
        for colour in &self.colours {
            for &j in colour {
                u[j].eps = 1.0;
            }
            problem.eval(&u, &mut g);
            for &j in colour {
                u[j].eps = 0.0;
                out[j] = self
                    .mask
                    .column(j)
                    .iter()
                    .zip(g.iter().zip(d))
                    .filter(|&(&nonzero, _)| nonzero)
                    .map(|(_, (g_r, &d_r))| g_r.eps * d_r)
                    .sum();
            }
        }
    }
}

/// Greedy distance-1 colouring of the column intersection graph.
fn colour_columns(mask: &DMatrix<bool>) -> Vec<Vec<usize>> {
    let (nrows, ncols) = mask.shape();
    let mut colours: Vec<Vec<usize>> = Vec::new();
    let mut rows_taken: Vec<Vec<bool>> = Vec::new();

    for j in 0..ncols {
        let rows: Vec<usize> = (0..nrows).filter(|&r| mask[(r, j)]).collect();
        let free = rows_taken
            .iter()
            .position(|taken| rows.iter().all(|&r| !taken[r]));
        let c = match free {
            Some(c) => c,
            None => {
                colours.push(Vec::new());
                rows_taken.push(vec![false; nrows]);
                colours.len() - 1
            }
        };
        colours[c].push(j);
        for &r in &rows {
            rows_taken[c][r] = true;
        }
    }

    colours
}
