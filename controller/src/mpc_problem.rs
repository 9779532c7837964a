use nalgebra::DMatrix;

use prelude::*;
use control_model::{KinematicBicycle, ReferencePolynomial, State};
use nlp::Problem;
use crate::layout::{Block, Layout};
use crate::CostWeights;

// Reference values of the tracking errors
const REF_CTE: float = 0.0;
const REF_EPSI: float = 0.0;

/// Path tracking over one horizon, as an equality constrained NLP.
///
/// Residual rows at step 0 equal the state variables themselves so the
/// caller pins them to the measured state through the constraint bounds.
/// Every later row is the gap between the horizon state and one model step
/// from its predecessor.
pub struct PathTracking<'a> {
    pub layout: Layout,
    pub dt: float,
    pub weights: &'a CostWeights,
    pub model: &'a KinematicBicycle,
    pub path: &'a ReferencePolynomial,
}

impl<'a> PathTracking<'a> {
    fn cost<T: Scalar>(&self, vars: &[T]) -> T {
        let w = self.weights;
        let view = self.layout.view(vars);
        let N = self.layout.horizon();
        let (cte, epsi, v) = (view.cte(), view.epsi(), view.v());
        let (steering, throttle) = (view.steering(), view.throttle());

        let mut cost: T = constant(0.0);

        for t in 0..N {
            cost += (cte[t] - REF_CTE).powi(2) * w.cte;
            cost += (epsi[t] - REF_EPSI).powi(2) * w.epsi;
            cost += (constant::<T>(w.v_target) - v[t]).powi(2) * w.v;
        }

        for t in 0..N - 1 {
            cost += steering[t].powi(2) * w.steering;
            cost += steering[t].powi(4) * w.steering_quartic;
            cost += throttle[t].powi(2) * w.throttle;
        }

        for t in 0..N - 2 {
            cost += (steering[t + 1] - steering[t]).powi(2) * w.steering_rate;
            cost += (throttle[t + 1] - throttle[t]).powi(2) * w.throttle_rate;
        }

        cost
    }

    fn dynamics<T: Scalar>(&self, vars: &[T], constraints: &mut [T]) {
        let view = self.layout.view(vars);

        self.layout.write_state(constraints, 0, &view.state(0));

        for t in 1..self.layout.horizon() {
            let x1 = view.state(t);
            let x0 = view.state(t - 1);
            let u0 = view.control(t - 1);
            let pred = self.model.step(self.dt, &x0, &u0, self.path);

            let residual = State::new(
                x1.x - pred.x,
                x1.y - pred.y,
                x1.psi - pred.psi,
                x1.v - pred.v,
                x1.cte - pred.cte,
                x1.epsi - pred.epsi,
            );
            self.layout.write_state(constraints, t, &residual);
        }
    }
}

impl<'a> Problem for PathTracking<'a> {
    fn num_vars(&self) -> usize {
        self.layout.num_vars()
    }

    fn num_constraints(&self) -> usize {
        self.layout.num_constraints()
    }

    fn eval<T: Scalar>(&self, vars: &[T], constraints: &mut [T]) -> T {
        self.dynamics(vars, constraints);
        self.cost(vars)
    }

    fn constraint_sparsity(&self) -> DMatrix<bool> {
        use self::Block::*;

        let l = &self.layout;
        let mut mask = DMatrix::from_element(l.num_constraints(), l.num_vars(), false);

        for &b in Block::STATES.iter() {
            mask[(l.index(b, 0), l.index(b, 0))] = true;
        }

        for t in 1..l.horizon() {
            let prev = t - 1;
            let depends: [(Block, &[Block]); 6] = [
                (X, &[X, Psi, V]),
                (Y, &[Y, Psi, V]),
                (Psi, &[Psi, V, Steering]),
                (V, &[V, Throttle]),
                (Cte, &[X, Y, V, Epsi]),
                (Epsi, &[X, Psi, V, Steering]),
            ];
            for &(row, cols) in depends.iter() {
                let r = l.index(row, t);
                mask[(r, l.index(row, t))] = true;
                for &col in cols {
                    mask[(r, l.start(col) + prev)] = true;
                }
            }
        }

        mask
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use control_model::Control;
    use num_dual::Dual64;

    struct Fixture {
        weights: CostWeights,
        model: KinematicBicycle,
        path: ReferencePolynomial,
    }

    impl Fixture {
        fn new(coeffs: &[float]) -> Fixture {
            Fixture {
                weights: CostWeights::default(),
                model: KinematicBicycle::default(),
                path: ReferencePolynomial::from_slice(coeffs),
            }
        }

        fn problem(&self, N: usize) -> PathTracking {
            PathTracking {
                layout: Layout::new(N).unwrap(),
                dt: 0.275,
                weights: &self.weights,
                model: &self.model,
                path: &self.path,
            }
        }
    }

    /// Rolls the model forward from `x0` with the given controls into a
    /// decision vector.
    fn rollout(problem: &PathTracking, x0: State, controls: &[Control]) -> Vec<float> {
        let layout = problem.layout;
        let mut vars = vec![0.0; layout.num_vars()];
        let mut x = x0;
        layout.write_state(&mut vars, 0, &x);
        for (t, u) in controls.iter().enumerate() {
            vars[layout.index(Block::Steering, t)] = u.steering;
            vars[layout.index(Block::Throttle, t)] = u.throttle;
            x = problem.model.step(problem.dt, &x, u, problem.path);
            layout.write_state(&mut vars, t + 1, &x);
        }
        vars
    }

    #[test]
    fn zero_is_a_fixed_point() {
        let mut fixture = Fixture::new(&[0.0, 0.0, 0.0, 0.0]);
        fixture.weights.v_target = 0.0;
        let problem = fixture.problem(6);

        let vars = vec![0.0; problem.num_vars()];
        let mut g = vec![1.0; problem.num_constraints()];
        let cost = problem.eval(&vars, &mut g);

        assert_eq!(cost, 0.0);
        assert!(g.iter().all(|&r| r == 0.0));
    }

    #[test]
    fn rollout_has_zero_residuals() {
        let fixture = Fixture::new(&[0.5, -0.1, 0.02, -0.001]);
        let problem = fixture.problem(7);
        let controls: Vec<Control> = (0..6)
            .map(|t| Control::new(0.05 * (t as float) - 0.1, 0.3 - 0.1 * t as float))
            .collect();
        let x0 = State::new(0.0, 0.2, 0.05, 15.0, 0.3, -0.08);
        let vars = rollout(&problem, x0, &controls);

        let mut g = vec![0.0; problem.num_constraints()];
        nlp::constraints(&problem, &vars, &mut g);

        let layout = problem.layout;
        for t in 1..7 {
            for &b in Block::STATES.iter() {
                let r = g[layout.index(b, t)];
                assert!(r.abs() < 1e-12, "{:?} at {} = {}", b, t, r);
            }
        }
        // Step zero rows echo the state
        assert_eq!(
            [0, 1, 2, 3, 4, 5].map(|i| g[layout.index(Block::STATES[i], 0)]),
            x0.into_array()
        );
    }

    #[test]
    fn cost_terms_follow_weights() {
        let fixture = Fixture::new(&[0.0]);
        let problem = fixture.problem(3);
        let layout = problem.layout;
        let w = &fixture.weights;

        let mut vars = vec![0.0; layout.num_vars()];
        vars[layout.index(Block::Cte, 1)] = 0.5;
        vars[layout.index(Block::Epsi, 2)] = -0.25;
        for t in 0..3 {
            vars[layout.index(Block::V, t)] = w.v_target;
        }
        vars[layout.index(Block::Steering, 0)] = 0.1;
        vars[layout.index(Block::Steering, 1)] = 0.3;
        vars[layout.index(Block::Throttle, 1)] = -0.5;

        let expected = w.cte * 0.25
            + w.epsi * 0.0625
            + w.steering * (0.01 + 0.09)
            + w.steering_quartic * (0.0001 + 0.0081)
            + w.throttle * 0.25
            + w.steering_rate * 0.04
            + w.throttle_rate * 0.25;

        let cost = nlp::cost(&problem, &vars);
        assert!((cost - expected).abs() < 1e-9, "{} {}", cost, expected);
    }

    #[test]
    fn mask_covers_jacobian() {
        let fixture = Fixture::new(&[0.3, 0.2, -0.05, 0.004]);
        let problem = fixture.problem(5);
        let mask = problem.constraint_sparsity();
        let vars: Vec<float> = (0..problem.num_vars())
            .map(|i| 0.1 + 0.37 * ((i * 7 % 11) as float) / 11.0)
            .collect();

        let mut u: Vec<Dual64> = vars.iter().map(|&v| Dual64::from(v)).collect();
        let mut g = vec![Dual64::from(0.0); problem.num_constraints()];
        for j in 0..problem.num_vars() {
            u[j].eps = 1.0;
            problem.eval(&u, &mut g);
            u[j].eps = 0.0;
            for (r, g_r) in g.iter().enumerate() {
                if g_r.eps != 0.0 {
                    assert!(mask[(r, j)], "row {} col {} missing from mask", r, j);
                }
            }
        }
    }

    #[test]
    fn sparse_product_matches_dense() {
        let fixture = Fixture::new(&[0.3, 0.2, -0.05, 0.004]);
        let problem = fixture.problem(6);
        let n = problem.num_vars();
        let m = problem.num_constraints();
        let vars: Vec<float> = (0..n).map(|i| ((i as float) * 0.7).sin()).collect();
        let d: Vec<float> = (0..m).map(|i| ((i as float) * 1.3).cos()).collect();

        let coloured = nlp::Jacobian::coloured(problem.constraint_sparsity());
        assert!(coloured.num_colours() < n);

        let mut dense = vec![0.0; n];
        let mut sparse = vec![0.0; n];
        nlp::Jacobian::dense(m, n).transpose_product(&problem, &vars, &d, &mut dense);
        coloured.transpose_product(&problem, &vars, &d, &mut sparse);

        for (a, b) in dense.iter().zip(sparse.iter()) {
            assert!((a - b).abs() < 1e-9, "{} {}", a, b);
        }
    }
}
