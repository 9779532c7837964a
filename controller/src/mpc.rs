use std::path::Path;
use std::time::Instant;

use prelude::*;
use control_model::{Control, KinematicBicycle, ReferencePolynomial, State};
use nlp::{AlmSolver, Bounds, Solver, Status};
use crate::layout::{Block, Layout};
use crate::mpc_problem::PathTracking;
use crate::{FailurePolicy, MpcConfig, MpcError};

/// Command issued before the first solve.
const INITIAL_COMMAND: Control = Control {
    steering: 0.0,
    throttle: 1.0,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Convergence {
    Converged,
    /// The solver stopped early. The command is still its best iterate unless
    /// the failure policy says otherwise.
    BestEffort(Status),
}

impl Convergence {
    pub fn is_converged(self) -> bool {
        self == Convergence::Converged
    }
}

#[derive(Clone, Debug)]
pub struct MpcOutput {
    /// Solved state at the first horizon step.
    pub state: State,
    pub steering: float,
    pub throttle: float,
    /// Planned x positions over the horizon.
    pub x_vals: Vec<float>,
    /// Planned y positions over the horizon.
    pub y_vals: Vec<float>,
    pub cost: float,
    pub convergence: Convergence,
}

/// Receding horizon path follower.
///
/// Each call to `solve` compensates the actuation latency with the command
/// issued on the previous call, optimises a fresh horizon from a zero initial
/// guess and issues the first step.
pub struct Mpc<S: Solver = AlmSolver> {
    config: MpcConfig,
    layout: Layout,
    model: KinematicBicycle,
    solver: S,
    last_command: Control,
}

impl Mpc<AlmSolver> {
    pub fn new(config: MpcConfig) -> Result<Mpc<AlmSolver>, MpcError> {
        config.alm.validate()?;
        let solver = AlmSolver::new(config.alm.clone());
        Mpc::with_solver(config, solver)
    }

    pub fn from_config_file<P: AsRef<Path>>(path: P) -> Result<Mpc<AlmSolver>, MpcError> {
        Mpc::new(MpcConfig::load(path)?)
    }
}

impl<S: Solver> Mpc<S> {
    pub fn with_solver(config: MpcConfig, solver: S) -> Result<Mpc<S>, MpcError> {
        config.validate()?;
        let layout = Layout::new(config.N)?;
        let model = KinematicBicycle::new(config.lf);
        debug!(
            "mpc: {} model, N = {}, {} vars, {} constraints",
            KinematicBicycle::name(),
            config.N,
            layout.num_vars(),
            layout.num_constraints()
        );

        Ok(Mpc {
            config,
            layout,
            model,
            solver,
            last_command: INITIAL_COMMAND,
        })
    }

    pub fn with_last_command(mut self, command: Control) -> Mpc<S> {
        self.last_command = command;
        self
    }

    pub fn config(&self) -> &MpcConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn last_command(&self) -> Control {
        self.last_command
    }

    pub fn set_last_command(&mut self, command: Control) {
        self.last_command = command;
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn solve(
        &mut self,
        state: &State,
        path: &ReferencePolynomial,
    ) -> Result<MpcOutput, MpcError> {
        let _guard = flame::start_guard("mpc step");
        let step_start = Instant::now();

        self.check_inputs(state, path)?;

        let x0 = flame::span_of("latency projection", || {
            self.model
                .project_latency(self.config.latency, state, &self.last_command)
        });
        debug!("projected state {:?} with {:?}", x0, self.last_command);

        let guard = flame::start_guard("mpc setup");
        let mut initial = Vector::zeros(self.layout.num_vars());
        self.layout.write_state(initial.as_mut_slice(), 0, &x0);
        let bounds = self.bounds(&x0);
        guard.end();

        let problem = PathTracking {
            layout: self.layout,
            dt: self.config.dt,
            weights: &self.config.weights,
            model: &self.model,
            path,
        };
        let guard = flame::start_guard("mpc solve");
        let solution = self
            .solver
            .solve(&problem, &initial, &bounds, &self.config.solver);
        guard.end();
        let solution = solution?;

        let convergence = if solution.status.is_success() {
            Convergence::Converged
        } else {
            warn!(
                "mpc did not converge ({:?}), cost {}",
                solution.status, solution.cost
            );
            Convergence::BestEffort(solution.status)
        };

        let guard = flame::start_guard("mpc extract");
        let view = self.layout.view(solution.x.as_slice());
        let solved = Control::new(
            self.within_bounds("steering", view.steering()[0], self.config.steering_max),
            self.within_bounds("throttle", view.throttle()[0], self.config.throttle_max),
        );
        let command = match (convergence, self.config.failure_policy) {
            (Convergence::BestEffort(_), FailurePolicy::HoldPrevious) => self.last_command,
            _ => solved,
        };
        self.last_command = command;

        let output = MpcOutput {
            state: view.state(0),
            steering: command.steering,
            throttle: command.throttle,
            x_vals: view.x().to_vec(),
            y_vals: view.y().to_vec(),
            cost: solution.cost,
            convergence,
        };
        guard.end();

        info!(
            "mpc step {:.1} ms, steering {:.4} throttle {:.4} cost {:.3}",
            step_start.elapsed().as_secs_f64() * 1e3,
            output.steering,
            output.throttle,
            output.cost
        );

        Ok(output)
    }

    fn check_inputs(&self, state: &State, path: &ReferencePolynomial) -> Result<(), MpcError> {
        if path.is_empty() {
            return Err(MpcError::EmptyPolynomial);
        }
        let max = self.config.max_polynomial_order + 1;
        if path.len() > max {
            return Err(MpcError::PolynomialTooLong {
                found: path.len(),
                max,
            });
        }
        if let Some(i) = path.coeffs().iter().position(|c| !c.is_finite()) {
            return Err(MpcError::NonFiniteCoefficient(i));
        }
        if let Some(name) = state.first_non_finite() {
            return Err(MpcError::NonFiniteState(name));
        }
        Ok(())
    }

    fn bounds(&self, x0: &State) -> Bounds {
        let l = &self.layout;
        let c = &self.config;
        let mut bounds = Bounds::unbounded(l.num_vars(), l.num_constraints());

        let limits = [
            (Block::Steering, c.steering_max),
            (Block::Throttle, c.throttle_max),
        ];
        let state_limits = Block::STATES.iter().map(|&b| (b, c.unbounded));
        for (block, limit) in state_limits.chain(limits.iter().cloned()) {
            for i in l.range(block) {
                bounds.vars_lower[i] = -limit;
                bounds.vars_upper[i] = limit;
            }
        }

        l.write_state(bounds.constraints_lower.as_mut_slice(), 0, x0);
        l.write_state(bounds.constraints_upper.as_mut_slice(), 0, x0);

        bounds
    }

    fn within_bounds(&self, name: &str, value: float, limit: float) -> float {
        if !value.is_finite() {
            warn!("{} is {}, issuing 0", name, value);
            0.0
        } else if value.abs() > limit {
            warn!("{} {} not within constraints", name, value);
            value.max(-limit).min(limit)
        } else {
            value
        }
    }
}
