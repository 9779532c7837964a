// Simplified kinematic bicycle. Heading rate is linear in speed and steering angle,
// with no explicit turning radius term.

use prelude::*;
use crate::{Control, ReferencePolynomial, State};

/// Default distance from the front axle to the centre of gravity. Tuned so that a
/// constant steering angle reproduces the turning radius measured on the vehicle.
pub const LF: float = 2.67;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KinematicBicycle {
    lf: float,
}

impl Default for KinematicBicycle {
    fn default() -> KinematicBicycle {
        KinematicBicycle::new(LF)
    }
}

impl KinematicBicycle {
    pub fn new(lf: float) -> KinematicBicycle {
        KinematicBicycle { lf }
    }

    pub fn name() -> &'static str {
        "kinematic_bicycle"
    }

    pub fn lf(&self) -> float {
        self.lf
    }

    /// Forward Euler step of `dt` along the reference path.
    ///
    /// Cross track and heading errors are recomputed against `path` at the
    /// starting x position, so the result is what the horizon constraints
    /// require the next state to be.
    pub fn step<T: Scalar>(
        &self,
        dt: float,
        x: &State<T>,
        u: &Control<T>,
        path: &ReferencePolynomial,
    ) -> State<T> {
        let f0 = path.evaluate(x.x);
        let psides0 = path.derivative(x.x).atan();
        let psi1 = x.psi + x.v * dt * u.steering / self.lf;

        State {
            x: x.x + x.v * x.psi.cos() * dt,
            y: x.y + x.v * x.psi.sin() * dt,
            psi: psi1,
            v: x.v + u.throttle * dt,
            cte: f0 - x.y + x.v * dt * x.epsi.sin(),
            epsi: psi1 - psides0,
        }
    }

    /// Advances a measured state by the actuation latency while the previously
    /// issued command is still in effect.
    pub fn project_latency(&self, latency: float, x: &State, u: &Control) -> State {
        let px = x.x + x.v * x.psi.cos() * latency;
        let py = x.y + x.v * x.psi.sin() * latency;
        let psi = x.psi + x.v * latency * u.steering / self.lf;
        let v = x.v + u.throttle * latency;
        // Error terms are advanced with the already updated speed
        let cte = x.cte + v * x.epsi.sin() * latency;
        let epsi = x.epsi + v * latency * u.steering / self.lf;

        State::new(px, py, psi, v, cte, epsi)
    }
}
