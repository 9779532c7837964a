extern crate nalgebra;
extern crate prelude;

use prelude::*;

mod kinematic_bicycle;
pub use kinematic_bicycle::{KinematicBicycle, LF};

mod polynomial;
pub use polynomial::ReferencePolynomial;

/// Vehicle state in the local frame at the start of a horizon.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct State<T = float> {
    pub x: T,
    pub y: T,
    pub psi: T,
    pub v: T,
    pub cte: T,
    pub epsi: T,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Control<T = float> {
    pub steering: T,
    pub throttle: T,
}

impl<T> State<T> {
    pub const NAMES: [&'static str; 6] = ["x", "y", "psi", "v", "cte", "epsi"];

    pub fn new(x: T, y: T, psi: T, v: T, cte: T, epsi: T) -> State<T> {
        State {
            x,
            y,
            psi,
            v,
            cte,
            epsi,
        }
    }

    pub fn from_array([x, y, psi, v, cte, epsi]: [T; 6]) -> State<T> {
        State::new(x, y, psi, v, cte, epsi)
    }

    pub fn into_array(self) -> [T; 6] {
        [self.x, self.y, self.psi, self.v, self.cte, self.epsi]
    }
}

impl State<float> {
    /// Name of the first component that is NaN or infinite.
    pub fn first_non_finite(&self) -> Option<&'static str> {
        self.into_array()
            .iter()
            .zip(State::<float>::NAMES.iter())
            .find(|(v, _)| !v.is_finite())
            .map(|(_, &name)| name)
    }

    pub fn map_into<T: Scalar>(self) -> State<T> {
        State::from_array([
            constant(self.x),
            constant(self.y),
            constant(self.psi),
            constant(self.v),
            constant(self.cte),
            constant(self.epsi),
        ])
    }
}

impl<T> Control<T> {
    pub fn new(steering: T, throttle: T) -> Control<T> {
        Control { steering, throttle }
    }
}

impl Control<float> {
    pub fn is_finite(&self) -> bool {
        self.steering.is_finite() && self.throttle.is_finite()
    }
}
