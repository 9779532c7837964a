extern crate nalgebra;
extern crate num_dual;

use num_dual::DualNum;

#[allow(non_camel_case_types)]
pub type float = f64;
pub use std::f64::consts::PI;
pub use std::f64::{INFINITY, NEG_INFINITY};

pub type Vector = nalgebra::DVector<float>;

/// Number type the model, cost and constraint equations are written over.
///
/// Plain `float` satisfies it for ordinary evaluation and `num_dual::Dual64`
/// when a derivative is carried along.
pub trait Scalar: DualNum<float> + Copy {}

impl<T> Scalar for T
where
    T: DualNum<float> + Copy,
{
}

/// Lifts a constant into the scalar type.
#[inline(always)]
pub fn constant<T: Scalar>(value: float) -> T {
    From::from(value)
}
