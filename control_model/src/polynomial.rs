use nalgebra::DVector;

use prelude::*;

/// Reference path y = f(x) in the vehicle frame, coefficients lowest degree first.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferencePolynomial {
    coeffs: DVector<float>,
}

impl ReferencePolynomial {
    pub fn new(coeffs: DVector<float>) -> ReferencePolynomial {
        ReferencePolynomial { coeffs }
    }

    pub fn from_slice(coeffs: &[float]) -> ReferencePolynomial {
        ReferencePolynomial::new(DVector::from_column_slice(coeffs))
    }

    pub fn coeffs(&self) -> &DVector<float> {
        &self.coeffs
    }

    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn evaluate<T: Scalar>(&self, x: T) -> T {
        self.coeffs
            .as_slice()
            .iter()
            .rev()
            .fold(constant(0.0), |acc: T, &c| acc * x + c)
    }

    /// Evaluates f'(x).
    pub fn derivative<T: Scalar>(&self, x: T) -> T {
        self.coeffs
            .as_slice()
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .fold(constant(0.0), |acc: T, (i, &c)| acc * x + c * i as float)
    }
}
