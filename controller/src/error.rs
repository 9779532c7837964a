use thiserror::Error;

use prelude::*;
use crate::config::LoadError;

#[derive(Debug, Error)]
pub enum MpcError {
    #[error("horizon of {0} steps is too short, at least 2 are needed")]
    HorizonTooShort(usize),

    #[error("invalid config value {name} = {value}")]
    InvalidConfig { name: &'static str, value: float },

    #[error("reference polynomial has no coefficients")]
    EmptyPolynomial,

    #[error("reference polynomial has {found} coefficients, at most {max} are allowed")]
    PolynomialTooLong { found: usize, max: usize },

    #[error("reference polynomial coefficient {0} is not finite")]
    NonFiniteCoefficient(usize),

    #[error("state component {0} is not finite")]
    NonFiniteState(&'static str),

    #[error("solver rejected the problem: {0}")]
    Solver(#[from] nlp::Error),

    #[error(transparent)]
    Config(#[from] LoadError),
}
