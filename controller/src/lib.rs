#![allow(non_snake_case)]

extern crate control_model;
extern crate flame;
#[macro_use]
extern crate log;
extern crate nalgebra;
extern crate nlp;
extern crate prelude;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate thiserror;
extern crate toml;

mod config;
pub use config::{CostWeights, FailurePolicy, LoadError, MpcConfig, CONFIG_FILE};

mod error;
pub use error::MpcError;

pub mod layout;
pub use layout::{Block, Layout};

mod mpc;
pub use mpc::{Convergence, Mpc, MpcOutput};

mod mpc_problem;
pub use mpc_problem::PathTracking;
