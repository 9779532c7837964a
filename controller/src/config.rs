use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use toml;

use prelude::*;
use nlp::{AlmSettings, Options};
use crate::MpcError;

/// Conventional file name, looked up relative to the working directory.
pub static CONFIG_FILE: &'static str = "controller.toml";

/// Tunables of the path following controller. Missing keys in a config file
/// fall back to the values of `MpcConfig::default()`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct MpcConfig {
    /// Horizon length in steps.
    pub N: usize,
    /// Time between horizon steps in seconds.
    pub dt: float,
    pub lf: float,
    /// Actuation latency in seconds.
    pub latency: float,
    pub steering_max: float,
    pub throttle_max: float,
    /// Magnitude used as "no bound" on the state blocks.
    pub unbounded: float,
    pub max_polynomial_order: usize,
    pub failure_policy: FailurePolicy,
    pub weights: CostWeights,
    pub solver: Options,
    pub alm: AlmSettings,
}

/// Weights of the quadratic tracking and comfort terms.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    pub cte: float,
    pub epsi: float,
    pub v: float,
    pub steering: float,
    pub steering_quartic: float,
    pub throttle: float,
    pub steering_rate: float,
    pub throttle_rate: float,
    /// Speed the `v` term pulls towards, in m/s.
    pub v_target: float,
}

/// What to issue after a cycle where the solver did not converge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Issue the best iterate and remember it.
    BestEffort,
    /// Issue the previous command again and keep it.
    HoldPrevious,
}

impl Default for FailurePolicy {
    fn default() -> FailurePolicy {
        FailurePolicy::BestEffort
    }
}

impl Default for CostWeights {
    fn default() -> CostWeights {
        CostWeights {
            cte: 22.0,
            epsi: 20.0,
            v: 2.0,
            steering: 30000.0,
            steering_quartic: 400.0,
            throttle: 1.0,
            steering_rate: 30.0,
            throttle_rate: 1.0,
            // 95 mph
            v_target: 42.4688,
        }
    }
}

impl Default for MpcConfig {
    fn default() -> MpcConfig {
        MpcConfig {
            N: 6,
            dt: 0.275,
            lf: control_model::LF,
            latency: 0.1,
            // 25 degrees
            steering_max: 0.436332,
            throttle_max: 1.0,
            unbounded: 1e19,
            max_polynomial_order: 5,
            failure_policy: FailurePolicy::BestEffort,
            weights: CostWeights::default(),
            solver: Options::default(),
            alm: AlmSettings::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unable to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to deserialise config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl MpcConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<MpcConfig, LoadError> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_owned(),
            source,
        })?;
        MpcConfig::from_str(&config_str)
    }

    pub fn from_str(config_str: &str) -> Result<MpcConfig, LoadError> {
        Ok(toml::from_str(config_str)?)
    }

    /// Checks the values the controller itself relies on. Solver settings are
    /// checked by the solver.
    pub fn validate(&self) -> Result<(), MpcError> {
        if self.N < 2 {
            return Err(MpcError::HorizonTooShort(self.N));
        }
        let positive = [
            ("dt", self.dt),
            ("lf", self.lf),
            ("steering_max", self.steering_max),
            ("throttle_max", self.throttle_max),
            ("unbounded", self.unbounded),
            ("solver.max_cpu_time", self.solver.max_cpu_time),
        ];
        for &(name, value) in positive.iter() {
            if !(value > 0.0 && value.is_finite()) {
                return Err(MpcError::InvalidConfig { name, value });
            }
        }
        if !(self.latency >= 0.0 && self.latency.is_finite()) {
            return Err(MpcError::InvalidConfig {
                name: "latency",
                value: self.latency,
            });
        }
        let w = &self.weights;
        let weights = [
            ("weights.cte", w.cte),
            ("weights.epsi", w.epsi),
            ("weights.v", w.v),
            ("weights.steering", w.steering),
            ("weights.steering_quartic", w.steering_quartic),
            ("weights.throttle", w.throttle),
            ("weights.steering_rate", w.steering_rate),
            ("weights.throttle_rate", w.throttle_rate),
        ];
        for &(name, value) in weights.iter() {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(MpcError::InvalidConfig { name, value });
            }
        }
        if !w.v_target.is_finite() {
            return Err(MpcError::InvalidConfig {
                name: "weights.v_target",
                value: w.v_target,
            });
        }
        Ok(())
    }
}
