//! Model-wide options.

use mf_solver::LinearSolverConfig;
use serde::Deserialize;

use crate::error::ModelResult;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// Upgrade configuration warnings and solver non-convergence to errors.
    pub strict: bool,
    /// Group independent branches into Parallel systems.
    pub parallel: bool,
    /// Worker threads available to Parallel systems.
    pub workers: usize,
    /// Linear solver used by `calc_gradient`.
    pub linear: LinearSolverConfig,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            strict: false,
            parallel: true,
            workers: 1,
            linear: LinearSolverConfig::default(),
        }
    }
}

impl ModelOptions {
    pub fn from_yaml_str(text: &str) -> ModelResult<Self> {
        Ok(mf_solver::from_yaml_str(text)?)
    }
}
