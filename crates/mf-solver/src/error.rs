//! Error types for solvers and drivers.

use mf_expr::ExprError;
use mf_system::SystemError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("configuration error: {what}")]
    Configuration { what: String },

    #[error("{what} did not converge after {iterations} iterations (residual {residual_norm:e})")]
    Divergence {
        what: String,
        iterations: usize,
        residual_norm: f64,
    },

    #[error("numeric error: {what}")]
    Numeric { what: String },

    #[error(transparent)]
    System(#[from] SystemError),

    #[error("expression error: {0}")]
    Expr(#[from] ExprError),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type SolverResult<T> = Result<T, SolverError>;

impl SolverError {
    pub(crate) fn config(what: impl Into<String>) -> Self {
        SolverError::Configuration { what: what.into() }
    }
}
