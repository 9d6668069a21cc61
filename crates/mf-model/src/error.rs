//! Error type for model assembly and execution.

use mf_components::ComponentError;
use mf_expr::ExprError;
use mf_graph::GraphError;
use mf_solver::SolverError;
use mf_system::SystemError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("configuration error: {what}")]
    Configuration { what: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("component error: {0}")]
    Component(#[from] ComponentError),

    #[error(transparent)]
    System(#[from] SystemError),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error("expression error: {0}")]
    Expr(#[from] ExprError),
}

pub type ModelResult<T> = Result<T, ModelError>;

impl ModelError {
    pub(crate) fn config(what: impl Into<String>) -> Self {
        ModelError::Configuration { what: what.into() }
    }

    /// True for the configuration class of errors at any layer.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ModelError::Configuration { .. }
                | ModelError::System(SystemError::Configuration { .. })
                | ModelError::Solver(SolverError::Configuration { .. })
                | ModelError::Solver(SolverError::System(SystemError::Configuration { .. }))
        )
    }
}
