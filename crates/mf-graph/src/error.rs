//! Graph-specific error types.

use mf_core::MfError;
use mf_expr::ExprError;
use thiserror::Error;

/// Errors raised while building, connecting or reducing the variable graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// Invalid connect/disconnect request.
    #[error("Connection error: {what}")]
    Connection { what: String },

    /// Reduction produced a node with more than one producer, overlapping
    /// sub-variable ranges, or a parameter collided with a connection.
    #[error("Graph conflict: {what}")]
    Conflict { what: String },

    #[error("Can't find '{path}'")]
    UnresolvedPath { path: String },

    #[error("Name '{name}' is already in use")]
    DuplicateName { name: String },

    #[error("Bad index in '{path}': {what}")]
    BadIndex { path: String, what: String },

    #[error("Invariant violated: {what}")]
    Invariant { what: String },

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error(transparent)]
    Core(#[from] MfError),
}

pub type GraphResult<T> = Result<T, GraphError>;

impl GraphError {
    pub(crate) fn connection(what: impl Into<String>) -> Self {
        GraphError::Connection { what: what.into() }
    }

    pub(crate) fn conflict(what: impl Into<String>) -> Self {
        GraphError::Conflict { what: what.into() }
    }
}
