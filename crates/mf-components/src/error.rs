//! Error types for component operations.

use mf_core::MfError;
use mf_expr::ExprError;
use thiserror::Error;

/// Errors raised by components and the helpers that drive them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComponentError {
    #[error("Unknown variable: {name}")]
    UnknownVariable { name: String },

    #[error("Size mismatch for '{name}': expected {expected}, got {got}")]
    SizeMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Execution failed: {what}")]
    Execution { what: String },

    #[error("Not supported: {what}")]
    NotSupported { what: &'static str },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: String },

    #[error("Component lock poisoned")]
    Poisoned,

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error(transparent)]
    Core(#[from] MfError),
}

pub type ComponentResult<T> = Result<T, ComponentError>;
