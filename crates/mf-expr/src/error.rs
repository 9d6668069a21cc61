//! Expression error types.

use thiserror::Error;

/// Errors raised while lexing, parsing or evaluating expressions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("Lex error at column {column} in '{text}': {what}")]
    Lex {
        text: String,
        column: usize,
        what: String,
    },

    #[error("Parse error at column {column} in '{text}': {what}")]
    Parse {
        text: String,
        column: usize,
        what: String,
    },

    #[error("Unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("No value for variable '{name}'")]
    UnknownVariable { name: String },

    #[error("'{text}' is not a relation (expected '=', '<' or '>')")]
    NotARelation { text: String },
}

pub type ExprResult<T> = Result<T, ExprError>;
