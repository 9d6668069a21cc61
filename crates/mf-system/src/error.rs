//! Error types for system assembly and execution.

use mf_components::ComponentError;
use mf_expr::ExprError;
use mf_graph::GraphError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SystemError {
    #[error("Configuration error: {what}")]
    Configuration { what: String },

    #[error("Execution of '{path}' failed: {source}")]
    Execution {
        path: String,
        #[source]
        source: ComponentError,
    },

    #[error("Internal invariant violated: {what}")]
    Invariant { what: String },

    #[error("Run stopped on request")]
    Stopped,

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error(transparent)]
    Expr(#[from] ExprError),
}

pub type SystemResult<T> = Result<T, SystemError>;

impl SystemError {
    pub(crate) fn config(what: impl Into<String>) -> Self {
        SystemError::Configuration { what: what.into() }
    }

    pub(crate) fn execution(path: &str, source: ComponentError) -> Self {
        SystemError::Execution {
            path: path.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_names_component() {
        let e = SystemError::execution(
            "d1",
            ComponentError::Execution {
                what: "boom".into(),
            },
        );
        assert_eq!(
            e.to_string(),
            "Execution of 'd1' failed: Execution failed: boom"
        );
    }
}
