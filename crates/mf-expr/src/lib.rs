//! Connection and constraint expressions.
//!
//! Expressions are small arithmetic formulas over variable paths such as
//! `A.c[2] * 3 + sqrt(b)`. They appear as connection sources, driver
//! constraints/objectives and expression-component equations.

pub mod ast;
pub mod error;
pub mod eval;
pub mod expression;
pub mod lexer;
pub mod parser;

pub use ast::{BinOp, Expr, Func, RelOp};
pub use error::{ExprError, ExprResult};
pub use eval::{Dual, Scope};
pub use expression::{Expression, Relation};
