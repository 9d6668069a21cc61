//! mf-solver: drivers and linear algebra over execution plans.
//!
//! - [`FixedPointIterator`]: Gauss-Seidel relaxation
//! - [`NewtonSolver`]: Newton with backtracking line search
//! - [`IterateUntil`]: repeat the workflow until a stop condition holds
//! - [`LinearSolver`]: dense LU or restarted [`gmres`], and total
//!   derivatives in forward or adjoint mode
//! - [`GradientCheck`]: analytic derivatives against finite differences
//! - [`Driver`] and the `Has*` capability traits

pub mod check;
pub mod config;
pub mod driver;
pub mod error;
pub mod fixed_point;
pub mod gmres;
pub mod iterate;
pub mod linear;
pub mod newton;

pub use check::{GradientCheck, GradientEntry, SUSPECT_LIMIT};
pub use config::from_yaml_str;
pub use driver::{
    Constraint, Driver, EQ_TOLERANCE, HasEqConstraints, HasObjectives, HasParameters,
    HasStopConditions, Objective, Parameter, RunOnce, SolveReport, WorkflowInfo, param_constraints,
};
pub use error::{SolverError, SolverResult};
pub use fixed_point::{FixedPointConfig, FixedPointIterator};
pub use gmres::{GmresConfig, GmresResult, gmres};
pub use iterate::{IterateConfig, IterateUntil};
pub use linear::{GradientMode, GradientOutput, LinearSolution, LinearSolver, LinearSolverConfig};
pub use newton::{NewtonConfig, NewtonSolver};
