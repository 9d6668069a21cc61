//! mf-model: the user-facing assembly.
//!
//! A [`Model`] owns components, boundary variables, connections and one
//! driver. `run` executes the build pipeline (variable graph, reduction,
//! assembly, execution units, vectors, scatter plans) on first use and then
//! hands the plan to the driver.

pub mod error;
pub mod model;
pub mod options;

pub use error::{ModelError, ModelResult};
pub use model::Model;
pub use options::ModelOptions;

pub use mf_components::{Component, ExecComp};
pub use mf_core::VarMeta;
pub use mf_solver::{
    FixedPointConfig, FixedPointIterator, GradientCheck, GradientMode, HasEqConstraints,
    HasObjectives, HasParameters, HasStopConditions, IterateConfig, IterateUntil, NewtonConfig,
    NewtonSolver, Parameter, RunOnce, SolveReport,
};
