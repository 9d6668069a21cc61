//! mf-system: turns a reduced graph into an executable system tree.
//!
//! The stages run in order:
//! - [`assemble_systems`]: sever cycles, order components, build the
//!   Serial/Parallel tree
//! - [`allocate_execution_units`]: split worker units across the tree
//! - [`allocate_vectors`]: lay out the flat `u`/`f`/`du`/`df` buffers
//! - [`allocate_scatter_plans`]: wire every leaf to its slots
//!
//! [`ExecutionPlan`] owns the result, runs it and linearizes it.

pub mod assemble;
pub mod bindings;
pub mod error;
pub mod layout;
pub mod linear;
pub mod plan;
pub mod scatter;
pub mod system;

pub use assemble::{Assembly, AssemblyOptions, ParamLeaf, SeveredEdge, assemble_systems, sever_cycles};
pub use bindings::Bindings;
pub use error::{SystemError, SystemResult};
pub use layout::{Slot, SlotKind, SlotSource, VarLayout, VecSet, allocate_vectors};
pub use linear::LinearOperator;
pub use plan::{ExecutionPlan, ParamConstraint, build_plan};
pub use scatter::allocate_scatter_plans;
pub use system::{
    InputLink, Leaf, OutputLink, OutputMode, RunContext, ScatterPlan, System, SystemKind,
    allocate_execution_units,
};
