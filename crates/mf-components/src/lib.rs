//! mf-components: the component capability contract and built-in components.
//!
//! - [`Component`]: declared variables, `set`/`execute`/`get`, optional
//!   derivatives and execution-unit requests
//! - [`ExecComp`]: scalar equation components
//! - [`PseudoComponent`]: connection expressions and unit conversions
//! - [`BoundaryStore`]: a model's interface variable values
//! - [`linearize`]: local Jacobians with a finite-difference fallback

pub mod boundary;
pub mod error;
pub mod exec;
pub mod fd;
pub mod pseudo;
pub mod store;
pub mod traits;

pub use boundary::BoundaryStore;
pub use error::{ComponentError, ComponentResult};
pub use exec::ExecComp;
pub use fd::{finite_difference_jacobian, jacobian_layout, linearize};
pub use pseudo::PseudoComponent;
pub use store::VarStore;
pub use traits::{Component, ComponentHandle, LinearMode, LocalJacobian, handle, lock};
