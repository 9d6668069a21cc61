//! mf-core: shared foundation for the multidisciplinary framework.
//!
//! Contains:
//! - ids (compact arena handles for graph nodes)
//! - numeric (Real, residual norms)
//! - meta (static variable schema declared by components)
//! - units (unit table used by unit-conversion connections)
//! - error (shared error types)

pub mod error;
pub mod ids;
pub mod meta;
pub mod numeric;
pub mod units;

pub use error::{MfError, MfResult};
pub use ids::*;
pub use meta::{Io, VarMeta};
pub use numeric::*;
pub use units::{UnitConversion, conversion};
