//! Capability contract every component implements.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use mf_core::{Io, VarMeta};
use nalgebra::DMatrix;

use crate::error::{ComponentError, ComponentResult};

/// Direction of a linearized product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearMode {
    /// `J · v`: seeds keyed by inputs/states, results by outputs/residuals.
    Forward,
    /// `Jᵀ · v`: seeds keyed by outputs/residuals, results by inputs/states.
    Adjoint,
}

/// Dense local Jacobian.
///
/// Rows follow `outputs` and columns follow `inputs`, each variable
/// contributing its flattened size in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalJacobian {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub matrix: DMatrix<f64>,
}

impl LocalJacobian {
    /// Row and column offset of each named variable.
    pub fn offsets(&self, sizes: impl Fn(&str) -> usize) -> (BTreeMap<String, usize>, BTreeMap<String, usize>) {
        let index = |names: &[String]| {
            let mut at = 0;
            names
                .iter()
                .map(|n| {
                    let start = at;
                    at += sizes(n);
                    (n.clone(), start)
                })
                .collect()
        };
        (index(&self.outputs), index(&self.inputs))
    }
}

/// A unit of computation with a fixed table of declared variables.
///
/// Components are driven through `set`/`execute`/`get`. Explicit outputs are
/// recomputed by `execute`; for states, `execute` recomputes the paired
/// residuals (paired by declaration order) at the current state values.
pub trait Component: Send {
    /// Declared variables, fixed at construction.
    fn variables(&self) -> &[VarMeta];

    fn list_inputs(&self) -> Vec<&str> {
        names_with(self.variables(), Io::In)
    }

    fn list_outputs(&self) -> Vec<&str> {
        names_with(self.variables(), Io::Out)
    }

    fn list_states(&self) -> Vec<&str> {
        names_with(self.variables(), Io::State)
    }

    fn list_residuals(&self) -> Vec<&str> {
        names_with(self.variables(), Io::Residual)
    }

    fn meta(&self, name: &str) -> Option<&VarMeta> {
        self.variables().iter().find(|v| v.name == name)
    }

    /// Current flattened value of a declared variable.
    fn get(&self, name: &str) -> ComponentResult<&[f64]>;

    fn set(&mut self, name: &str, value: &[f64]) -> ComponentResult<()>;

    fn execute(&mut self) -> ComponentResult<()>;

    /// Dense local Jacobian at the current point, if the component can
    /// provide one.
    fn provide_jacobian(&mut self) -> ComponentResult<Option<LocalJacobian>> {
        Ok(None)
    }

    /// Matrix-free linearized product. `Ok(None)` when unsupported.
    fn apply_linearized(
        &mut self,
        _mode: LinearMode,
        _seed: &BTreeMap<String, Vec<f64>>,
    ) -> ComponentResult<Option<BTreeMap<String, Vec<f64>>>> {
        Ok(None)
    }

    /// Number of execution units this component would like (at least 1).
    fn requested_execution_units(&self) -> usize {
        1
    }
}

fn names_with(vars: &[VarMeta], io: Io) -> Vec<&str> {
    vars.iter()
        .filter(|v| v.io == io)
        .map(|v| v.name.as_str())
        .collect()
}

/// Shared, lockable component reference held by the model and the system
/// tree.
pub type ComponentHandle = Arc<Mutex<dyn Component>>;

pub fn handle<C: Component + 'static>(comp: C) -> ComponentHandle {
    Arc::new(Mutex::new(comp))
}

/// Lock a handle, mapping poisoning to an error.
pub fn lock(handle: &ComponentHandle) -> ComponentResult<MutexGuard<'_, dyn Component + 'static>> {
    handle.lock().map_err(|_| ComponentError::Poisoned)
}
