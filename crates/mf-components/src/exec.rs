//! Components defined by scalar equations.

use std::collections::BTreeSet;

use mf_core::VarMeta;
use mf_expr::{Expression, RelOp, Relation, Scope};
use nalgebra::DMatrix;

use crate::error::{ComponentError, ComponentResult};
use crate::fd::jacobian_layout;
use crate::store::VarStore;
use crate::traits::{Component, LocalJacobian};

#[derive(Debug, Clone)]
struct Equation {
    target: String,
    expr: Expression,
}

/// Scalar component built from equation text.
///
/// Explicit equations `y = f(x, ...)` declare `y` as an output and every
/// other referenced name as an input. Implicit equations pair a state with
/// a residual expression driven to zero by a solver.
///
/// ```
/// use mf_components::{Component, ExecComp};
///
/// let mut c = ExecComp::new(&["y = 2*x + 1"]).unwrap();
/// c.set("x", &[3.0]).unwrap();
/// c.execute().unwrap();
/// assert_eq!(c.get("y").unwrap(), &[7.0]);
/// ```
#[derive(Debug, Clone)]
pub struct ExecComp {
    store: VarStore,
    equations: Vec<Equation>,
    execution_units: usize,
}

impl ExecComp {
    pub fn new(equations: &[&str]) -> ComponentResult<Self> {
        let mut parsed = Vec::with_capacity(equations.len());
        for text in equations {
            let rel = Relation::parse(text)?;
            let target = match (rel.op, rel.lhs.as_var()) {
                (RelOp::Eq, Some(t)) => t.to_string(),
                _ => {
                    return Err(ComponentError::InvalidArg {
                        what: format!("'{text}' is not of the form 'name = expression'"),
                    });
                }
            };
            parsed.push(Equation {
                target,
                expr: rel.rhs,
            });
        }
        let outputs: Vec<&str> = parsed.iter().map(|e| e.target.as_str()).collect();
        let mut inputs = BTreeSet::new();
        for eq in &parsed {
            for r in eq.expr.referenced_varpaths() {
                if outputs.contains(&r.as_str()) {
                    return Err(ComponentError::InvalidArg {
                        what: format!("output '{r}' is also used as an input"),
                    });
                }
                inputs.insert(r);
            }
        }
        let mut metas: Vec<VarMeta> = inputs.into_iter().map(VarMeta::input).collect();
        for o in &outputs {
            if metas.iter().any(|m| m.name == *o) {
                return Err(ComponentError::InvalidArg {
                    what: format!("'{o}' is assigned twice"),
                });
            }
            metas.push(VarMeta::output(*o));
        }
        Ok(Self {
            store: VarStore::new(metas),
            equations: parsed,
            execution_units: 1,
        })
    }

    /// Add a state whose paired residual `residual = expr` is recomputed on
    /// every `execute`. Unknown names in `expr` become inputs.
    pub fn with_residual(mut self, state: &str, residual: &str, expr: &str) -> ComponentResult<Self> {
        let expr = Expression::parse(expr)?;
        self.store.push(VarMeta::state(state))?;
        self.store.push(VarMeta::residual(residual))?;
        for r in expr.referenced_varpaths() {
            if self.store.size(&r).is_none() {
                self.store.push(VarMeta::input(r))?;
            }
        }
        self.equations.push(Equation {
            target: residual.to_string(),
            expr,
        });
        Ok(self)
    }

    pub fn with_units(self, name: &str, units: &str) -> ComponentResult<Self> {
        let mut metas = self.store.metas().to_vec();
        let meta = metas
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| ComponentError::UnknownVariable {
                name: name.to_string(),
            })?;
        meta.units = Some(units.to_string());
        self.rebuild(metas)
    }

    /// Mark an input as one that must be connected.
    pub fn with_required(self, name: &str) -> ComponentResult<Self> {
        let mut metas = self.store.metas().to_vec();
        let meta = metas
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| ComponentError::UnknownVariable {
                name: name.to_string(),
            })?;
        meta.required = true;
        self.rebuild(metas)
    }

    pub fn with_initial(mut self, name: &str, value: f64) -> ComponentResult<Self> {
        self.store.set_scalar(name, value)?;
        Ok(self)
    }

    pub fn with_execution_units(mut self, units: usize) -> Self {
        self.execution_units = units.max(1);
        self
    }

    fn rebuild(mut self, metas: Vec<VarMeta>) -> ComponentResult<Self> {
        let mut store = VarStore::new(metas);
        for m in store.metas().to_vec() {
            store.set(&m.name, self.store.get(&m.name)?)?;
        }
        self.store = store;
        Ok(self)
    }

    fn scope(&self) -> impl Scope + '_ {
        |p: &str| self.store.get(p).ok().and_then(|v| v.first().copied())
    }
}

impl Component for ExecComp {
    fn variables(&self) -> &[VarMeta] {
        self.store.metas()
    }

    fn get(&self, name: &str) -> ComponentResult<&[f64]> {
        self.store.get(name)
    }

    fn set(&mut self, name: &str, value: &[f64]) -> ComponentResult<()> {
        self.store.set(name, value)
    }

    fn execute(&mut self) -> ComponentResult<()> {
        let mut results = Vec::with_capacity(self.equations.len());
        {
            let scope = self.scope();
            for eq in &self.equations {
                let v = eq.expr.evaluate(&scope)?;
                if !v.is_finite() {
                    return Err(ComponentError::Execution {
                        what: format!("'{}' evaluated to {v}", eq.target),
                    });
                }
                results.push(v);
            }
        }
        for (eq, v) in self.equations.iter().zip(results) {
            self.store.set_scalar(&eq.target, v)?;
        }
        Ok(())
    }

    fn provide_jacobian(&mut self) -> ComponentResult<Option<LocalJacobian>> {
        let (inputs, outputs) = jacobian_layout(self.store.metas());
        let mut matrix = DMatrix::zeros(outputs.len(), inputs.len());
        let scope = self.scope();
        for eq in &self.equations {
            let Some(row) = outputs.iter().position(|o| *o == eq.target) else {
                continue;
            };
            let (wrt, dual) = eq.expr.gradient(&scope)?;
            for (name, g) in wrt.iter().zip(&dual.grad) {
                if let Some(col) = inputs.iter().position(|i| i == name) {
                    matrix[(row, col)] += g;
                }
            }
        }
        Ok(Some(LocalJacobian {
            inputs,
            outputs,
            matrix,
        }))
    }

    fn requested_execution_units(&self) -> usize {
        self.execution_units
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_core::Io;

    #[test]
    fn declares_inputs_and_outputs() {
        let c = ExecComp::new(&["y1 = z1**2 + z2 + x1 - 0.2*y2"]).unwrap();
        assert_eq!(c.list_inputs(), vec!["x1", "y2", "z1", "z2"]);
        assert_eq!(c.list_outputs(), vec!["y1"]);
    }

    #[test]
    fn analytic_jacobian() {
        let mut c = ExecComp::new(&["y = x*x + 3*w"]).unwrap();
        c.set("x", &[2.0]).unwrap();
        let jac = c.provide_jacobian().unwrap().unwrap();
        assert_eq!(jac.inputs, vec!["w", "x"]);
        assert_eq!(jac.matrix[(0, 0)], 3.0);
        assert_eq!(jac.matrix[(0, 1)], 4.0);
    }

    #[test]
    fn implicit_equation_computes_residual() {
        let mut c = ExecComp::new(&[])
            .unwrap()
            .with_residual("x", "r", "x*x - a")
            .unwrap()
            .with_initial("a", 4.0)
            .unwrap()
            .with_initial("x", 1.0)
            .unwrap();
        assert_eq!(c.meta("a").map(|m| m.io), Some(Io::In));
        c.execute().unwrap();
        assert_eq!(c.get("r").unwrap(), &[-3.0]);
        assert_eq!(c.get("x").unwrap(), &[1.0]);
        let jac = c.provide_jacobian().unwrap().unwrap();
        assert_eq!(jac.inputs, vec!["a", "x"]);
        assert_eq!(jac.matrix[(0, 0)], -1.0);
        assert_eq!(jac.matrix[(0, 1)], 2.0);
    }

    #[test]
    fn rejects_malformed_equations() {
        assert!(ExecComp::new(&["y + 1 = x"]).is_err());
        assert!(ExecComp::new(&["y < x"]).is_err());
        assert!(ExecComp::new(&["y = x", "z = y"]).is_err());
        assert!(ExecComp::new(&["y = x", "y = 2"]).is_err());
    }

    #[test]
    fn non_finite_result_is_an_execution_error() {
        let mut c = ExecComp::new(&["y = log(x)"]).unwrap();
        assert!(matches!(
            c.execute(),
            Err(ComponentError::Execution { .. })
        ));
    }

    #[test]
    fn metadata_builders_keep_values() {
        let c = ExecComp::new(&["y = x"])
            .unwrap()
            .with_initial("x", 2.5)
            .unwrap()
            .with_units("x", "ft")
            .unwrap()
            .with_required("x")
            .unwrap();
        let m = c.meta("x").unwrap();
        assert_eq!(m.units.as_deref(), Some("ft"));
        assert!(m.required);
        assert_eq!(c.get("x").unwrap(), &[2.5]);
        assert!(c.clone().with_units("q", "m").is_err());
    }
}
