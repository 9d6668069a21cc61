//! Run-time side of mapper-synthesized pseudo-components.

use mf_core::VarMeta;
use mf_graph::{PSEUDO_OUTPUT, PseudoKind, PseudoSpec};
use nalgebra::DMatrix;

use crate::error::{ComponentError, ComponentResult};
use crate::store::VarStore;
use crate::traits::{Component, LocalJacobian};

/// Evaluates a connection expression or unit conversion.
///
/// Expressions are applied element-wise over the output; a scalar input is
/// broadcast across every element.
#[derive(Debug, Clone)]
pub struct PseudoComponent {
    store: VarStore,
    kind: PseudoKind,
    slots: Vec<String>,
}

impl PseudoComponent {
    pub fn new(spec: &PseudoSpec) -> Self {
        Self {
            store: VarStore::new(spec.vars.clone()),
            kind: spec.kind.clone(),
            slots: spec.inputs.iter().map(|(slot, _)| slot.clone()).collect(),
        }
    }

    fn out_len(&self) -> usize {
        self.store.size(PSEUDO_OUTPUT).unwrap_or(1)
    }

    fn element(&self, slot: &str, k: usize) -> Option<f64> {
        let v = self.store.get(slot).ok()?;
        if v.len() == 1 { v.first().copied() } else { v.get(k).copied() }
    }

    fn check_broadcast(&self) -> ComponentResult<()> {
        let n = self.out_len();
        for s in &self.slots {
            let len = self.store.size(s).unwrap_or(0);
            if len != 1 && len != n {
                return Err(ComponentError::SizeMismatch {
                    name: s.clone(),
                    expected: n,
                    got: len,
                });
            }
        }
        Ok(())
    }
}

impl Component for PseudoComponent {
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
        self.check_broadcast()?;
        let n = self.out_len();
        let mut out = Vec::with_capacity(n);
        for k in 0..n {
            let v = match &self.kind {
                PseudoKind::Expression(expr) => {
                    let scope = |p: &str| self.element(p, k);
                    expr.evaluate(&scope)?
                }
                PseudoKind::UnitConversion(conv) => {
                    let x = self.element("in0", k).ok_or_else(|| ComponentError::UnknownVariable {
                        name: "in0".into(),
                    })?;
                    conv.apply(x)
                }
            };
            out.push(v);
        }
        self.store.set(PSEUDO_OUTPUT, &out)
    }

    fn provide_jacobian(&mut self) -> ComponentResult<Option<LocalJacobian>> {
        self.check_broadcast()?;
        let n = self.out_len();
        let mut offsets = Vec::with_capacity(self.slots.len());
        let mut ncols = 0;
        for s in &self.slots {
            offsets.push(ncols);
            ncols += self.store.size(s).unwrap_or(0);
        }
        let mut matrix = DMatrix::zeros(n, ncols);
        match &self.kind {
            PseudoKind::Expression(expr) => {
                for k in 0..n {
                    let scope = |p: &str| self.element(p, k);
                    let (wrt, dual) = expr.gradient(&scope)?;
                    for (name, g) in wrt.iter().zip(&dual.grad) {
                        let Some(i) = self.slots.iter().position(|s| s == name) else {
                            continue;
                        };
                        let wide = self.store.size(name).unwrap_or(1) > 1;
                        let col = offsets[i] + if wide { k } else { 0 };
                        matrix[(k, col)] += g;
                    }
                }
            }
            PseudoKind::UnitConversion(conv) => {
                let wide = ncols > 1;
                for k in 0..n {
                    matrix[(k, if wide { k } else { 0 })] = conv.scale;
                }
            }
        }
        Ok(Some(LocalJacobian {
            inputs: self.slots.clone(),
            outputs: vec![PSEUDO_OUTPUT.to_string()],
            matrix,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_core::{VarMeta, conversion};
    use mf_expr::Expression;

    fn spec(kind: PseudoKind, vars: Vec<VarMeta>) -> PseudoSpec {
        let inputs = vars
            .iter()
            .filter(|v| v.name != PSEUDO_OUTPUT)
            .map(|v| (v.name.clone(), format!("A.{}", v.name)))
            .collect();
        PseudoSpec {
            name: "_pseudo_0".into(),
            kind,
            vars,
            inputs,
            dest: "B.y".into(),
        }
    }

    #[test]
    fn expression_with_broadcast() {
        let expr = Expression::parse("in0 * in1 + 1").unwrap();
        let mut p = PseudoComponent::new(&spec(
            PseudoKind::Expression(expr),
            vec![
                VarMeta::input("in0").with_shape([3]),
                VarMeta::input("in1"),
                VarMeta::output(PSEUDO_OUTPUT).with_shape([3]),
            ],
        ));
        p.set("in0", &[1.0, 2.0, 3.0]).unwrap();
        p.set("in1", &[2.0]).unwrap();
        p.execute().unwrap();
        assert_eq!(p.get(PSEUDO_OUTPUT).unwrap(), &[3.0, 5.0, 7.0]);

        let jac = p.provide_jacobian().unwrap().unwrap();
        assert_eq!(jac.matrix.shape(), (3, 4));
        assert_eq!(jac.matrix[(1, 1)], 2.0);
        assert_eq!(jac.matrix[(1, 0)], 0.0);
        assert_eq!(jac.matrix[(2, 3)], 3.0);
    }

    #[test]
    fn unit_conversion_is_affine() {
        let conv = conversion("degC", "K").unwrap();
        let mut p = PseudoComponent::new(&spec(
            PseudoKind::UnitConversion(conv),
            vec![
                VarMeta::input("in0").with_shape([2]).with_units("degC"),
                VarMeta::output(PSEUDO_OUTPUT).with_shape([2]).with_units("K"),
            ],
        ));
        p.set("in0", &[0.0, 100.0]).unwrap();
        p.execute().unwrap();
        let out = p.get(PSEUDO_OUTPUT).unwrap();
        assert!((out[0] - 273.15).abs() < 1e-9);
        assert!((out[1] - 373.15).abs() < 1e-9);
        let jac = p.provide_jacobian().unwrap().unwrap();
        assert!((jac.matrix[(1, 1)] - 1.0).abs() < 1e-12);
        assert_eq!(jac.matrix[(1, 0)], 0.0);
    }

    #[test]
    fn mismatched_widths_rejected() {
        let expr = Expression::parse("in0 + in1").unwrap();
        let mut p = PseudoComponent::new(&spec(
            PseudoKind::Expression(expr),
            vec![
                VarMeta::input("in0").with_shape([2]),
                VarMeta::input("in1").with_shape([3]),
                VarMeta::output(PSEUDO_OUTPUT).with_shape([2]),
            ],
        ));
        assert!(matches!(
            p.execute(),
            Err(ComponentError::SizeMismatch { .. })
        ));
    }
}
