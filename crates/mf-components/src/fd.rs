//! Finite-difference Jacobians and the linearization fallback chain.

use std::collections::BTreeMap;

use mf_core::{Io, VarMeta};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::error::{ComponentError, ComponentResult};
use crate::traits::{Component, LinearMode, LocalJacobian};

/// Relative step used when a component offers no derivatives.
pub const FD_STEP: f64 = 1e-6;

/// Compute Jacobian using forward finite differences.
///
/// For each column j, perturbs x[j] by epsilon and computes (f(x+e) - f(x))/epsilon.
pub fn finite_difference_jacobian<F, E>(
    x: &DVector<f64>,
    mut f: F,
    epsilon: f64,
) -> Result<DMatrix<f64>, E>
where
    F: FnMut(&DVector<f64>) -> Result<DVector<f64>, E>,
{
    let n = x.len();
    let f_x = f(x)?;
    let m = f_x.len();

    let mut jac = DMatrix::zeros(m, n);

    for j in 0..n {
        let mut x_perturbed = x.clone();
        let dx = epsilon * x[j].abs().max(1.0);
        x_perturbed[j] += dx;

        let f_perturbed = f(&x_perturbed)?;
        let df = (f_perturbed - &f_x) / dx;
        jac.set_column(j, &df);
    }

    Ok(jac)
}

/// Numeric columns (inputs then states) and rows (outputs then residuals)
/// of a component's local Jacobian.
pub fn jacobian_layout(vars: &[VarMeta]) -> (Vec<String>, Vec<String>) {
    let pick = |ios: [Io; 2]| {
        ios.iter()
            .flat_map(|io| vars.iter().filter(move |v| v.io == *io && !v.noflat))
            .map(|v| v.name.clone())
            .collect::<Vec<_>>()
    };
    (pick([Io::In, Io::State]), pick([Io::Out, Io::Residual]))
}

fn gather(comp: &dyn Component, names: &[String]) -> ComponentResult<Vec<f64>> {
    let mut out = Vec::new();
    for n in names {
        out.extend_from_slice(comp.get(n)?);
    }
    Ok(out)
}

fn scatter(comp: &mut dyn Component, names: &[String], flat: &[f64]) -> ComponentResult<()> {
    let mut at = 0;
    for n in names {
        let len = comp.get(n)?.len();
        comp.set(n, &flat[at..at + len])?;
        at += len;
    }
    Ok(())
}

/// Local Jacobian at the current point.
///
/// Uses `provide_jacobian` when available, then `apply_linearized` column by
/// column, then forward differences. Values are restored afterwards.
pub fn linearize(comp: &mut dyn Component) -> ComponentResult<LocalJacobian> {
    if let Some(jac) = comp.provide_jacobian()? {
        check_shape(comp, &jac)?;
        return Ok(jac);
    }
    let (inputs, outputs) = jacobian_layout(comp.variables());
    if let Some(jac) = jacobian_from_products(comp, &inputs, &outputs)? {
        return Ok(jac);
    }

    debug!(cols = inputs.len(), rows = outputs.len(), "finite-difference linearization");
    let x0 = DVector::from_vec(gather(comp, &inputs)?);
    let base_out = gather(comp, &outputs)?;
    let matrix: ComponentResult<DMatrix<f64>> = finite_difference_jacobian(
        &x0,
        |x| {
            scatter(&mut *comp, &inputs, x.as_slice())?;
            comp.execute()?;
            Ok(DVector::from_vec(gather(&*comp, &outputs)?))
        },
        FD_STEP,
    );
    scatter(comp, &inputs, x0.as_slice())?;
    scatter(comp, &outputs, &base_out)?;
    Ok(LocalJacobian {
        inputs,
        outputs,
        matrix: matrix?,
    })
}

/// A provided Jacobian must span exactly the variables it names.
fn check_shape(comp: &dyn Component, jac: &LocalJacobian) -> ComponentResult<()> {
    let total = |names: &[String]| -> ComponentResult<usize> {
        names.iter().map(|n| comp.get(n).map(<[f64]>::len)).sum()
    };
    let expected = (total(&jac.outputs)?, total(&jac.inputs)?);
    if jac.matrix.shape() != expected {
        let (r, c) = jac.matrix.shape();
        return Err(ComponentError::InvalidArg {
            what: format!(
                "provided Jacobian is {r}x{c}, its variables need {}x{}",
                expected.0, expected.1
            ),
        });
    }
    Ok(())
}

fn jacobian_from_products(
    comp: &mut dyn Component,
    inputs: &[String],
    outputs: &[String],
) -> ComponentResult<Option<LocalJacobian>> {
    let sizes: Vec<usize> = inputs
        .iter()
        .map(|n| comp.get(n).map(<[f64]>::len))
        .collect::<ComponentResult<_>>()?;
    let out_sizes: Vec<usize> = outputs
        .iter()
        .map(|n| comp.get(n).map(<[f64]>::len))
        .collect::<ComponentResult<_>>()?;
    let ncols: usize = sizes.iter().sum();
    let nrows: usize = out_sizes.iter().sum();
    let mut matrix = DMatrix::zeros(nrows, ncols);

    let mut col = 0;
    for (name, size) in inputs.iter().zip(&sizes) {
        for k in 0..*size {
            let mut seed: BTreeMap<String, Vec<f64>> = inputs
                .iter()
                .zip(&sizes)
                .map(|(n, s)| (n.clone(), vec![0.0; *s]))
                .collect();
            if let Some(v) = seed.get_mut(name) {
                v[k] = 1.0;
            }
            let Some(result) = comp.apply_linearized(LinearMode::Forward, &seed)? else {
                return Ok(None);
            };
            let mut row = 0;
            for (out, osize) in outputs.iter().zip(&out_sizes) {
                if let Some(vals) = result.get(out) {
                    for (r, v) in vals.iter().take(*osize).enumerate() {
                        matrix[(row + r, col)] = *v;
                    }
                }
                row += osize;
            }
            col += 1;
        }
    }
    if ncols == 0 && comp.apply_linearized(LinearMode::Forward, &BTreeMap::new())?.is_none() {
        return Ok(None);
    }
    Ok(Some(LocalJacobian {
        inputs: inputs.to_vec(),
        outputs: outputs.to_vec(),
        matrix,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::VarStore;

    #[test]
    fn jacobian_linear() {
        let x = DVector::from_vec(vec![1.0, 2.0]);
        let jac = finite_difference_jacobian(
            &x,
            |v| Ok::<_, ComponentError>(DVector::from_vec(vec![2.0 * v[0] + v[1], 3.0 * v[1]])),
            1e-7,
        )
        .unwrap();
        assert!((jac[(0, 0)] - 2.0).abs() < 1e-5);
        assert!((jac[(0, 1)] - 1.0).abs() < 1e-5);
        assert!((jac[(1, 0)]).abs() < 1e-5);
        assert!((jac[(1, 1)] - 3.0).abs() < 1e-5);
    }

    /// y = a * b with no derivative support.
    struct Product {
        store: VarStore,
    }

    impl Component for Product {
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
            let y = self.store.scalar("a")? * self.store.scalar("b")?;
            self.store.set_scalar("y", y)
        }
    }

    /// Same map, matrix-free.
    struct LinearProduct(Product);

    impl Component for LinearProduct {
        fn variables(&self) -> &[VarMeta] {
            self.0.variables()
        }
        fn get(&self, name: &str) -> ComponentResult<&[f64]> {
            self.0.get(name)
        }
        fn set(&mut self, name: &str, value: &[f64]) -> ComponentResult<()> {
            self.0.set(name, value)
        }
        fn execute(&mut self) -> ComponentResult<()> {
            self.0.execute()
        }
        fn apply_linearized(
            &mut self,
            mode: LinearMode,
            seed: &BTreeMap<String, Vec<f64>>,
        ) -> ComponentResult<Option<BTreeMap<String, Vec<f64>>>> {
            if mode != LinearMode::Forward {
                return Err(ComponentError::NotSupported { what: "adjoint" });
            }
            let a = self.0.store.scalar("a")?;
            let b = self.0.store.scalar("b")?;
            let dy = seed["a"][0] * b + seed["b"][0] * a;
            Ok(Some(BTreeMap::from([("y".to_string(), vec![dy])])))
        }
    }

    fn product() -> Product {
        let mut p = Product {
            store: VarStore::new(vec![
                VarMeta::input("a"),
                VarMeta::input("b"),
                VarMeta::output("y"),
            ]),
        };
        p.set("a", &[3.0]).unwrap();
        p.set("b", &[4.0]).unwrap();
        p.execute().unwrap();
        p
    }

    #[test]
    fn fallback_to_finite_differences_restores_values() {
        let mut p = product();
        let jac = linearize(&mut p).unwrap();
        assert_eq!(jac.inputs, vec!["a", "b"]);
        assert_eq!(jac.outputs, vec!["y"]);
        assert!((jac.matrix[(0, 0)] - 4.0).abs() < 1e-4);
        assert!((jac.matrix[(0, 1)] - 3.0).abs() < 1e-4);
        assert_eq!(p.get("a").unwrap(), &[3.0]);
        assert_eq!(p.get("y").unwrap(), &[12.0]);
    }

    #[test]
    fn matrix_free_products_assemble_columns() {
        let mut p = LinearProduct(product());
        let jac = linearize(&mut p).unwrap();
        assert_eq!(jac.matrix[(0, 0)], 4.0);
        assert_eq!(jac.matrix[(0, 1)], 3.0);
    }

    #[test]
    fn noflat_variables_are_skipped() {
        let vars = vec![
            VarMeta::input("a"),
            VarMeta::input("label").noflat(),
            VarMeta::state("s"),
            VarMeta::output("y"),
            VarMeta::residual("r"),
        ];
        let (cols, rows) = jacobian_layout(&vars);
        assert_eq!(cols, vec!["a", "s"]);
        assert_eq!(rows, vec!["y", "r"]);
    }
}
