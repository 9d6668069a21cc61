//! Restarted GMRES over a matrix-free operator.

use nalgebra::{DMatrix, DVector};
use serde::Deserialize;

/// GMRES configuration.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct GmresConfig {
    /// Krylov subspace size between restarts
    pub restart: usize,
    /// Total inner iterations across restarts
    pub max_iterations: usize,
    /// Absolute tolerance on the residual norm
    pub atol: f64,
    /// Tolerance relative to the right-hand side norm
    pub rtol: f64,
}

impl Default for GmresConfig {
    fn default() -> Self {
        Self {
            restart: 20,
            max_iterations: 500,
            atol: 1e-12,
            rtol: 1e-10,
        }
    }
}

/// GMRES result.
#[derive(Debug, Clone)]
pub struct GmresResult {
    pub x: DVector<f64>,
    pub residual_norm: f64,
    pub iterations: usize,
    pub converged: bool,
}

fn givens(a: f64, b: f64) -> (f64, f64) {
    if b == 0.0 {
        (1.0, 0.0)
    } else if b.abs() > a.abs() {
        let t = a / b;
        let s = 1.0 / (1.0 + t * t).sqrt();
        (s * t, s)
    } else {
        let t = b / a;
        let c = 1.0 / (1.0 + t * t).sqrt();
        (c, c * t)
    }
}

/// Solve `A x = b` where `apply` computes `A v`.
pub fn gmres<A>(apply: A, b: &DVector<f64>, config: &GmresConfig) -> GmresResult
where
    A: Fn(&DVector<f64>) -> DVector<f64>,
{
    let n = b.len();
    let mut x = DVector::zeros(n);
    let tol = config.atol.max(config.rtol * b.norm());
    let mut r = b.clone();
    let mut beta = r.norm();
    let mut total = 0;
    if n == 0 || beta <= tol {
        return GmresResult {
            x,
            residual_norm: beta,
            iterations: 0,
            converged: true,
        };
    }
    let m = config.restart.clamp(1, n);

    while total < config.max_iterations {
        let mut basis: Vec<DVector<f64>> = vec![&r / beta];
        let mut h = DMatrix::<f64>::zeros(m + 1, m);
        let mut cs = vec![0.0; m];
        let mut sn = vec![0.0; m];
        let mut g = DVector::<f64>::zeros(m + 1);
        g[0] = beta;
        let mut k = 0;

        for j in 0..m {
            total += 1;
            let mut w = apply(&basis[j]);
            // Modified Gram-Schmidt.
            for (i, v) in basis.iter().enumerate() {
                let hij = w.dot(v);
                h[(i, j)] = hij;
                w.axpy(-hij, v, 1.0);
            }
            let next = w.norm();
            h[(j + 1, j)] = next;

            for i in 0..j {
                let t = cs[i] * h[(i, j)] + sn[i] * h[(i + 1, j)];
                h[(i + 1, j)] = -sn[i] * h[(i, j)] + cs[i] * h[(i + 1, j)];
                h[(i, j)] = t;
            }
            let (c, s) = givens(h[(j, j)], h[(j + 1, j)]);
            cs[j] = c;
            sn[j] = s;
            h[(j, j)] = c * h[(j, j)] + s * h[(j + 1, j)];
            h[(j + 1, j)] = 0.0;
            g[j + 1] = -s * g[j];
            g[j] *= c;
            k = j + 1;

            if g[j + 1].abs() <= tol || next <= f64::EPSILON * beta || total >= config.max_iterations {
                break;
            }
            basis.push(w / next);
        }

        // Back substitution on the triangular k x k block.
        let mut y = DVector::<f64>::zeros(k);
        for i in (0..k).rev() {
            let mut s = g[i];
            for l in i + 1..k {
                s -= h[(i, l)] * y[l];
            }
            y[i] = if h[(i, i)] != 0.0 { s / h[(i, i)] } else { 0.0 };
        }
        for (i, v) in basis.iter().take(k).enumerate() {
            x.axpy(y[i], v, 1.0);
        }

        r = b - apply(&x);
        beta = r.norm();
        if beta <= tol {
            return GmresResult {
                x,
                residual_norm: beta,
                iterations: total,
                converged: true,
            };
        }
    }

    GmresResult {
        x,
        residual_norm: beta,
        iterations: total,
        converged: false,
    }
}
