//! Sparse linear operator of the linearized system.

use mf_components::LinearMode;
use nalgebra::{DMatrix, DVector};

/// Square operator stored as coordinate rows. Duplicate entries add up.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearOperator {
    n: usize,
    rows: Vec<Vec<(usize, f64)>>,
}

impl LinearOperator {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            rows: vec![Vec::new(); n],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut op = Self::new(n);
        for i in 0..n {
            op.add(i, i, 1.0);
        }
        op
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        if let Some(r) = self.rows.get_mut(row) {
            r.push((col, value));
        }
    }

    /// `A x` in forward mode, `Aᵀ x` in adjoint mode.
    pub fn apply(&self, mode: LinearMode, x: &DVector<f64>) -> DVector<f64> {
        let mut y = DVector::zeros(self.n);
        for (i, row) in self.rows.iter().enumerate() {
            for &(j, a) in row {
                match mode {
                    LinearMode::Forward => y[i] += a * x[j],
                    LinearMode::Adjoint => y[j] += a * x[i],
                }
            }
        }
        y
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut m = DMatrix::zeros(self.n, self.n);
        for (i, row) in self.rows.iter().enumerate() {
            for &(j, a) in row {
                m[(i, j)] += a;
            }
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_and_adjoint_agree_with_dense() {
        let mut op = LinearOperator::identity(3);
        op.add(0, 2, -2.0);
        op.add(1, 0, 4.0);
        op.add(1, 0, 1.0);
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let dense = op.to_dense();
        assert_eq!(op.apply(LinearMode::Forward, &x), &dense * &x);
        assert_eq!(op.apply(LinearMode::Adjoint, &x), dense.transpose() * &x);
        assert_eq!(dense[(1, 0)], 5.0);
    }
}
