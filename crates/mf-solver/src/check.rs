//! Comparison of analytic derivatives against finite differences.

use std::fmt;

use nalgebra::DMatrix;

use crate::error::{SolverError, SolverResult};

/// Relative errors above this are reported as suspect.
pub const SUSPECT_LIMIT: f64 = 1e-5;

#[derive(Debug, Clone, PartialEq)]
pub struct GradientEntry {
    pub output: String,
    pub input: String,
    pub calculated: f64,
    pub finite_diff: f64,
    /// Relative error, or the absolute difference when either value is zero.
    pub rel_error: f64,
}

impl GradientEntry {
    pub fn is_suspect(&self) -> bool {
        self.rel_error.is_nan() || self.rel_error.abs() > SUSPECT_LIMIT
    }
}

#[derive(Debug, Clone)]
pub struct GradientCheck {
    pub calculated: DMatrix<f64>,
    pub finite_diff: DMatrix<f64>,
    /// Row-major over `outputs x inputs`.
    pub entries: Vec<GradientEntry>,
}

impl GradientCheck {
    /// Pair up both matrices entry by entry. Rows are labelled by
    /// `outputs`, columns by `inputs`.
    pub fn compare(
        outputs: &[String],
        inputs: &[String],
        calculated: DMatrix<f64>,
        finite_diff: DMatrix<f64>,
    ) -> SolverResult<Self> {
        let shape = (outputs.len(), inputs.len());
        if calculated.shape() != shape || finite_diff.shape() != shape {
            return Err(SolverError::Numeric {
                what: format!(
                    "gradient check: expected {}x{}, calculated is {}x{}, finite difference is {}x{}",
                    shape.0,
                    shape.1,
                    calculated.nrows(),
                    calculated.ncols(),
                    finite_diff.nrows(),
                    finite_diff.ncols()
                ),
            });
        }
        let mut entries = Vec::with_capacity(shape.0 * shape.1);
        for (r, output) in outputs.iter().enumerate() {
            for (c, input) in inputs.iter().enumerate() {
                let calc = calculated[(r, c)];
                let fd = finite_diff[(r, c)];
                let rel_error = if calc != 0.0 && fd != 0.0 { (calc - fd) / fd } else { calc - fd };
                entries.push(GradientEntry {
                    output: output.clone(),
                    input: input.clone(),
                    calculated: calc,
                    finite_diff: fd,
                    rel_error,
                });
            }
        }
        Ok(Self {
            calculated,
            finite_diff,
            entries,
        })
    }

    pub fn suspects(&self) -> Vec<&GradientEntry> {
        self.entries.iter().filter(|e| e.is_suspect()).collect()
    }

    pub fn max_error(&self) -> f64 {
        self.entries.iter().map(|e| e.rel_error.abs()).fold(0.0, f64::max)
    }

    pub fn mean_error(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        self.entries.iter().map(|e| e.rel_error.abs()).sum::<f64>() / self.entries.len() as f64
    }
}

impl fmt::Display for GradientCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<30} {:>15} {:>15} {:>15}",
            "output / input", "calculated", "finite diff", "error"
        )?;
        for e in &self.entries {
            let name = format!("{} / {}", e.output, e.input);
            let flag = if e.is_suspect() { " *" } else { "" };
            writeln!(
                f,
                "{name:<30} {:>15.6e} {:>15.6e} {:>15.6e}{flag}",
                e.calculated, e.finite_diff, e.rel_error
            )?;
        }
        write!(
            f,
            "max error {:.6e}, mean error {:.6e}",
            self.max_error(),
            self.mean_error()
        )
    }
}
