/// Floating point type used throughout the framework.
pub type Real = f64;

/// Norm used to measure residual vectors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NormKind {
    /// Largest absolute entry.
    #[default]
    Infinity,
    /// Square root of the sum of squares.
    Euclidean,
}

/// Norm of a residual slice. An empty slice has norm zero.
pub fn norm(values: &[Real], kind: NormKind) -> Real {
    match kind {
        NormKind::Infinity => values.iter().fold(0.0, |acc: Real, v| acc.max(v.abs())),
        NormKind::Euclidean => values.iter().map(|v| v * v).sum::<Real>().sqrt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn norms() {
        let v = [3.0, -4.0];
        assert_eq!(norm(&v, NormKind::Infinity), 4.0);
        assert!((norm(&v, NormKind::Euclidean) - 5.0).abs() < 1e-15);
        assert_eq!(norm(&[], NormKind::Euclidean), 0.0);
    }
}
