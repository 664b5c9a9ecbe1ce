//! Least-squares polynomial fitting.
//!
//! Abscissae are rescaled to roughly `[-1, 1]` before the Vandermonde system is
//! built so that low-order fits over a few thousand pixels stay well conditioned.

use nalgebra::{DMatrix, DVector};

/// Polynomial fitted in a rescaled coordinate `u = (x - center) / scale`.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    /// Coefficients in increasing power of `u`
    coeffs: Vec<f64>,
    center: f64,
    scale: f64,
}

impl Polynomial {
    /// Constant polynomial.
    pub fn constant(value: f64) -> Self {
        Self {
            coeffs: vec![value],
            center: 0.0,
            scale: 1.0,
        }
    }

    /// Fit a polynomial of degree `deg` to `(xs, ys)`.
    ///
    /// Returns `None` if fewer than `deg + 1` points are supplied or the
    /// least-squares system cannot be solved.
    pub fn fit(xs: &[f64], ys: &[f64], deg: usize) -> Option<Self> {
        let n = xs.len();
        if n != ys.len() || n < deg + 1 {
            return None;
        }

        let min_x = xs.iter().copied().fold(f64::INFINITY, f64::min);
        let max_x = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let center = 0.5 * (min_x + max_x);
        let half_range = 0.5 * (max_x - min_x);
        let scale = if half_range > 0.0 { half_range } else { 1.0 };

        let vander = DMatrix::from_fn(n, deg + 1, |i, j| ((xs[i] - center) / scale).powi(j as i32));
        let rhs = DVector::from_column_slice(ys);

        let solution = vander.svd(true, true).solve(&rhs, 1e-12).ok()?;
        let coeffs: Vec<f64> = solution.iter().copied().collect();
        if coeffs.iter().any(|c| !c.is_finite()) {
            return None;
        }

        Some(Self {
            coeffs,
            center,
            scale,
        })
    }

    /// Evaluate at `x` with Horner's rule.
    pub fn eval(&self, x: f64) -> f64 {
        let u = (x - self.center) / self.scale;
        self.coeffs.iter().rev().fold(0.0, |acc, &c| acc * u + c)
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }
}
