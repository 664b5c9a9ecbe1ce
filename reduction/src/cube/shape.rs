//! Cube dimensions and shape checks

use crate::error::{ReductionError, Result};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dimensions of a time-ordered image cube.
///
/// Follows the row-major `(t, y, x)` convention of every per-pixel array in
/// the segment: integrations first, then rows (cross-dispersion), then
/// columns (dispersion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CubeShape {
    /// Number of integrations
    pub n_int: usize,
    /// Rows per frame
    pub height: usize,
    /// Columns per frame
    pub width: usize,
}

impl CubeShape {
    pub fn new(n_int: usize, height: usize, width: usize) -> Self {
        Self {
            n_int,
            height,
            width,
        }
    }

    /// Create a filled array with this shape
    pub fn filled<T: Clone>(&self, value: T) -> Array3<T> {
        Array3::from_elem(self.to_tuple(), value)
    }

    /// Total number of pixels across all integrations
    pub fn pixel_count(&self) -> usize {
        self.n_int * self.height * self.width
    }

    /// Convert to tuple (t, y, x)
    pub fn to_tuple(&self) -> (usize, usize, usize) {
        (self.n_int, self.height, self.width)
    }

    pub fn as_vec(&self) -> Vec<usize> {
        vec![self.n_int, self.height, self.width]
    }

    /// Fail with [`ReductionError::ShapeMismatch`] unless `array` has this shape.
    pub fn check<T>(&self, name: &'static str, array: &Array3<T>) -> Result<()> {
        if array.dim() != self.to_tuple() {
            return Err(ReductionError::shape_mismatch(
                name,
                &self.as_vec(),
                array.shape(),
            ));
        }
        Ok(())
    }
}

impl<T> From<&Array3<T>> for CubeShape {
    fn from(array: &Array3<T>) -> Self {
        let (n_int, height, width) = array.dim();
        Self::new(n_int, height, width)
    }
}

impl From<CubeShape> for (usize, usize, usize) {
    fn from(shape: CubeShape) -> Self {
        shape.to_tuple()
    }
}

impl fmt::Display for CubeShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}x{}", self.n_int, self.height, self.width)
    }
}
