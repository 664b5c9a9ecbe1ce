//! Whole-row column shifts along y.
//!
//! Every plane moves with its pixels, so flags and quality bits stay attached
//! to the flux they describe. Rows that receive no source pixel are flagged
//! and carry [`DO_NOT_USE`]; the wavelength grid holds its edge value there.

use super::{ImageCube, Wavelength, DO_NOT_USE};
use crate::error::{ReductionError, Result};
use ndarray::{Array2, Array3, ArrayView1, ArrayViewMut1, Axis, Zip};

/// Copy `src` into `dst` moved `shift` rows towards larger y, writing `fill`
/// into rows without a source.
fn shift_lane<T: Copy>(src: ArrayView1<T>, mut dst: ArrayViewMut1<T>, shift: i64, fill: T) {
    let len = src.len() as i64;
    for (y, out) in dst.iter_mut().enumerate() {
        let from = y as i64 - shift;
        *out = if (0..len).contains(&from) {
            src[from as usize]
        } else {
            fill
        };
    }
}

/// Shift each column `x` of every frame of a `(t, y, x)` plane by `shifts[x]` rows.
pub fn shift_plane<T>(plane: &Array3<T>, shifts: &[i64], fill: T) -> Array3<T>
where
    T: Copy + Send + Sync,
{
    let mut out = Array3::from_elem(plane.raw_dim(), fill);
    Zip::from(out.axis_iter_mut(Axis(0)))
        .and(plane.axis_iter(Axis(0)))
        .par_for_each(|mut out_frame, frame| {
            for ((dst, src), &shift) in out_frame
                .axis_iter_mut(Axis(1))
                .zip(frame.axis_iter(Axis(1)))
                .zip(shifts)
            {
                shift_lane(src, dst, shift, fill);
            }
        });
    out
}

fn shift_grid(grid: &Array2<f64>, shifts: &[i64]) -> Array2<f64> {
    let last = grid.nrows() as i64 - 1;
    Array2::from_shape_fn(grid.raw_dim(), |(y, x)| {
        let from = (y as i64 - shifts[x]).clamp(0, last);
        grid[[from as usize, x]]
    })
}

impl ImageCube {
    /// Shift column `x` of every plane by `shifts[x]` whole rows towards larger y.
    ///
    /// Vacated rows get zero flux, error and `v0`, `DO_NOT_USE` quality and a
    /// set mask bit. Returns the number of vacated pixels across the cube.
    pub fn shift_columns(&mut self, shifts: &[i64]) -> Result<usize> {
        let shape = self.shape();
        if shifts.len() != shape.width {
            return Err(ReductionError::shape_mismatch(
                "column shifts",
                &[shape.width],
                &[shifts.len()],
            ));
        }
        if shifts.iter().all(|&s| s == 0) {
            return Ok(0);
        }

        self.flux = shift_plane(&self.flux, shifts, 0.0);
        self.err = shift_plane(&self.err, shifts, 0.0);
        self.v0 = shift_plane(&self.v0, shifts, 0.0);
        self.dq = shift_plane(&self.dq, shifts, DO_NOT_USE);
        self.mask = shift_plane(&self.mask, shifts, true);
        let grid = match &self.wavelength {
            Wavelength::Grid(grid) => Some(shift_grid(grid, shifts)),
            Wavelength::Photometric(_) => None,
        };
        if let Some(grid) = grid {
            self.wavelength = Wavelength::Grid(grid);
        }

        let vacated_per_frame: usize = shifts
            .iter()
            .map(|s| (s.unsigned_abs() as usize).min(shape.height))
            .sum();
        Ok(vacated_per_frame * shape.n_int)
    }
}
