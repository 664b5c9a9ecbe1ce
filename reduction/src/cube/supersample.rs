//! Integer super-sampling along the cross-dispersion (y) axis.
//!
//! Each quantity is resampled according to what it means physically:
//!
//! | plane       | rule                                                         |
//! |-------------|--------------------------------------------------------------|
//! | flux, v0    | repeat and divide by N, so a block of N fine rows sums back   |
//! | err         | repeat and divide by √N, so the quadrature sum is preserved   |
//! | dq          | nearest neighbour, flag values are never blended              |
//! | wavelength  | linear interpolation at fine-row centres, held at the edges   |

use super::{ImageCube, Wavelength};
use crate::algo::misc::interp_clamped;
use crate::error::{ReductionError, Result};
use log::info;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

/// Resampling rule for one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resampling {
    /// Block sums of the output equal the input values
    FluxConserving,
    /// Block quadrature sums of the output equal the input values
    Uncertainty,
    /// Plain repetition
    Nearest,
}

/// Repeat every row of a `(t, y, x)` array `factor` times and rescale per `rule`.
pub fn upsample_rows<T>(data: ArrayView3<T>, factor: usize, rule: Resampling) -> Array3<T>
where
    T: Copy + Into<f64> + FromF64,
{
    let (n_int, height, width) = data.dim();
    let scale = match rule {
        Resampling::FluxConserving => 1.0 / factor as f64,
        Resampling::Uncertainty => 1.0 / (factor as f64).sqrt(),
        Resampling::Nearest => 1.0,
    };

    Array3::from_shape_fn((n_int, height * factor, width), |(t, y, x)| {
        let v = data[[t, y / factor, x]];
        if rule == Resampling::Nearest {
            v
        } else {
            T::from_f64(v.into() * scale)
        }
    })
}

/// Conversion back from `f64` for resampled planes.
pub trait FromF64 {
    fn from_f64(v: f64) -> Self;
}

impl FromF64 for f64 {
    fn from_f64(v: f64) -> Self {
        v
    }
}

impl FromF64 for u32 {
    fn from_f64(v: f64) -> Self {
        v.round() as u32
    }
}

/// Linearly resample a `(y, x)` grid onto `factor`-times finer rows.
///
/// Fine row `j` sits at native coordinate `(j + 0.5) / factor - 0.5`; rows
/// beyond the first and last native centres take the edge value.
pub fn upsample_grid_linear(grid: ArrayView2<f64>, factor: usize) -> Result<Array2<f64>> {
    let (height, width) = grid.dim();
    if height < 2 {
        return Ok(Array2::from_shape_fn((height * factor, width), |(j, x)| {
            grid[[j / factor, x]]
        }));
    }

    let native: Vec<f64> = (0..height).map(|y| y as f64).collect();
    let mut out = Array2::zeros((height * factor, width));
    for (x, column) in grid.axis_iter(Axis(1)).enumerate() {
        let values = column.to_vec();
        for j in 0..height * factor {
            let y = (j as f64 + 0.5) / factor as f64 - 0.5;
            out[[j, x]] = interp_clamped(y, &native, &values)?;
        }
    }
    Ok(out)
}

impl ImageCube {
    /// Super-sample every plane, the wavelength grid and the y-geometry by `factor`.
    ///
    /// May be applied once per segment; a second call fails with
    /// [`ReductionError::AlreadySuperSampled`] and leaves the cube untouched.
    /// A factor of 1 is a no-op that does not consume the single application.
    pub fn supersample(&mut self, factor: usize) -> Result<()> {
        if let Some(applied) = self.super_sample_factor {
            return Err(ReductionError::AlreadySuperSampled(applied));
        }
        if factor == 0 {
            return Err(ReductionError::InvalidConfig(
                "super-sample factor must be at least 1".to_string(),
            ));
        }
        if factor == 1 {
            return Ok(());
        }

        let wavelength = match &self.wavelength {
            Wavelength::Grid(grid) => Wavelength::Grid(upsample_grid_linear(grid.view(), factor)?),
            Wavelength::Photometric(_) => {
                return Err(ReductionError::InvalidConfig(
                    "super-sampling is only defined for spectroscopic segments".to_string(),
                ))
            }
        };

        let shape = self.shape();
        info!(
            "    Super-sampling y axis from {} to {} pixels...",
            shape.height,
            shape.height * factor
        );

        self.flux = upsample_rows(self.flux.view(), factor, Resampling::FluxConserving);
        self.err = upsample_rows(self.err.view(), factor, Resampling::Uncertainty);
        self.dq = upsample_rows(self.dq.view(), factor, Resampling::Nearest);
        self.v0 = upsample_rows(self.v0.view(), factor, Resampling::FluxConserving);
        self.mask = upsample_mask(self.mask.view(), factor);
        self.wavelength = wavelength;
        self.geometry.scale_y(factor);
        self.super_sample_factor = Some(factor);
        Ok(())
    }
}

fn upsample_mask(mask: ArrayView3<bool>, factor: usize) -> Array3<bool> {
    let (n_int, height, width) = mask.dim();
    Array3::from_shape_fn((n_int, height * factor, width), |(t, y, x)| {
        mask[[t, y / factor, x]]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::test_cube;
    use approx::assert_relative_eq;

    #[test]
    fn test_flux_block_sums_preserved() {
        let data = Array3::from_shape_fn((2, 3, 4), |(t, y, x)| (t * 100 + y * 10 + x) as f64);
        let up = upsample_rows(data.view(), 4, Resampling::FluxConserving);
        assert_eq!(up.dim(), (2, 12, 4));

        for t in 0..2 {
            for y in 0..3 {
                for x in 0..4 {
                    let block: f64 = (0..4).map(|k| up[[t, y * 4 + k, x]]).sum();
                    assert_relative_eq!(block, data[[t, y, x]], epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_err_quadrature_preserved() {
        let data = Array3::from_elem((1, 2, 2), 3.0);
        let up = upsample_rows(data.view(), 9, Resampling::Uncertainty);
        let quad: f64 = (0..9).map(|k| up[[0, k, 0]].powi(2)).sum::<f64>().sqrt();
        assert_relative_eq!(quad, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_flag_roundtrip_first_element() {
        let flags = Array3::from_shape_fn((3, 5, 7), |(t, y, x)| ((t * 31 + y * 7 + x) % 5) as u32);
        for factor in [1, 2, 5] {
            let up = upsample_rows(flags.view(), factor, Resampling::Nearest);
            // Nearest-neighbour expansion never invents intermediate values
            assert!(up.iter().all(|v| *v < 5));
            let step = factor as isize;
            assert_eq!(up.slice(ndarray::s![.., ..;step, ..]), flags);
        }
    }

    #[test]
    fn test_wavelength_grid_linear() {
        let grid = Array2::from_shape_fn((3, 2), |(y, x)| 1.0 + y as f64 + 10.0 * x as f64);
        let up = upsample_grid_linear(grid.view(), 2).unwrap();
        assert_eq!(up.dim(), (6, 2));
        // Fine row 0 sits at native -0.25 (held), row 1 at 0.25
        assert_relative_eq!(up[[0, 0]], 1.0);
        assert_relative_eq!(up[[1, 0]], 1.25);
        assert_relative_eq!(up[[2, 1]], 11.75);
        assert_relative_eq!(up[[5, 0]], 3.0);
    }

    #[test]
    fn test_supersample_cube_once() {
        let mut cube = test_cube(2, 6, 5, 8.0);
        let geometry = *cube.geometry();

        cube.supersample(2).unwrap();
        assert_eq!(cube.shape().to_tuple(), (2, 12, 5));
        assert_eq!(cube.mask().dim(), (2, 12, 5));
        assert_eq!(cube.super_sample_factor(), Some(2));
        assert_relative_eq!(cube.flux()[[0, 0, 0]], 4.0);
        assert_eq!(cube.geometry().spec_hw, geometry.spec_hw * 2);
        assert_eq!(cube.geometry().bg_y1, geometry.bg_y1 * 2);

        let before = cube.flux().clone();
        let err = cube.supersample(2).unwrap_err();
        assert!(matches!(err, ReductionError::AlreadySuperSampled(2)));
        assert!(err.is_configuration());
        assert_eq!(cube.flux(), &before);
        assert_eq!(cube.geometry().spec_hw, geometry.spec_hw * 2);
    }

    #[test]
    fn test_factor_one_is_noop() {
        let mut cube = test_cube(1, 4, 4, 1.0);
        cube.supersample(1).unwrap();
        assert_eq!(cube.super_sample_factor(), None);
        assert_eq!(cube.shape().height, 4);
    }
}
