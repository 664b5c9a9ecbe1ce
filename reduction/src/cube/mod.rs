//! The canonical in-memory data cube for one reduction segment.
//!
//! An [`ImageCube`] exclusively owns the per-pixel planes of a segment
//! (`flux`, `err`, `dq`, `v0`, `mask`, all shaped `(t, y, x)`), the
//! wavelength solution, the time axis and the scalar geometry of the source.
//! Downstream stages borrow views; only the median frame and spectra are
//! produced as separate artifacts.
//!
//! The bad-pixel mask is monotone: it can only be merged into
//! ([`ImageCube::merge_mask`]), never cleared.

pub mod assemble;
pub mod shape;
pub mod shift;
pub mod supersample;
pub mod time;
pub mod units;
pub mod wavelength;

pub use assemble::{assemble_cube, CubeInputs, SegmentMetadata, WavelengthInput};
pub use shape::CubeShape;
pub use units::FluxUnits;
pub use wavelength::Wavelength;

use crate::error::{ReductionError, Result};
use ndarray::{Array1, Array3, ArrayView3, ArrayViewMut3, Zip};
use serde::{Deserialize, Serialize};

/// Quality bit marking a pixel the instrument pipeline says not to use.
pub const DO_NOT_USE: u32 = 1;

/// Detector readout mode of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObservingMode {
    /// Grism time series, wavelength varies along x
    Spectroscopy,
    /// Imaging time series, one wavelength per filter
    Photometry,
}

/// Source and window geometry, in the cube's current pixel grid.
///
/// y-quantities are rescaled together when the cube is super-sampled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentGeometry {
    /// Source row (cross-dispersion position)
    pub source_y: f64,
    /// Source column within the trimmed window
    pub source_x: f64,
    /// Aperture half-width in rows
    pub spec_hw: usize,
    /// Rows `< bg_y1` or `>= bg_y2` are background
    pub bg_y1: usize,
    pub bg_y2: usize,
    /// Columns `< bg_x1` or `>= bg_x2` are background (row-wise fits)
    pub bg_x1: usize,
    pub bg_x2: usize,
    /// Rows kept from the full detector
    pub ywindow: (usize, usize),
    /// Columns kept from the full detector
    pub xwindow: (usize, usize),
}

impl SegmentGeometry {
    pub(crate) fn scale_y(&mut self, factor: usize) {
        let f = factor as f64;
        // Centre of native row r maps to the centre of its block of fine rows
        self.source_y = (self.source_y + 0.5) * f - 0.5;
        self.spec_hw *= factor;
        self.bg_y1 *= factor;
        self.bg_y2 *= factor;
        self.ywindow = (self.ywindow.0 * factor, self.ywindow.1 * factor);
    }
}

/// Time-ordered detector images of one reduction segment.
#[derive(Debug, Clone)]
pub struct ImageCube {
    flux: Array3<f64>,
    err: Array3<f64>,
    dq: Array3<u32>,
    v0: Array3<f64>,
    mask: Array3<bool>,
    wavelength: Wavelength,
    time: Array1<f64>,
    geometry: SegmentGeometry,
    filter: String,
    mode: ObservingMode,
    units: FluxUnits,
    pixel_area_sr: Option<f64>,
    super_sample_factor: Option<usize>,
}

impl ImageCube {
    /// Build a cube, validating that every plane shares the flux shape, the
    /// wavelength and detector windows match the frame and time matches the
    /// integration count.
    ///
    /// The mask starts all-good.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        flux: Array3<f64>,
        err: Array3<f64>,
        dq: Array3<u32>,
        v0: Array3<f64>,
        wavelength: Wavelength,
        time: Array1<f64>,
        geometry: SegmentGeometry,
        filter: String,
        mode: ObservingMode,
        units: FluxUnits,
        pixel_area_sr: Option<f64>,
    ) -> Result<Self> {
        let shape = CubeShape::from(&flux);
        shape.check("err", &err)?;
        shape.check("dq", &dq)?;
        shape.check("v0", &v0)?;

        match &wavelength {
            Wavelength::Grid(grid) => {
                if grid.dim() != (shape.height, shape.width) {
                    return Err(ReductionError::shape_mismatch(
                        "wave_2d",
                        &[shape.height, shape.width],
                        grid.shape(),
                    ));
                }
            }
            Wavelength::Photometric(wave) => {
                if wave.len() != shape.width {
                    return Err(ReductionError::shape_mismatch(
                        "wave_1d",
                        &[shape.width],
                        wave.shape(),
                    ));
                }
            }
        }

        check_window("xwindow", geometry.xwindow, shape.width)?;
        check_window("ywindow", geometry.ywindow, shape.height)?;

        if time.len() != shape.n_int {
            return Err(ReductionError::shape_mismatch(
                "time",
                &[shape.n_int],
                time.shape(),
            ));
        }
        if let Some(slice) = time.as_slice() {
            time::check_strictly_increasing(slice)?;
        }

        Ok(Self {
            mask: shape.filled(false),
            flux,
            err,
            dq,
            v0,
            wavelength,
            time,
            geometry,
            filter,
            mode,
            units,
            pixel_area_sr,
            super_sample_factor: None,
        })
    }

    pub fn shape(&self) -> CubeShape {
        CubeShape::from(&self.flux)
    }

    pub fn flux(&self) -> &Array3<f64> {
        &self.flux
    }

    pub fn flux_mut(&mut self) -> &mut Array3<f64> {
        &mut self.flux
    }

    pub fn err(&self) -> &Array3<f64> {
        &self.err
    }

    pub fn dq(&self) -> &Array3<u32> {
        &self.dq
    }

    pub fn v0(&self) -> &Array3<f64> {
        &self.v0
    }

    pub fn mask(&self) -> &Array3<bool> {
        &self.mask
    }

    pub fn wavelength(&self) -> &Wavelength {
        &self.wavelength
    }

    pub fn time(&self) -> &Array1<f64> {
        &self.time
    }

    pub fn geometry(&self) -> &SegmentGeometry {
        &self.geometry
    }

    #[cfg(test)]
    pub(crate) fn geometry_mut(&mut self) -> &mut SegmentGeometry {
        &mut self.geometry
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn mode(&self) -> ObservingMode {
        self.mode
    }

    pub fn is_photometry(&self) -> bool {
        self.mode == ObservingMode::Photometry
    }

    pub fn units(&self) -> &FluxUnits {
        &self.units
    }

    pub fn super_sample_factor(&self) -> Option<usize> {
        self.super_sample_factor
    }

    /// Mutable flux together with read-only err and mask, for in-place corrections.
    pub fn flux_err_mask_mut(
        &mut self,
    ) -> (ArrayViewMut3<'_, f64>, ArrayView3<'_, f64>, ArrayView3<'_, bool>) {
        (self.flux.view_mut(), self.err.view(), self.mask.view())
    }

    /// Number of pixels not flagged as bad.
    pub fn good_pixel_count(&self) -> usize {
        self.mask.iter().filter(|&&m| !m).count()
    }

    /// Flag every pixel set in `flags` (logical OR into the mask).
    ///
    /// Returns the number of newly flagged pixels. Pixels already flagged stay
    /// flagged whatever `flags` says.
    pub fn merge_mask(&mut self, flags: &Array3<bool>) -> Result<usize> {
        self.shape().check("mask", flags)?;

        let mut newly = 0;
        Zip::from(&mut self.mask).and(flags).for_each(|m, &f| {
            if f && !*m {
                *m = true;
                newly += 1;
            }
        });
        Ok(newly)
    }

    /// Flag non-finite flux or err, and pixels whose quality word carries any
    /// bit of `dq_bits`.
    ///
    /// Returns the number of newly flagged pixels.
    pub fn flag_invalid(&mut self, dq_bits: u32) -> usize {
        let mut newly = 0;
        Zip::from(&mut self.mask)
            .and(&self.flux)
            .and(&self.err)
            .and(&self.dq)
            .for_each(|m, f, e, &dq| {
                let bad = !f.is_finite() || !e.is_finite() || dq & dq_bits != 0;
                if bad && !*m {
                    *m = true;
                    newly += 1;
                }
            });
        newly
    }

    /// Percentage of the whole cube that `newly_flagged` pixels represent.
    pub fn percent_of_cube(&self, newly_flagged: usize) -> f64 {
        let size = self.shape().pixel_count();
        if size == 0 {
            0.0
        } else {
            100.0 * newly_flagged as f64 / size as f64
        }
    }
}

/// A `[start, end)` detector window must span exactly `len` pixels.
pub(crate) fn check_window(name: &'static str, window: (usize, usize), len: usize) -> Result<()> {
    let (start, end) = window;
    if end < start || end - start != len {
        return Err(ReductionError::shape_mismatch(
            name,
            &[len],
            &[end.saturating_sub(start)],
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_geometry(height: usize, width: usize) -> SegmentGeometry {
    SegmentGeometry {
        source_y: (height / 2) as f64,
        source_x: (width / 2) as f64,
        spec_hw: 1,
        bg_y1: height / 2 - 1,
        bg_y2: height / 2 + 2,
        bg_x1: 0,
        bg_x2: width,
        ywindow: (0, height),
        xwindow: (0, width),
    }
}

/// Uniform spectroscopic cube for unit tests.
#[cfg(test)]
pub(crate) fn test_cube(n_int: usize, height: usize, width: usize, value: f64) -> ImageCube {
    let shape = CubeShape::new(n_int, height, width);
    let wave = ndarray::Array2::from_shape_fn((height, width), |(_, x)| 3.0 + 0.001 * x as f64);
    let time = Array1::from_iter((0..n_int).map(|i| i as f64));
    ImageCube::new(
        shape.filled(value),
        shape.filled(1.0),
        shape.filled(0),
        shape.filled(0.5),
        Wavelength::Grid(wave),
        time,
        test_geometry(height, width),
        "F444W".to_string(),
        ObservingMode::Spectroscopy,
        FluxUnits::MegaJanskyPerSteradian,
        Some(1.0e-13),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_new_rejects_mismatched_planes() {
        let shape = CubeShape::new(2, 3, 4);
        let result = ImageCube::new(
            shape.filled(0.0),
            Array3::zeros((2, 3, 5)),
            shape.filled(0),
            shape.filled(0.0),
            Wavelength::Grid(Array2::zeros((3, 4))),
            Array1::from(vec![0.0, 1.0]),
            test_geometry(3, 4),
            "F444W".to_string(),
            ObservingMode::Spectroscopy,
            FluxUnits::MegaJanskyPerSteradian,
            None,
        );
        assert!(matches!(
            result,
            Err(ReductionError::ShapeMismatch { name: "err", .. })
        ));
    }

    #[test]
    fn test_new_rejects_window_wider_than_frame() {
        let shape = CubeShape::new(2, 4, 16);
        let build = |geometry: SegmentGeometry| {
            ImageCube::new(
                shape.filled(1.0),
                shape.filled(1.0),
                shape.filled(0),
                shape.filled(0.5),
                Wavelength::Grid(Array2::zeros((4, 16))),
                Array1::from(vec![0.0, 1.0]),
                geometry,
                "F444W".to_string(),
                ObservingMode::Spectroscopy,
                FluxUnits::MegaJanskyPerSteradian,
                None,
            )
        };

        let mut narrow = test_geometry(4, 16);
        narrow.xwindow = (0, 8);
        assert!(matches!(
            build(narrow),
            Err(ReductionError::ShapeMismatch { name: "xwindow", .. })
        ));

        let mut inverted = test_geometry(4, 16);
        inverted.ywindow = (6, 2);
        assert!(matches!(
            build(inverted),
            Err(ReductionError::ShapeMismatch { name: "ywindow", .. })
        ));

        let mut offset = test_geometry(4, 16);
        offset.xwindow = (100, 116);
        assert!(build(offset).is_ok());
    }

    #[test]
    fn test_new_rejects_wavelength_and_time_mismatch() {
        let shape = CubeShape::new(2, 3, 4);
        let build = |wave: Wavelength, time: Vec<f64>| {
            ImageCube::new(
                shape.filled(0.0),
                shape.filled(0.0),
                shape.filled(0),
                shape.filled(0.0),
                wave,
                Array1::from(time),
                test_geometry(3, 4),
                "F210M".to_string(),
                ObservingMode::Photometry,
                FluxUnits::MegaJanskyPerSteradian,
                None,
            )
        };

        assert!(build(Wavelength::Photometric(Array1::zeros(3)), vec![0.0, 1.0]).is_err());
        assert!(build(Wavelength::Photometric(Array1::zeros(4)), vec![0.0]).is_err());
        assert!(matches!(
            build(Wavelength::Photometric(Array1::zeros(4)), vec![1.0, 1.0]),
            Err(ReductionError::NonMonotonicTime(1))
        ));
        assert!(build(Wavelength::Photometric(Array1::zeros(4)), vec![0.0, 1.0]).is_ok());
    }

    #[test]
    fn test_merge_mask_is_monotone() {
        let mut cube = test_cube(2, 3, 4, 1.0);
        assert_eq!(cube.good_pixel_count(), 24);

        let mut flags = cube.shape().filled(false);
        flags[[0, 1, 1]] = true;
        flags[[1, 2, 3]] = true;
        assert_eq!(cube.merge_mask(&flags).unwrap(), 2);

        // Merging an all-good mask never clears anything
        let clear = cube.shape().filled(false);
        assert_eq!(cube.merge_mask(&clear).unwrap(), 0);
        assert!(cube.mask()[[0, 1, 1]]);
        assert!(cube.mask()[[1, 2, 3]]);

        // Re-flagging counts nothing new
        assert_eq!(cube.merge_mask(&flags).unwrap(), 0);
        assert_eq!(cube.good_pixel_count(), 22);
    }

    #[test]
    fn test_flag_invalid() {
        let mut cube = test_cube(2, 3, 4, 1.0);
        cube.flux[[0, 0, 0]] = f64::NAN;
        cube.err[[1, 2, 3]] = f64::INFINITY;
        cube.dq[[1, 1, 1]] = 1;
        cube.dq[[0, 2, 2]] = 4;

        assert_eq!(cube.flag_invalid(DO_NOT_USE), 3);
        assert!(cube.mask()[[0, 0, 0]]);
        assert!(cube.mask()[[1, 1, 1]]);
        assert!(!cube.mask()[[0, 2, 2]]);
        assert_eq!(cube.flag_invalid(DO_NOT_USE), 0);
    }

    #[test]
    fn test_percent_of_cube() {
        let cube = test_cube(2, 5, 10, 1.0);
        assert_eq!(cube.percent_of_cube(10), 10.0);
    }

    #[test]
    fn test_geometry_scale_y() {
        let mut geometry = test_geometry(10, 20);
        geometry.source_y = 4.0;
        geometry.spec_hw = 2;
        geometry.scale_y(3);
        assert_eq!(geometry.source_y, 13.0);
        assert_eq!(geometry.spec_hw, 6);
        assert_eq!(geometry.bg_y1, 12);
        assert_eq!(geometry.bg_y2, 21);
        assert_eq!(geometry.ywindow, (0, 30));
        assert_eq!(geometry.xwindow, (0, 20));
    }
}
