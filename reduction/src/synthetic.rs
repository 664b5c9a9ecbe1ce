//! Deterministic synthetic segments for tests and demonstrations.
//!
//! A segment holds a Gaussian spectral trace on a background that slopes along
//! y, with Gaussian pixel noise, correlated per-row noise, cosmic-ray hits and
//! an optional dead column. Everything is drawn from a seeded generator, so
//! the same settings always produce the same cube.

use crate::config::ReductionConfig;
use crate::cube::{
    CubeInputs, CubeShape, ObservingMode, SegmentMetadata, WavelengthInput, DO_NOT_USE,
};
use crate::error::{ReductionError, Result};
use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Generate a 3-D array of normally distributed values.
pub fn normal_cube(shape: CubeShape, mean: f64, std_dev: f64, seed: u64) -> Result<Array3<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(mean, std_dev)
        .map_err(|e| ReductionError::InvalidConfig(format!("noise distribution: {e}")))?;
    Ok(Array3::from_shape_fn(shape.to_tuple(), |_| normal.sample(&mut rng)))
}

/// Settings of a synthetic spectroscopic segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSegment {
    pub n_int: usize,
    pub height: usize,
    pub width: usize,
    /// Trace centre row
    pub trace_y: f64,
    /// Trace Gaussian width in rows
    pub trace_sigma: f64,
    /// Total trace flux per column
    pub trace_flux: f64,
    pub background_level: f64,
    /// Background change per row
    pub background_slope: f64,
    pub noise_sigma: f64,
    /// Standard deviation of the per-row offset shared by a whole row
    pub row_noise_sigma: f64,
    pub n_cosmic_rays: usize,
    pub cosmic_ray_amplitude: f64,
    pub dead_column: Option<usize>,
    pub seed: u64,
}

impl Default for SyntheticSegment {
    fn default() -> Self {
        Self {
            n_int: 20,
            height: 32,
            width: 64,
            trace_y: 16.0,
            trace_sigma: 1.5,
            trace_flux: 1000.0,
            background_level: 5.0,
            background_slope: 0.05,
            noise_sigma: 0.5,
            row_noise_sigma: 0.0,
            n_cosmic_rays: 10,
            cosmic_ray_amplitude: 500.0,
            dead_column: Some(40),
            seed: 7,
        }
    }
}

/// Where the synthetic cosmic rays landed.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticTruth {
    pub cosmic_rays: Vec<(usize, usize, usize)>,
    /// Noiseless trace flux per column
    pub trace_flux: f64,
}

impl SyntheticSegment {
    pub fn shape(&self) -> CubeShape {
        CubeShape::new(self.n_int, self.height, self.width)
    }

    /// Trace profile of row `y`, normalised so the full column sums to `trace_flux`.
    fn profile(&self) -> Vec<f64> {
        let raw: Vec<f64> = (0..self.height)
            .map(|y| {
                let d = (y as f64 - self.trace_y) / self.trace_sigma;
                (-0.5 * d * d).exp()
            })
            .collect();
        let total: f64 = raw.iter().sum();
        raw.iter().map(|r| self.trace_flux * r / total).collect()
    }

    /// Build the cube inputs and the injected truth.
    pub fn build(&self) -> Result<(CubeInputs, SyntheticTruth)> {
        if self.n_int == 0 || self.height == 0 || self.width == 0 {
            return Err(ReductionError::InvalidConfig(
                "synthetic segments need at least one integration, row and column".to_string(),
            ));
        }
        let shape = self.shape();
        let profile = self.profile();

        let mut flux = normal_cube(shape, 0.0, self.noise_sigma, self.seed)?;
        let row_noise = if self.row_noise_sigma > 0.0 {
            normal_cube(
                CubeShape::new(self.n_int, self.height, 1),
                0.0,
                self.row_noise_sigma,
                self.seed.wrapping_add(1),
            )?
        } else {
            Array3::zeros((self.n_int, self.height, 1))
        };

        for ((t, y, _), v) in flux.indexed_iter_mut() {
            *v += self.background_level
                + self.background_slope * y as f64
                + profile[y]
                + row_noise[[t, y, 0]];
        }

        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(2));
        let cosmic_rays: Vec<(usize, usize, usize)> = (0..self.n_cosmic_rays)
            .map(|_| {
                (
                    rng.random_range(0..self.n_int),
                    rng.random_range(0..self.height),
                    rng.random_range(0..self.width),
                )
            })
            .collect();
        for &hit in &cosmic_rays {
            flux[hit] += self.cosmic_ray_amplitude;
        }

        let mut dq = shape.filled(0u32);
        if let Some(column) = self.dead_column.filter(|&c| c < self.width) {
            for t in 0..self.n_int {
                for y in 0..self.height {
                    flux[[t, y, column]] = f64::NAN;
                    dq[[t, y, column]] = DO_NOT_USE;
                }
            }
        }

        let wavelength = Array2::from_shape_fn((self.height, self.width), |(_, x)| {
            2.4 + 0.001 * x as f64
        });

        let inputs = CubeInputs {
            flux,
            err: shape.filled(self.noise_sigma),
            dq,
            v0: shape.filled(self.noise_sigma * self.noise_sigma),
            time: Some((0..self.n_int).map(|t| 60000.0 + t as f64 * 1e-3).collect()),
            wavelength: WavelengthInput::Grid(wavelength),
            metadata: SegmentMetadata {
                filter: "F322W2".to_string(),
                mode: ObservingMode::Spectroscopy,
                flux_units: "MJy/sr".to_string(),
                pixel_area_sr: Some(9.31e-14),
                int_start: Some(0),
                int_end: Some(self.n_int),
                exp_start: 60000.0,
                exp_end: 60000.0 + (self.n_int.saturating_sub(1)) as f64 * 1e-3,
            },
        };

        Ok((
            inputs,
            SyntheticTruth {
                cosmic_rays,
                trace_flux: self.trace_flux,
            },
        ))
    }

    /// Place the trace and background geometry of this segment into `config`.
    ///
    /// The aperture covers ±3σ of the trace and the background starts two
    /// rows beyond it.
    pub fn apply_geometry(&self, config: &mut ReductionConfig) {
        let hw = (3.0 * self.trace_sigma).ceil() as usize;
        let centre = self.trace_y.round() as usize;
        config.src_ypos = self.trace_y;
        config.src_xpos = (self.width / 2) as f64;
        config.spec_hw = hw.max(1);
        config.bg_y1 = centre.saturating_sub(hw + 2);
        config.bg_y2 = (centre + hw + 3).min(self.height);
        config.bg_x1 = 0;
        config.bg_x2 = self.width;
        config.xwindow = None;
        config.ywindow = None;
    }
}
