//! Aperture cuts and boxcar spectra.
//!
//! The aperture spans rows `floor(y - hw)` to `floor(y + hw + 1)` (exclusive)
//! around the source. A boxcar spectrum sums the unmasked pixels of the
//! aperture along y for every integration and column, and sums their squared
//! errors for the variance. Masked pixels are left out of both sums.

use crate::cube::{FluxUnits, ImageCube};
use crate::error::{ReductionError, Result};
use crate::image_proc::median_frame::MedianFrame;
use log::info;
use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayView3, Axis, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Trace position of one spectral order, in native (not super-sampled) pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderGeometry {
    pub order: i32,
    pub src_ypos: f64,
    pub spec_hw: usize,
}

/// Aperture rows for a source at `source_y` with half-width `half_width`.
pub fn aperture_rows(source_y: f64, half_width: usize, height: usize) -> Result<Range<usize>> {
    let start = (source_y - half_width as f64).floor();
    let end = (source_y + half_width as f64 + 1.0).floor();
    let out_of_bounds = || ReductionError::ApertureOutOfBounds {
        start: start as i64,
        end: end as i64,
        height,
    };

    if !start.is_finite()
        || !end.is_finite()
        || start < 0.0
        || end > height as f64
        || start >= end
    {
        return Err(out_of_bounds());
    }
    Ok(start as usize..end as usize)
}

/// Borrowed view of every per-pixel quantity inside the aperture.
#[derive(Debug, Clone)]
pub struct ApertureSlice<'a> {
    pub rows: Range<usize>,
    pub flux: ArrayView3<'a, f64>,
    pub err: ArrayView3<'a, f64>,
    pub mask: ArrayView3<'a, bool>,
    pub bg: ArrayView3<'a, f64>,
    pub v0: ArrayView3<'a, f64>,
    pub medflux: ArrayView2<'a, f64>,
}

/// Cut the aperture out of the cube, its background and its median frame.
pub fn cut_aperture<'a>(
    cube: &'a ImageCube,
    background: &'a Array3<f64>,
    median: &'a MedianFrame,
    source_y: f64,
    half_width: usize,
) -> Result<ApertureSlice<'a>> {
    let shape = cube.shape();
    shape.check("background", background)?;
    if median.flux.dim() != (shape.height, shape.width) {
        return Err(ReductionError::shape_mismatch(
            "medflux",
            &[shape.height, shape.width],
            median.flux.shape(),
        ));
    }

    let rows = aperture_rows(source_y, half_width, shape.height)?;
    let cube_rows = s![.., rows.clone(), ..];

    Ok(ApertureSlice {
        flux: cube.flux().slice(&cube_rows),
        err: cube.err().slice(&cube_rows),
        mask: cube.mask().slice(&cube_rows),
        bg: background.slice(&cube_rows),
        v0: cube.v0().slice(&cube_rows),
        medflux: median.flux.slice(s![rows.clone(), ..]),
        rows,
    })
}

/// Boxcar spectrum of one aperture, `(t, x)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub time: Array1<f64>,
    pub wavelength: Array1<f64>,
    pub flux: Array2<f64>,
    pub variance: Array2<f64>,
    pub units: FluxUnits,
    /// Half-width the aperture was cut with, in the cube's pixel grid
    pub half_width: usize,
    pub order: Option<i32>,
}

/// Flux and variance of a spectrum summed over wavelength.
#[derive(Debug, Clone, PartialEq)]
pub struct WhiteLight {
    pub time: Array1<f64>,
    pub flux: Array1<f64>,
    pub variance: Array1<f64>,
}

impl Spectrum {
    pub fn n_int(&self) -> usize {
        self.flux.nrows()
    }

    /// Collapse to one flux and variance per integration.
    pub fn white_light(&self) -> WhiteLight {
        WhiteLight {
            time: self.time.clone(),
            flux: self.flux.sum_axis(Axis(1)),
            variance: self.variance.sum_axis(Axis(1)),
        }
    }
}

/// Sum the unmasked aperture pixels along y.
///
/// Returns `(flux, variance)` shaped `(t, x)`. A column masked over the whole
/// aperture at some integration gets 0.0 for both.
pub fn standard_spectrum(aperture: &ApertureSlice) -> (Array2<f64>, Array2<f64>) {
    let (n_int, _, width) = aperture.flux.dim();
    let mut flux = Array2::zeros((n_int, width));
    let mut variance = Array2::zeros((n_int, width));

    Zip::from(&mut flux)
        .and(&mut variance)
        .and(aperture.flux.lanes(Axis(1)))
        .and(aperture.err.lanes(Axis(1)))
        .and(aperture.mask.lanes(Axis(1)))
        .par_for_each(|f, v, flux_lane, err_lane, mask_lane| {
            for ((&value, &e), &bad) in flux_lane
                .iter()
                .zip(err_lane.iter())
                .zip(mask_lane.iter())
            {
                if !bad && value.is_finite() && e.is_finite() {
                    *f += value;
                    *v += e * e;
                }
            }
        });

    (flux, variance)
}

/// Cut an aperture and build its spectrum.
pub fn extract(
    cube: &ImageCube,
    background: &Array3<f64>,
    median: &MedianFrame,
    source_y: f64,
    half_width: usize,
    order: Option<i32>,
) -> Result<Spectrum> {
    let aperture = cut_aperture(cube, background, median, source_y, half_width)?;
    let (flux, variance) = standard_spectrum(&aperture);

    Ok(Spectrum {
        time: cube.time().clone(),
        wavelength: cube.wavelength().per_column(),
        flux,
        variance,
        units: cube.units().clone(),
        half_width,
        order,
    })
}

/// Map a native-pixel trace position and half-width onto the cube's grid.
fn scaled(cube: &ImageCube, source_y: f64, half_width: usize) -> (f64, usize) {
    let factor = cube.super_sample_factor().unwrap_or(1);
    let f = factor as f64;
    ((source_y + 0.5) * f - 0.5, half_width * factor)
}

/// Extract every spectral order independently.
///
/// Orders are cut in parallel; the result follows the order of `orders`.
pub fn extract_orders(
    cube: &ImageCube,
    background: &Array3<f64>,
    median: &MedianFrame,
    orders: &[OrderGeometry],
) -> Result<Vec<Spectrum>> {
    orders
        .par_iter()
        .map(|geometry| {
            let (source_y, half_width) = scaled(cube, geometry.src_ypos, geometry.spec_hw);
            info!("  Extracting order {}...", geometry.order);
            extract(cube, background, median, source_y, half_width, Some(geometry.order))
        })
        .collect()
}

/// Re-extract the main trace for each half-width of a sweep (native pixels).
pub fn sweep_half_widths(
    cube: &ImageCube,
    background: &Array3<f64>,
    median: &MedianFrame,
    native_source_y: f64,
    half_widths: &[usize],
) -> Result<Vec<Spectrum>> {
    half_widths
        .par_iter()
        .map(|&hw| {
            let (source_y, half_width) = scaled(cube, native_source_y, hw);
            extract(cube, background, median, source_y, half_width, None)
        })
        .collect()
}
