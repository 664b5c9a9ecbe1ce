//! Time-median reference frame free of bad pixels.

use crate::algo::misc::interp_clamped;
use crate::algo::stats::{masked_median, median_in_place};
use crate::cube::ImageCube;
use crate::error::{ReductionError, Result};
use log::{info, warn};
use ndarray::{Array1, Array2, ArrayViewMut1, Axis, Zip};
use std::str::FromStr;

/// How pixels masked at every integration are filled in the median frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MedianFill {
    /// Leave them NaN
    Nan,
    /// Copy the nearest filled pixel of the same row (left wins ties)
    Nearest,
    /// Linear interpolation along the row, held at the row ends
    #[default]
    Interpolate,
}

impl FromStr for MedianFill {
    type Err = ReductionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nan" => Ok(MedianFill::Nan),
            "nearest" => Ok(MedianFill::Nearest),
            "interpolate" => Ok(MedianFill::Interpolate),
            other => Err(ReductionError::InvalidConfig(format!(
                "unknown median fill '{other}', choose between 'nan', 'nearest' or 'interpolate'"
            ))),
        }
    }
}

/// Median over time of flux and error, shaped `(y, x)`.
#[derive(Debug, Clone)]
pub struct MedianFrame {
    pub flux: Array2<f64>,
    pub err: Array2<f64>,
    /// Pixels that had no good value at any integration
    pub all_masked: usize,
    /// Of those, pixels the fill policy left NaN
    pub unfilled: usize,
}

impl MedianFrame {
    /// Median of each row across x, ignoring NaN pixels.
    ///
    /// On a background-subtracted cube this traces whatever background the fit
    /// left behind along the cross-dispersion axis.
    pub fn residual_background_profile(&self) -> Array1<f64> {
        Array1::from_iter(self.flux.axis_iter(Axis(0)).map(|row| {
            let mut values: Vec<f64> = row.iter().copied().filter(|v| v.is_finite()).collect();
            median_in_place(&mut values).unwrap_or(f64::NAN)
        }))
    }
}

/// Compute the median frame of the cube, honouring its mask.
pub fn clean_median_frame(cube: &ImageCube, fill: MedianFill) -> Result<MedianFrame> {
    info!("  Computing clean median frame...");

    let shape = cube.shape();
    let mut flux = Array2::from_elem((shape.height, shape.width), f64::NAN);
    let mut err = flux.clone();

    Zip::from(&mut flux)
        .and(&mut err)
        .and(cube.flux().lanes(Axis(0)))
        .and(cube.err().lanes(Axis(0)))
        .and(cube.mask().lanes(Axis(0)))
        .par_for_each(|f, e, flux_lane, err_lane, mask_lane| {
            if let Some(m) = masked_median(flux_lane, mask_lane) {
                *f = m;
                *e = masked_median(err_lane, mask_lane).unwrap_or(f64::NAN);
            }
        });

    let all_masked = flux.iter().filter(|v| v.is_nan()).count();
    let mut unfilled = all_masked;
    if all_masked > 0 && fill != MedianFill::Nan {
        unfilled = 0;
        for (flux_row, err_row) in flux.rows_mut().into_iter().zip(err.rows_mut()) {
            unfilled += fill_row(flux_row, err_row, fill)?;
        }
    }

    if unfilled > 0 {
        warn!("    {unfilled} median frame pixels were masked at every integration and left NaN");
    }

    Ok(MedianFrame {
        flux,
        err,
        all_masked,
        unfilled,
    })
}

/// Fill the NaN pixels of one row. Returns how many stayed NaN.
fn fill_row(
    mut flux: ArrayViewMut1<f64>,
    mut err: ArrayViewMut1<f64>,
    fill: MedianFill,
) -> Result<usize> {
    let known: Vec<usize> = (0..flux.len()).filter(|&x| !flux[x].is_nan()).collect();
    let missing = flux.len() - known.len();
    if missing == 0 {
        return Ok(0);
    }
    if known.is_empty() {
        return Ok(missing);
    }

    let xs: Vec<f64> = known.iter().map(|&x| x as f64).collect();
    let flux_known: Vec<f64> = known.iter().map(|&x| flux[x]).collect();
    let err_known: Vec<f64> = known.iter().map(|&x| err[x]).collect();

    for x in 0..flux.len() {
        if !flux[x].is_nan() {
            continue;
        }
        let (f, e) = match fill {
            MedianFill::Nan => return Ok(missing),
            MedianFill::Nearest => {
                let nearest = nearest_index(&known, x);
                (flux_known[nearest], err_known[nearest])
            }
            MedianFill::Interpolate if known.len() == 1 => (flux_known[0], err_known[0]),
            MedianFill::Interpolate => (
                interp_clamped(x as f64, &xs, &flux_known)?,
                interp_clamped(x as f64, &xs, &err_known)?,
            ),
        };
        flux[x] = f;
        err[x] = e;
    }
    Ok(0)
}

fn nearest_index(known: &[usize], x: usize) -> usize {
    match known.binary_search(&x) {
        Ok(i) => i,
        Err(0) => 0,
        Err(i) if i == known.len() => i - 1,
        Err(i) => {
            if x - known[i - 1] <= known[i] - x {
                i - 1
            } else {
                i
            }
        }
    }
}
