//! Polynomial background fits over background-only rows or columns.
//!
//! Each line (a column for [`BackgroundDirection::ColumnByColumn`], a row for
//! [`BackgroundDirection::RowByRow`]) is fitted independently using only its
//! unmasked pixels outside `[lower, upper)`. The worst residual is rejected and
//! the fit repeated until no residual exceeds `threshold` times the residual
//! standard deviation. Rejected pixels are flagged in the returned mask.
//!
//! A line whose background keeps too few good pixels is degenerate: its
//! background is set to 0.0 and every pixel on it is flagged.

use crate::algo::polyfit::Polynomial;
use crate::algo::stats::{mean_std, median_in_place};
use crate::config::ReductionConfig;
use crate::cube::ImageCube;
use crate::error::{ReductionError, Result};
use log::{info, warn};
use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis, Zip};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Orientation of the independent background fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundDirection {
    /// Fit along x for every row, background columns `< bg_x1` or `>= bg_x2`
    RowByRow,
    /// Fit along y for every column, background rows `< bg_y1` or `>= bg_y2`
    ColumnByColumn,
}

impl BackgroundDirection {
    /// Array axis a fitted line runs along in a `(y, x)` frame.
    fn line_axis(self) -> Axis {
        match self {
            BackgroundDirection::RowByRow => Axis(1),
            BackgroundDirection::ColumnByColumn => Axis(0),
        }
    }
}

impl FromStr for BackgroundDirection {
    type Err = ReductionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RxR" => Ok(BackgroundDirection::RowByRow),
            "CxC" => Ok(BackgroundDirection::ColumnByColumn),
            other => Err(ReductionError::InvalidConfig(format!(
                "unknown background direction '{other}', choose between 'RxR' or 'CxC'"
            ))),
        }
    }
}

/// Parameters shared by every line fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundFit {
    pub direction: BackgroundDirection,
    pub deg: usize,
    pub threshold: f64,
    pub min_good_frac: f64,
}

impl BackgroundFit {
    pub fn from_config(config: &ReductionConfig) -> Self {
        Self {
            direction: config.bg_dir,
            deg: config.bg_deg,
            threshold: config.p3thresh,
            min_good_frac: config.bg_min_good_frac,
        }
    }
}

/// Fitted background of one frame.
#[derive(Debug, Clone)]
pub struct FrameBackground {
    pub background: Array2<f64>,
    pub mask: Array2<bool>,
    pub degenerate_lines: usize,
}

/// Fitted background of a whole cube.
#[derive(Debug, Clone)]
pub struct CubeBackground {
    pub background: Array3<f64>,
    /// Input mask plus rejected and degenerate pixels
    pub mask: Array3<bool>,
    pub degenerate_lines: usize,
}

/// Fit one line in place. Returns true when the line was degenerate.
fn fit_line(
    values: ArrayView1<f64>,
    mut mask: ArrayViewMut1<bool>,
    mut out: ArrayViewMut1<f64>,
    bounds: (usize, usize),
    fit: &BackgroundFit,
) -> bool {
    let (lower, upper) = bounds;
    let in_region = |i: usize| i < lower || i >= upper;

    let n_region = (0..values.len()).filter(|&i| in_region(i)).count();
    let mut points: Vec<usize> = (0..values.len())
        .filter(|&i| in_region(i) && !mask[i] && values[i].is_finite())
        .collect();

    let too_few = |n: usize| n < fit.deg + 1 || n as f64 <= fit.min_good_frac * n_region as f64;
    if too_few(points.len()) {
        out.fill(0.0);
        mask.fill(true);
        return true;
    }

    let model = loop {
        let Some(model) = fit_model(&values, &points, fit.deg) else {
            out.fill(0.0);
            mask.fill(true);
            return true;
        };

        let residuals: Vec<f64> = points
            .iter()
            .map(|&i| values[i] - model.eval(i as f64))
            .collect();
        let Some((_, std)) = mean_std(&residuals) else {
            break model;
        };
        let scale = points
            .iter()
            .map(|&i| values[i].abs())
            .fold(1.0_f64, f64::max);
        // Exact fits leave only rounding noise
        if !(std > 1e-12 * scale) {
            break model;
        }

        let (worst, worst_res) = residuals
            .iter()
            .enumerate()
            .map(|(k, r)| (k, r.abs()))
            .fold((0, f64::NEG_INFINITY), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
        if worst_res / std <= fit.threshold {
            break model;
        }

        mask[points[worst]] = true;
        points.remove(worst);
        if too_few(points.len()) {
            out.fill(0.0);
            mask.fill(true);
            return true;
        }
    };

    for (i, o) in out.iter_mut().enumerate() {
        *o = model.eval(i as f64);
    }
    false
}

fn fit_model(values: &ArrayView1<f64>, points: &[usize], deg: usize) -> Option<Polynomial> {
    if deg == 0 {
        let mut ys: Vec<f64> = points.iter().map(|&i| values[i]).collect();
        return median_in_place(&mut ys).map(Polynomial::constant);
    }
    let xs: Vec<f64> = points.iter().map(|&i| i as f64).collect();
    let ys: Vec<f64> = points.iter().map(|&i| values[i]).collect();
    Polynomial::fit(&xs, &ys, deg)
}

fn check_bounds(bounds: (usize, usize), len: usize) -> Result<()> {
    if bounds.0 > bounds.1 || bounds.1 > len {
        return Err(ReductionError::BackgroundRegionOutOfBounds {
            lower: bounds.0,
            upper: bounds.1,
            len,
        });
    }
    Ok(())
}

fn fit_frame_into(
    image: ArrayView2<f64>,
    mut mask: ArrayViewMut2<bool>,
    mut background: ArrayViewMut2<f64>,
    bounds: (usize, usize),
    fit: &BackgroundFit,
) -> usize {
    let axis = fit.direction.line_axis();
    let degenerate = AtomicUsize::new(0);

    Zip::from(image.lanes(axis))
        .and(mask.lanes_mut(axis))
        .and(background.lanes_mut(axis))
        .par_for_each(|values, line_mask, out| {
            if fit_line(values, line_mask, out, bounds, fit) {
                degenerate.fetch_add(1, Ordering::Relaxed);
            }
        });

    degenerate.into_inner()
}

/// Fit the background of one `(y, x)` frame.
///
/// `bounds` are the rows (column-wise fits) or columns (row-wise fits) that
/// bracket the source; everything outside them is background.
pub fn fit_background(
    image: ArrayView2<f64>,
    mask: ArrayView2<bool>,
    bounds: (usize, usize),
    fit: &BackgroundFit,
) -> Result<FrameBackground> {
    if image.shape() != mask.shape() {
        return Err(ReductionError::shape_mismatch(
            "mask",
            image.shape(),
            mask.shape(),
        ));
    }
    check_bounds(bounds, image.len_of(fit.direction.line_axis()))?;

    let mut out_mask = mask.to_owned();
    let mut background = Array2::zeros(image.raw_dim());
    let degenerate_lines =
        fit_frame_into(image, out_mask.view_mut(), background.view_mut(), bounds, fit);

    Ok(FrameBackground {
        background,
        mask: out_mask,
        degenerate_lines,
    })
}

/// Fit the background of every integration of the cube.
///
/// Bounds come from the cube geometry: `bg_y1`/`bg_y2` for column-wise fits,
/// `bg_x1`/`bg_x2` for row-wise fits. The cube itself is not modified.
pub fn fit_background_cube(cube: &ImageCube, fit: &BackgroundFit) -> Result<CubeBackground> {
    info!("  Performing background subtraction...");

    let geometry = cube.geometry();
    let shape = cube.shape();
    let (bounds, len) = match fit.direction {
        BackgroundDirection::ColumnByColumn => ((geometry.bg_y1, geometry.bg_y2), shape.height),
        BackgroundDirection::RowByRow => ((geometry.bg_x1, geometry.bg_x2), shape.width),
    };
    check_bounds(bounds, len)?;

    let mut mask = cube.mask().clone();
    let mut background = shape.filled(0.0);
    let degenerate = AtomicUsize::new(0);

    Zip::from(cube.flux().axis_iter(Axis(0)))
        .and(mask.axis_iter_mut(Axis(0)))
        .and(background.axis_iter_mut(Axis(0)))
        .par_for_each(|frame, frame_mask, frame_bg| {
            let n = fit_frame_into(frame, frame_mask, frame_bg, bounds, fit);
            degenerate.fetch_add(n, Ordering::Relaxed);
        });

    let degenerate_lines = degenerate.into_inner();
    if degenerate_lines > 0 {
        warn!(
            "    {degenerate_lines} background lines had too few good pixels and were masked"
        );
    }

    Ok(CubeBackground {
        background,
        mask,
        degenerate_lines,
    })
}

/// Subtract a fitted background from the cube flux.
pub fn subtract_background(cube: &mut ImageCube, background: &Array3<f64>) -> Result<()> {
    cube.shape().check("background", background)?;
    *cube.flux_mut() -= background;
    Ok(())
}
