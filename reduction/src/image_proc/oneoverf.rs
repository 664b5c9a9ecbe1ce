//! Amplifier-aware 1/f (correlated row) noise correction.
//!
//! The detector is read out by equal-width amplifiers side by side along x.
//! For each integration:
//!
//! 1. Amplifiers overlapping the trimmed window are considered.
//! 2. Columns within `exclusion` of the source (in untrimmed detector
//!    coordinates) are unusable for estimates.
//! 3. The median of the usable, unmasked pixels of each column parity is
//!    subtracted from that parity's columns.
//! 4. Per row and per amplifier, a level is estimated from the usable,
//!    unmasked pixels and subtracted from that row of the amplifier.
//!
//! An amplifier with no usable columns is left untouched by every step.

use crate::algo::stats::{masked_median, median_in_place, weighted_mean};
use crate::cube::ImageCube;
use crate::error::{ReductionError, Result};
use log::{debug, info};
use ndarray::{s, Array1, ArrayView2, ArrayViewMut2, Axis, Zip};
use std::ops::Range;
use std::str::FromStr;

/// Row level estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneOverFMethod {
    /// Inverse-variance weighted mean of the usable pixels
    MeanErr,
    /// Median of the usable pixels
    Median,
}

impl FromStr for OneOverFMethod {
    type Err = ReductionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "meanerr" => Ok(OneOverFMethod::MeanErr),
            "median" => Ok(OneOverFMethod::Median),
            other => Err(ReductionError::UnknownNoiseMethod(other.to_string())),
        }
    }
}

/// Equal-width amplifier regions across the full detector width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmplifierLayout {
    detector_width: usize,
    n_amplifiers: usize,
}

impl Default for AmplifierLayout {
    fn default() -> Self {
        Self {
            detector_width: 2048,
            n_amplifiers: 4,
        }
    }
}

impl AmplifierLayout {
    pub fn new(detector_width: usize, n_amplifiers: usize) -> Result<Self> {
        if n_amplifiers == 0 || detector_width == 0 || detector_width % n_amplifiers != 0 {
            return Err(ReductionError::InvalidConfig(format!(
                "{n_amplifiers} amplifiers cannot split a detector {detector_width} columns wide"
            )));
        }
        Ok(Self {
            detector_width,
            n_amplifiers,
        })
    }

    pub fn detector_width(&self) -> usize {
        self.detector_width
    }

    pub fn n_amplifiers(&self) -> usize {
        self.n_amplifiers
    }

    pub fn region_width(&self) -> usize {
        self.detector_width / self.n_amplifiers
    }

    /// Detector column range read by amplifier `k`.
    pub fn region(&self, k: usize) -> Range<usize> {
        let w = self.region_width();
        k * w..(k + 1) * w
    }
}

/// Column bookkeeping for one segment, shared by every integration.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPlan {
    /// Trimmed columns usable for estimates
    usable: Vec<bool>,
    /// Trimmed column ranges of the amplifiers that get corrected
    regions: Vec<Range<usize>>,
}

impl ColumnPlan {
    /// Work out usable columns and corrected amplifiers for a trimmed window.
    pub fn new(
        layout: &AmplifierLayout,
        xwindow: (usize, usize),
        source_x: f64,
        exclusion: usize,
    ) -> Result<Self> {
        let (x0, x1) = xwindow;
        if x1 <= x0 || x1 > layout.detector_width() {
            return Err(ReductionError::InvalidConfig(format!(
                "xwindow [{x0}, {x1}) does not fit a detector {} columns wide",
                layout.detector_width()
            )));
        }

        let source = source_x.floor() as i64 + x0 as i64;
        let excluded = (source - exclusion as i64)..(source + exclusion as i64);
        let usable: Vec<bool> = (x0..x1).map(|c| !excluded.contains(&(c as i64))).collect();

        let regions = (0..layout.n_amplifiers())
            .filter_map(|k| {
                let region = layout.region(k);
                let start = region.start.max(x0);
                let end = region.end.min(x1);
                if start >= end {
                    return None;
                }
                let local = (start - x0)..(end - x0);
                usable[local.clone()].iter().any(|&u| u).then_some(local)
            })
            .collect();

        Ok(Self { usable, regions })
    }

    pub fn usable(&self) -> &[bool] {
        &self.usable
    }

    pub fn regions(&self) -> &[Range<usize>] {
        &self.regions
    }

    fn in_corrected_region(&self, x: usize) -> bool {
        self.regions.iter().any(|r| r.contains(&x))
    }

    /// The plan was built for a window of a different width than `width`.
    fn check_width(&self, width: usize) -> Result<()> {
        if self.usable.len() != width {
            return Err(ReductionError::shape_mismatch(
                "xwindow",
                &[width],
                &[self.usable.len()],
            ));
        }
        Ok(())
    }
}

/// Correct one `(y, x)` frame in place.
///
/// Fails when the planes disagree in shape or the plan covers a different
/// number of columns than the frame.
pub fn correct_frame(
    flux: ArrayViewMut2<f64>,
    err: ArrayView2<f64>,
    mask: ArrayView2<bool>,
    plan: &ColumnPlan,
    method: OneOverFMethod,
) -> Result<()> {
    if err.shape() != flux.shape() {
        return Err(ReductionError::shape_mismatch("err", flux.shape(), err.shape()));
    }
    if mask.shape() != flux.shape() {
        return Err(ReductionError::shape_mismatch("mask", flux.shape(), mask.shape()));
    }
    plan.check_width(flux.ncols())?;
    apply_correction(flux, err, mask, plan, method);
    Ok(())
}

fn apply_correction(
    mut flux: ArrayViewMut2<f64>,
    err: ArrayView2<f64>,
    mask: ArrayView2<bool>,
    plan: &ColumnPlan,
    method: OneOverFMethod,
) {
    if plan.regions.is_empty() {
        return;
    }

    for parity in 0..2 {
        let mut values: Vec<f64> = flux
            .indexed_iter()
            .filter(|&((y, x), v)| {
                x % 2 == parity && plan.usable[x] && !mask[[y, x]] && v.is_finite()
            })
            .map(|(_, &v)| v)
            .collect();
        let Some(offset) = median_in_place(&mut values) else {
            continue;
        };
        for (x, mut column) in flux.axis_iter_mut(Axis(1)).enumerate() {
            if x % 2 == parity && plan.in_corrected_region(x) {
                column -= offset;
            }
        }
    }

    for region in &plan.regions {
        let usable: Vec<usize> = region.clone().filter(|&x| plan.usable[x]).collect();
        for y in 0..flux.nrows() {
            let row = flux.row(y);
            let values = Array1::from_iter(usable.iter().map(|&x| row[x]));
            let row_mask = Array1::from_iter(usable.iter().map(|&x| mask[[y, x]]));
            let level = match method {
                OneOverFMethod::MeanErr => {
                    let errors = Array1::from_iter(usable.iter().map(|&x| err[[y, x]]));
                    weighted_mean(values.view(), errors.view(), row_mask.view())
                }
                OneOverFMethod::Median => masked_median(values.view(), row_mask.view()),
            };
            if let Some(level) = level {
                flux.slice_mut(s![y, region.clone()]).mapv_inplace(|v| v - level);
            }
        }
    }
}

/// Apply the 1/f correction to every integration of the cube.
///
/// Returns the number of amplifier regions corrected per integration.
pub fn correct_one_over_f(
    cube: &mut ImageCube,
    method: OneOverFMethod,
    layout: &AmplifierLayout,
    exclusion: usize,
) -> Result<usize> {
    info!("    Correcting for 1/f noise...");

    let geometry = *cube.geometry();
    let plan = ColumnPlan::new(layout, geometry.xwindow, geometry.source_x, exclusion)?;
    debug!(
        "    1/f correction over {} of {} amplifier regions",
        plan.regions().len(),
        layout.n_amplifiers()
    );

    plan.check_width(cube.shape().width)?;

    let (mut flux, err, mask) = cube.flux_err_mask_mut();
    Zip::from(flux.axis_iter_mut(Axis(0)))
        .and(err.axis_iter(Axis(0)))
        .and(mask.axis_iter(Axis(0)))
        .par_for_each(|frame, frame_err, frame_mask| {
            apply_correction(frame, frame_err, frame_mask, &plan, method)
        });

    Ok(plan.regions().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::test_cube;
    use ndarray::Array2;

    fn small_layout() -> AmplifierLayout {
        AmplifierLayout::new(16, 4).unwrap()
    }

    /// Row noise plus a per-column ramp that differs between amplifiers.
    fn noisy_frame(height: usize, width: usize) -> Array2<f64> {
        Array2::from_shape_fn((height, width), |(y, x)| {
            ((y * 37 + 11) % 17) as f64 * 0.3 + 100.0 + (x % 3) as f64 * 1e-3
        })
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("meanerr".parse::<OneOverFMethod>().unwrap(), OneOverFMethod::MeanErr);
        assert_eq!("median".parse::<OneOverFMethod>().unwrap(), OneOverFMethod::Median);
        let err = "mean".parse::<OneOverFMethod>().unwrap_err();
        assert!(matches!(err, ReductionError::UnknownNoiseMethod(_)));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_layout() {
        let layout = AmplifierLayout::default();
        assert_eq!(layout.region(3), 1536..2048);
        assert!(AmplifierLayout::new(2048, 0).is_err());
        assert!(AmplifierLayout::new(2048, 3).is_err());
    }

    #[test]
    fn test_plan_excludes_source_and_trimmed_amplifiers() {
        let layout = AmplifierLayout::default();
        // Window covers the end of amplifier 0 and part of amplifier 1
        let plan = ColumnPlan::new(&layout, (500, 700), 100.0, 15).unwrap();
        assert_eq!(plan.usable().len(), 200);
        // Source at detector column 600 excludes [585, 615)
        assert!(plan.usable()[84]);
        assert!(!plan.usable()[85]);
        assert!(!plan.usable()[114]);
        assert!(plan.usable()[115]);
        assert_eq!(plan.regions(), &[0..12, 12..200]);

        assert!(ColumnPlan::new(&layout, (2000, 2100), 0.0, 15).is_err());
    }

    #[test]
    fn test_fully_excluded_amplifier_untouched() {
        let layout = small_layout();
        // Source at column 6 with exclusion 2 removes [4, 8) = amplifier 1
        let plan = ColumnPlan::new(&layout, (0, 16), 6.0, 2).unwrap();
        assert_eq!(plan.regions(), &[0..4, 8..12, 12..16]);

        let original = noisy_frame(6, 16);
        for method in [OneOverFMethod::Median, OneOverFMethod::MeanErr] {
            let mut flux = original.clone();
            let err = Array2::from_elem((6, 16), 1.0);
            let mask = Array2::from_elem((6, 16), false);
            correct_frame(flux.view_mut(), err.view(), mask.view(), &plan, method).unwrap();

            for y in 0..6 {
                for x in 4..8 {
                    assert_eq!(flux[[y, x]].to_bits(), original[[y, x]].to_bits());
                }
            }
            assert_ne!(flux[[0, 0]], original[[0, 0]]);
        }
    }

    #[test]
    fn test_trimmed_window_amplifier_untouched() {
        let layout = small_layout();
        // Window [2, 6) keeps the tail of amplifier 0 and the head of amplifier 1;
        // the source excludes [1, 5) in detector columns
        let plan = ColumnPlan::new(&layout, (2, 6), 1.0, 2).unwrap();
        assert_eq!(plan.regions(), &[2..4]);

        let original = noisy_frame(3, 4);
        let mut flux = original.clone();
        let err = Array2::from_elem((3, 4), 1.0);
        let mask = Array2::from_elem((3, 4), false);
        correct_frame(flux.view_mut(), err.view(), mask.view(), &plan, OneOverFMethod::Median)
            .unwrap();
        for y in 0..3 {
            assert_eq!(flux[[y, 0]].to_bits(), original[[y, 0]].to_bits());
            assert_eq!(flux[[y, 1]].to_bits(), original[[y, 1]].to_bits());
        }
    }

    #[test]
    fn test_row_noise_removed() {
        let layout = small_layout();
        let plan = ColumnPlan::new(&layout, (0, 16), 6.0, 2).unwrap();
        let row_noise = |y: usize| ((y * 7) % 5) as f64 - 2.0;

        for method in [OneOverFMethod::Median, OneOverFMethod::MeanErr] {
            let mut flux = Array2::from_shape_fn((8, 16), |(y, _)| 50.0 + row_noise(y));
            let err = Array2::from_elem((8, 16), 0.5);
            let mut mask = Array2::from_elem((8, 16), false);
            // A flagged hot pixel in a usable column must not bias the row level
            flux[[3, 9]] = 1.0e6;
            mask[[3, 9]] = true;

            correct_frame(flux.view_mut(), err.view(), mask.view(), &plan, method).unwrap();
            for ((y, x), &v) in flux.indexed_iter() {
                if (4..8).contains(&x) || (y, x) == (3, 9) {
                    continue;
                }
                assert!(v.abs() < 1e-9, "{method:?} left {v} at ({y}, {x})");
            }
        }
    }

    #[test]
    fn test_cube_correction() {
        let mut cube = test_cube(3, 4, 16, 20.0);
        let regions =
            correct_one_over_f(&mut cube, OneOverFMethod::Median, &small_layout(), 2).unwrap();
        // test geometry puts the source at column 8, excluding [6, 10)
        assert_eq!(regions, 4);
        assert!(cube.flux().iter().all(|&v| v.abs() < 1e-12));
    }

    #[test]
    fn test_window_narrower_than_frame_is_an_error() {
        let mut cube = test_cube(2, 4, 16, 1.0);
        cube.geometry_mut().xwindow = (0, 8);
        let before = cube.flux().clone();

        let err = correct_one_over_f(&mut cube, OneOverFMethod::Median, &small_layout(), 1)
            .unwrap_err();
        assert!(matches!(err, ReductionError::ShapeMismatch { name: "xwindow", .. }));
        assert_eq!(cube.flux(), &before);

        let plan = ColumnPlan::new(&small_layout(), (0, 8), 4.0, 1).unwrap();
        let mut flux = Array2::from_elem((4, 16), 1.0);
        let err = Array2::from_elem((4, 16), 1.0);
        let mask = Array2::from_elem((4, 16), false);
        let result =
            correct_frame(flux.view_mut(), err.view(), mask.view(), &plan, OneOverFMethod::MeanErr);
        assert!(matches!(result, Err(ReductionError::ShapeMismatch { .. })));
    }
}
