//! Iterative sigma clipping along the time axis.
//!
//! For every spatial location (a lane along axis 0), each entry of the
//! threshold list is one pass: the median and spread of the still-good values
//! are computed, and any good value further than `thresh * spread` from the
//! median is flagged. The spread is the population standard deviation of the
//! good values unless a fixed estimate is supplied for that pass. Passes only
//! ever add flags, so the result is the union of all passes and of the input
//! mask.
//!
//! Non-finite values are flagged up front. A lane whose values are all flagged
//! is left alone, and a pass with zero spread flags nothing at that lane.
//! Values exactly at the threshold are kept.

use crate::algo::stats::{mean_std, median_in_place};
use crate::cube::ImageCube;
use crate::error::{ReductionError, Result};
use log::info;
use ndarray::{s, Array, Array2, ArrayView, ArrayView1, ArrayViewMut1, Axis, Dimension, Zip};

/// Sigma-clip `data` along axis 0, returning the updated mask.
///
/// `estsig`, when given, must hold one fixed spread per threshold.
pub fn sigma_reject<D>(
    data: ArrayView<f64, D>,
    mask: ArrayView<bool, D>,
    thresholds: &[f64],
    estsig: Option<&[f64]>,
) -> Result<Array<bool, D>>
where
    D: Dimension,
{
    if data.shape() != mask.shape() {
        return Err(ReductionError::shape_mismatch(
            "mask",
            data.shape(),
            mask.shape(),
        ));
    }
    if let Some(est) = estsig {
        if est.len() != thresholds.len() {
            return Err(ReductionError::InvalidConfig(format!(
                "{} fixed noise estimates given for {} thresholds",
                est.len(),
                thresholds.len()
            )));
        }
    }

    let mut out = mask.to_owned();
    if data.is_empty() || data.ndim() == 0 {
        return Ok(out);
    }

    Zip::from(data.lanes(Axis(0)))
        .and(out.lanes_mut(Axis(0)))
        .par_for_each(|values, flags| clip_lane(values, flags, thresholds, estsig));

    Ok(out)
}

fn clip_lane(
    values: ArrayView1<f64>,
    mut flags: ArrayViewMut1<bool>,
    thresholds: &[f64],
    estsig: Option<&[f64]>,
) {
    for (v, f) in values.iter().zip(flags.iter_mut()) {
        if !v.is_finite() {
            *f = true;
        }
    }

    let mut good = Vec::with_capacity(values.len());
    for (pass, &thresh) in thresholds.iter().enumerate() {
        good.clear();
        good.extend(
            values
                .iter()
                .zip(flags.iter())
                .filter(|(_, &f)| !f)
                .map(|(&v, _)| v),
        );
        if good.is_empty() {
            return;
        }

        let spread = match estsig {
            Some(est) => est[pass],
            None => match mean_std(&good) {
                Some((_, std)) => std,
                None => return,
            },
        };
        let Some(center) = median_in_place(&mut good) else {
            return;
        };
        if !(spread.is_finite() && spread > 0.0) {
            continue;
        }

        let limit = thresh * spread;
        for (v, f) in values.iter().zip(flags.iter_mut()) {
            if !*f && (v - center).abs() > limit {
                *f = true;
            }
        }
    }
}

/// Full-frame rejection: every pixel is clipped along time.
///
/// For data with deep transits this can flag good in-transit pixels.
/// Returns the number of newly flagged pixels.
pub fn flag_full_frame(cube: &mut ImageCube, thresholds: &[f64]) -> Result<usize> {
    info!("  Performing full frame outlier rejection...");

    let flags = sigma_reject(cube.flux().view(), cube.mask().view(), thresholds, None)?;
    let newly = cube.merge_mask(&flags)?;

    info!("    Flagged {:.6}% of pixels as bad.", cube.percent_of_cube(newly));
    Ok(newly)
}

/// Background rejection for spectroscopy.
///
/// The rows below `bg_y1` and from `bg_y2` up are clipped along time as two
/// independent blocks. With `use_estsig`, the median error of each block is
/// used as the fixed spread for every pass.
pub fn flag_background(
    cube: &mut ImageCube,
    thresholds: &[f64],
    use_estsig: bool,
) -> Result<usize> {
    info!("  Performing background outlier rejection...");

    let shape = cube.shape();
    let geometry = *cube.geometry();
    if geometry.bg_y1 > geometry.bg_y2 || geometry.bg_y2 > shape.height {
        return Err(ReductionError::BackgroundRegionOutOfBounds {
            lower: geometry.bg_y1,
            upper: geometry.bg_y2,
            len: shape.height,
        });
    }

    let mut flags = cube.mask().clone();
    for rows in [s![.., ..geometry.bg_y1, ..], s![.., geometry.bg_y2.., ..]] {
        let data = cube.flux().slice(&rows);
        if data.is_empty() {
            continue;
        }
        let estsig = if use_estsig {
            let mut errs: Vec<f64> = cube
                .err()
                .slice(&rows)
                .iter()
                .copied()
                .filter(|e| e.is_finite())
                .collect();
            median_in_place(&mut errs).map(|e| vec![e; thresholds.len()])
        } else {
            None
        };
        let block = sigma_reject(data, cube.mask().slice(&rows), thresholds, estsig.as_deref())?;
        flags.slice_mut(&rows).assign(&block);
    }

    let newly = cube.merge_mask(&flags)?;
    info!("    Flagged {:.6}% of pixels as bad.", cube.percent_of_cube(newly));
    Ok(newly)
}

/// Background rejection for photometry.
///
/// Pixels whose centre lies further than `photap` from the source position
/// are gathered into a `(t, n_pixels)` block and clipped along time.
pub fn flag_background_photometry(
    cube: &mut ImageCube,
    thresholds: &[f64],
    photap: f64,
) -> Result<usize> {
    info!("  Performing background outlier rejection...");

    let shape = cube.shape();
    let geometry = *cube.geometry();
    let outside: Vec<(usize, usize)> = (0..shape.height)
        .flat_map(|y| (0..shape.width).map(move |x| (y, x)))
        .filter(|&(y, x)| {
            let dx = x as f64 - geometry.source_x;
            let dy = y as f64 - geometry.source_y;
            (dx * dx + dy * dy).sqrt() > photap
        })
        .collect();

    if outside.is_empty() {
        info!("    Flagged {:.6}% of pixels as bad.", 0.0);
        return Ok(0);
    }

    let gather = |t: usize, i: usize| {
        let (y, x) = outside[i];
        (t, y, x)
    };
    let n = outside.len();
    let data = Array2::from_shape_fn((shape.n_int, n), |(t, i)| cube.flux()[gather(t, i)]);
    let mask = Array2::from_shape_fn((shape.n_int, n), |(t, i)| cube.mask()[gather(t, i)]);

    let clipped = sigma_reject(data.view(), mask.view(), thresholds, None)?;

    let mut flags = cube.mask().clone();
    for ((t, i), &f) in clipped.indexed_iter() {
        if f {
            flags[gather(t, i)] = true;
        }
    }
    let newly = cube.merge_mask(&flags)?;

    info!("    Flagged {:.6}% of pixels as bad.", cube.percent_of_cube(newly));
    Ok(newly)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::test_cube;
    use ndarray::{Array1, Array3};

    /// Alternating ±1 series: median 0 (for even n), population std 1.
    fn alternating(n: usize) -> Array1<f64> {
        Array1::from_iter((0..n).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }))
    }

    #[test]
    fn test_single_outlier_flagged() {
        let mut series = alternating(101);
        series[50] = 20.0;
        let mask = Array1::from_elem(101, false);

        let flags = sigma_reject(series.view(), mask.view(), &[3.0], None).unwrap();
        assert_eq!(flags.iter().filter(|&&f| f).count(), 1);
        assert!(flags[50]);
    }

    #[test]
    fn test_outlier_removed_flags_nothing() {
        let series = alternating(100);
        let mask = Array1::from_elem(100, false);
        let flags = sigma_reject(series.view(), mask.view(), &[3.0, 3.0], None).unwrap();
        assert!(flags.iter().all(|&f| !f));
    }

    #[test]
    fn test_fixed_noise_estimate() {
        let mut series = alternating(100);
        series[10] = 4.0;
        let mask = Array1::from_elem(100, false);

        // Sample std is barely moved by one 4-sigma point, so 3-sigma catches it
        let flags = sigma_reject(series.view(), mask.view(), &[3.0], None).unwrap();
        assert!(flags[10]);

        // A generous fixed spread keeps it
        let flags = sigma_reject(series.view(), mask.view(), &[3.0], Some(&[2.0])).unwrap();
        assert!(!flags[10]);
    }

    #[test]
    fn test_threshold_tie_is_kept() {
        // median 0, fixed spread 1, value exactly 3 away
        let series = Array1::from(vec![-1.0, 0.0, 0.0, 1.0, 3.0, -3.0, 0.0]);
        let mask = Array1::from_elem(7, false);
        let flags = sigma_reject(series.view(), mask.view(), &[3.0], Some(&[1.0])).unwrap();
        assert!(flags.iter().all(|&f| !f));
    }

    #[test]
    fn test_zero_spread_and_all_masked() {
        let series = Array1::from_elem(10, 5.0);
        let mask = Array1::from_elem(10, false);
        let flags = sigma_reject(series.view(), mask.view(), &[1.0], None).unwrap();
        assert!(flags.iter().all(|&f| !f));

        let mask = Array1::from_elem(10, true);
        let flags = sigma_reject(series.view(), mask.view(), &[1.0], None).unwrap();
        assert!(flags.iter().all(|&f| f));
    }

    #[test]
    fn test_nan_flagged_and_empty_input() {
        let series = Array1::from(vec![1.0, f64::NAN, -1.0, 1.0]);
        let mask = Array1::from_elem(4, false);
        let flags = sigma_reject(series.view(), mask.view(), &[5.0], None).unwrap();
        assert_eq!(flags.to_vec(), vec![false, true, false, false]);

        let empty = Array3::<f64>::zeros((0, 3, 3));
        let empty_mask = Array3::from_elem((0, 3, 3), false);
        let flags = sigma_reject(empty.view(), empty_mask.view(), &[3.0], None).unwrap();
        assert_eq!(flags.dim(), (0, 3, 3));
    }

    #[test]
    fn test_shape_preserved_and_monotone() {
        let data = Array3::from_shape_fn((40, 3, 4), |(t, y, x)| {
            if (t, y, x) == (7, 1, 2) {
                500.0
            } else if t % 2 == 0 {
                1.0
            } else {
                -1.0
            }
        });
        let mut mask = Array3::from_elem((40, 3, 4), false);
        mask[[0, 0, 0]] = true;
        mask[[3, 2, 3]] = true;

        let flags = sigma_reject(data.view(), mask.view(), &[4.0, 4.0], None).unwrap();
        assert_eq!(flags.dim(), data.dim());
        assert!(flags[[7, 1, 2]]);
        for (before, after) in mask.iter().zip(flags.iter()) {
            assert!(!before || *after);
        }
    }

    #[test]
    fn test_mismatched_shapes() {
        let data = Array2::<f64>::zeros((3, 3));
        let mask = Array2::from_elem((3, 4), false);
        assert!(matches!(
            sigma_reject(data.view(), mask.view(), &[3.0], None),
            Err(ReductionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_flag_background_only_touches_background_rows() {
        let mut cube = test_cube(30, 8, 5, 0.0);
        {
            let flux = cube.flux_mut();
            for t in 0..30 {
                let v = if t % 2 == 0 { 1.0 } else { -1.0 };
                flux.index_axis_mut(Axis(0), t).fill(v);
            }
            // spikes in a background row and in the source rows
            flux[[12, 0, 1]] = 200.0;
            flux[[12, 4, 1]] = 200.0;
        }
        // test geometry: bg_y1 = 3, bg_y2 = 6
        let newly = flag_background(&mut cube, &[5.0], false).unwrap();
        assert_eq!(newly, 1);
        assert!(cube.mask()[[12, 0, 1]]);
        assert!(!cube.mask()[[12, 4, 1]]);

        let newly = flag_full_frame(&mut cube, &[5.0]).unwrap();
        assert_eq!(newly, 1);
        assert!(cube.mask()[[12, 4, 1]]);
    }

    #[test]
    fn test_flag_background_with_estsig() {
        let mut cube = test_cube(30, 8, 5, 0.0);
        {
            let flux = cube.flux_mut();
            for t in 0..30 {
                let v = if t % 2 == 0 { 1.0 } else { -1.0 };
                flux.index_axis_mut(Axis(0), t).fill(v);
            }
            flux[[3, 7, 0]] = 5.0;
        }
        // err is 1.0 everywhere and the lane median is 1, so 3-sigma flags the 5.0 point
        assert_eq!(flag_background(&mut cube, &[3.0], true).unwrap(), 1);
        assert!(cube.mask()[[3, 7, 0]]);
    }

    #[test]
    fn test_flag_background_bounds_checked() {
        let mut cube = test_cube(4, 8, 5, 0.0);
        cube.geometry_mut().bg_y2 = 9;
        assert!(matches!(
            flag_background(&mut cube, &[3.0], false),
            Err(ReductionError::BackgroundRegionOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_flag_background_photometry_skips_aperture() {
        let mut cube = test_cube(30, 9, 9, 0.0);
        {
            let flux = cube.flux_mut();
            for t in 0..30 {
                let v = if t % 2 == 0 { 1.0 } else { -1.0 };
                flux.index_axis_mut(Axis(0), t).fill(v);
            }
            flux[[5, 4, 4]] = 300.0; // source centre
            flux[[5, 0, 0]] = 300.0; // corner background
        }
        cube.geometry_mut().source_x = 4.0;
        cube.geometry_mut().source_y = 4.0;

        let newly = flag_background_photometry(&mut cube, &[5.0], 2.0).unwrap();
        assert_eq!(newly, 1);
        assert!(cube.mask()[[5, 0, 0]]);
        assert!(!cube.mask()[[5, 4, 4]]);
    }
}
