//! Straightening of curved spectral traces.
//!
//! The trace centre of each column is measured once on the time-median frame,
//! smoothed across columns by a low-order polynomial, and every column of the
//! cube is then shifted by the whole number of rows that puts its centre on
//! the source row. Whole-row shifts never resample flux.

use crate::algo::polyfit::Polynomial;
use crate::algo::stats::median_in_place;
use crate::cube::ImageCube;
use crate::error::Result;
use crate::image_proc::median_frame::{clean_median_frame, MedianFill};
use log::{debug, info, warn};
use ndarray::{ArrayView2, Axis};

/// Degree of the polynomial smoothing the measured centres.
pub const CENTRE_SMOOTHING_DEG: usize = 2;

/// Flux-weighted centroid row of each column, counting only flux above the
/// column median.
///
/// Non-finite pixels are ignored. A column without any finite value above
/// its median has no centroid.
pub fn column_centroids(frame: ArrayView2<f64>) -> Vec<Option<f64>> {
    frame
        .axis_iter(Axis(1))
        .map(|column| {
            let mut finite: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
            let level = median_in_place(&mut finite)?;

            let (mut weighted, mut total) = (0.0, 0.0);
            for (y, &v) in column.iter().enumerate() {
                if v.is_finite() && v > level {
                    weighted += (v - level) * y as f64;
                    total += v - level;
                }
            }
            (total > 0.0).then(|| weighted / total)
        })
        .collect()
}

/// Whole-row shift per column that moves its trace centre onto `source_y`.
///
/// Centres are replaced by a polynomial fit over the measured columns when
/// there are enough of them. Columns without a centroid are not shifted.
pub fn column_shifts(centroids: &[Option<f64>], source_y: f64) -> Vec<i64> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = centroids
        .iter()
        .enumerate()
        .filter_map(|(x, c)| c.map(|c| (x as f64, c)))
        .unzip();
    let smooth = Polynomial::fit(&xs, &ys, CENTRE_SMOOTHING_DEG);

    centroids
        .iter()
        .enumerate()
        .map(|(x, centroid)| {
            let centre = match (centroid, &smooth) {
                (None, _) => return 0,
                (Some(_), Some(poly)) => poly.eval(x as f64),
                (Some(c), None) => *c,
            };
            (source_y - centre).round() as i64
        })
        .collect()
}

/// Straighten the trace of a spectroscopic cube in place.
///
/// Returns the number of columns that moved. Photometric cubes are left
/// untouched.
pub fn straighten_trace(cube: &mut ImageCube) -> Result<usize> {
    if cube.is_photometry() {
        warn!("  Trace straightening only applies to spectroscopic segments, skipping");
        return Ok(0);
    }
    info!("  Straightening the trace...");

    let median = clean_median_frame(cube, MedianFill::Nan)?;
    let centroids = column_centroids(median.flux.view());
    let shifts = column_shifts(&centroids, cube.geometry().source_y);
    let vacated = cube.shift_columns(&shifts)?;

    let moved = shifts.iter().filter(|&&s| s != 0).count();
    debug!("    Shifted {moved} columns, flagging {vacated} vacated pixels");
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::{test_cube, DO_NOT_USE};
    use approx::assert_relative_eq;
    use ndarray::Array2;

    /// Unit background with a three-row trace whose centre row is `centre(x)`.
    fn tilted_frame(height: usize, width: usize, centre: impl Fn(usize) -> usize) -> Array2<f64> {
        Array2::from_shape_fn((height, width), |(y, x)| {
            let c = centre(x);
            if y == c {
                51.0
            } else if y + 1 == c || y == c + 1 {
                26.0
            } else {
                1.0
            }
        })
    }

    #[test]
    fn test_centroids_follow_the_trace() {
        let frame = tilted_frame(20, 6, |x| 5 + x);
        let centroids = column_centroids(frame.view());
        for (x, c) in centroids.iter().enumerate() {
            assert_relative_eq!(c.unwrap(), (5 + x) as f64, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_flat_or_blank_column_has_no_centroid() {
        let mut frame = tilted_frame(10, 3, |_| 4);
        frame.column_mut(1).fill(2.0);
        frame.column_mut(2).fill(f64::NAN);

        let centroids = column_centroids(frame.view());
        assert!(centroids[0].is_some());
        assert_eq!(centroids[1], None);
        assert_eq!(centroids[2], None);
    }

    #[test]
    fn test_shifts_from_smoothed_tilt() {
        let centroids: Vec<Option<f64>> =
            (0..20).map(|x| Some(10.0 + 0.1 * x as f64)).collect();
        let shifts = column_shifts(&centroids, 10.0);
        assert_eq!(shifts[0], 0);
        assert_eq!(shifts[4], 0);
        assert_eq!(shifts[19], -2);
    }

    #[test]
    fn test_unmeasured_columns_stay_put() {
        let centroids = [Some(3.0), None, Some(5.2)];
        // Two centres are too few for the smoothing fit, raw centres are used
        assert_eq!(column_shifts(&centroids, 4.0), vec![1, 0, -1]);
        assert_eq!(column_shifts(&[None, None], 4.0), vec![0, 0]);
    }

    #[test]
    fn test_tilted_trace_lands_on_source_row() {
        let (n_int, height, width) = (3, 20, 6);
        let mut cube = test_cube(n_int, height, width, 1.0);
        cube.geometry_mut().source_y = 7.0;
        let frame = tilted_frame(height, width, |x| 5 + x);
        for mut plane in cube.flux_mut().outer_iter_mut() {
            plane.assign(&frame);
        }

        let moved = straighten_trace(&mut cube).unwrap();
        assert_eq!(moved, 5);

        for t in 0..n_int {
            for x in 0..width {
                assert_eq!(cube.flux()[[t, 7, x]], 51.0);
                assert_eq!(cube.flux()[[t, 6, x]], 26.0);
                assert_eq!(cube.flux()[[t, 8, x]], 26.0);
            }
        }

        // Shifts are 2, 1, 0, -1, -2, -3 rows
        let vacated = (2 + 1 + 1 + 2 + 3) * n_int;
        assert_eq!(cube.good_pixel_count(), n_int * height * width - vacated);
        assert!(cube.mask()[[0, 0, 0]] && cube.mask()[[0, 1, 0]]);
        assert!(!cube.mask()[[0, 2, 0]]);
        assert_eq!(cube.dq()[[2, 19, 5]], DO_NOT_USE);
        assert!(!cube.mask()[[2, 16, 5]]);
    }

    #[test]
    fn test_straight_trace_is_unchanged() {
        let mut cube = test_cube(2, 12, 4, 1.0);
        let source = cube.geometry().source_y as usize;
        let frame = tilted_frame(12, 4, |_| source);
        for mut plane in cube.flux_mut().outer_iter_mut() {
            plane.assign(&frame);
        }
        let before = cube.flux().clone();

        assert_eq!(straighten_trace(&mut cube).unwrap(), 0);
        assert_eq!(cube.flux(), &before);
        assert_eq!(cube.good_pixel_count(), 2 * 12 * 4);
    }
}
