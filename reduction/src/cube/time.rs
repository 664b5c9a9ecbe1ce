//! Integration mid-times for a segment.

use crate::algo::misc::linspace;
use crate::error::{ReductionError, Result};
use log::warn;
use ndarray::Array1;

/// Exposure bookkeeping needed to reconstruct a time axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureWindow {
    /// First integration of this segment within the exposure (0-based)
    pub int_start: usize,
    /// One past the last integration of this segment within the exposure
    pub int_end: usize,
    /// Exposure start time
    pub exp_start: f64,
    /// Exposure end time
    pub exp_end: f64,
}

/// Build the time axis for `n_int` integrations.
///
/// Recorded timestamps are used when present. Without them a linear axis from
/// exposure start to end with `int_end` samples is synthesised and a warning
/// logged. Either way, an axis covering the whole exposure is trimmed to
/// `[int_start, int_end)` when it is longer than the segment.
pub fn resolve_time_axis(
    recorded: Option<&[f64]>,
    window: &ExposureWindow,
    n_int: usize,
) -> Result<Array1<f64>> {
    let mut time = match recorded {
        Some(times) if !times.is_empty() => times.to_vec(),
        _ => {
            warn!(
                "  WARNING: The timestamps are not present, so using a linear time axis \
                 between exposure start and end instead."
            );
            linspace(window.exp_start, window.exp_end, window.int_end)
        }
    };

    if time.len() > n_int {
        let end = window.int_end.min(time.len());
        let start = window.int_start.min(end);
        time = time[start..end].to_vec();
    }

    if time.len() != n_int {
        return Err(ReductionError::shape_mismatch(
            "time",
            &[n_int],
            &[time.len()],
        ));
    }

    check_strictly_increasing(&time)?;
    Ok(Array1::from(time))
}

/// Fail with [`ReductionError::NonMonotonicTime`] at the first non-increasing step.
pub fn check_strictly_increasing(time: &[f64]) -> Result<()> {
    match time.windows(2).position(|w| !(w[1] > w[0])) {
        Some(i) => Err(ReductionError::NonMonotonicTime(i + 1)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn window(int_start: usize, int_end: usize) -> ExposureWindow {
        ExposureWindow {
            int_start,
            int_end,
            exp_start: 100.0,
            exp_end: 109.0,
        }
    }

    #[test]
    fn test_recorded_times_used() {
        let t = resolve_time_axis(Some(&[1.0, 2.0, 3.0]), &window(0, 3), 3).unwrap();
        assert_eq!(t.to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_missing_times_fall_back_to_linear_axis() {
        let t = resolve_time_axis(None, &window(0, 10), 10).unwrap();
        assert_eq!(t.len(), 10);
        assert_relative_eq!(t[0], 100.0);
        assert_relative_eq!(t[9], 109.0);

        let t = resolve_time_axis(Some(&[]), &window(0, 10), 10).unwrap();
        assert_relative_eq!(t[1], 101.0);
    }

    #[test]
    fn test_full_exposure_axis_trimmed_to_segment() {
        // Second segment of a 10-integration exposure
        let t = resolve_time_axis(None, &window(5, 10), 5).unwrap();
        assert_eq!(t.len(), 5);
        assert_relative_eq!(t[0], 105.0);
        assert_relative_eq!(t[4], 109.0);
    }

    #[test]
    fn test_length_mismatch_is_fatal() {
        let err = resolve_time_axis(Some(&[1.0, 2.0]), &window(0, 2), 3).unwrap_err();
        assert!(matches!(err, ReductionError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_non_monotonic_time() {
        let err = resolve_time_axis(Some(&[1.0, 3.0, 2.0]), &window(0, 3), 3).unwrap_err();
        assert!(matches!(err, ReductionError::NonMonotonicTime(2)));
    }
}
