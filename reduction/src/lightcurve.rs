//! Joining spectra from independently reduced segments.

use crate::cube::time::check_strictly_increasing;
use crate::error::{ReductionError, Result};
use crate::image_proc::aperture::Spectrum;
use ndarray::{concatenate, Axis};

/// Concatenate segment spectra into one time-ordered spectrum.
///
/// Segments may arrive in any order; they are sorted by their first
/// timestamp. Empty segments are dropped. All segments must share the same
/// wavelength axis length and flux units, and the joined time axis must be
/// strictly increasing (overlapping segments fail with
/// [`ReductionError::NonMonotonicTime`]).
pub fn concatenate_segments(mut segments: Vec<Spectrum>) -> Result<Spectrum> {
    segments.retain(|s| !s.time.is_empty());
    if segments.is_empty() {
        return Err(ReductionError::InvalidConfig(
            "no non-empty segments to concatenate".to_string(),
        ));
    }
    segments.sort_by(|a, b| a.time[0].total_cmp(&b.time[0]));

    let first = &segments[0];
    let width = first.wavelength.len();
    for segment in &segments[1..] {
        if segment.wavelength.len() != width || segment.flux.ncols() != width {
            return Err(ReductionError::shape_mismatch(
                "wavelength",
                &[width],
                &[segment.wavelength.len()],
            ));
        }
        if segment.units != first.units {
            return Err(ReductionError::InvalidConfig(format!(
                "cannot join segments in {} and {}",
                first.units, segment.units
            )));
        }
    }

    let time_views: Vec<_> = segments.iter().map(|s| s.time.view()).collect();
    let flux_views: Vec<_> = segments.iter().map(|s| s.flux.view()).collect();
    let var_views: Vec<_> = segments.iter().map(|s| s.variance.view()).collect();

    let shape_error = |_| ReductionError::shape_mismatch("flux", &[width], &[]);
    let time = concatenate(Axis(0), &time_views).map_err(shape_error)?;
    let flux = concatenate(Axis(0), &flux_views).map_err(shape_error)?;
    let variance = concatenate(Axis(0), &var_views).map_err(shape_error)?;

    if let Some(slice) = time.as_slice() {
        check_strictly_increasing(slice)?;
    }

    Ok(Spectrum {
        time,
        wavelength: first.wavelength.clone(),
        flux,
        variance,
        units: first.units.clone(),
        half_width: first.half_width,
        order: first.order,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::FluxUnits;
    use ndarray::{Array1, Array2};

    fn segment(start: f64, n: usize, width: usize) -> Spectrum {
        Spectrum {
            time: Array1::from_iter((0..n).map(|i| start + i as f64)),
            wavelength: Array1::linspace(3.0, 4.0, width),
            flux: Array2::from_elem((n, width), start),
            variance: Array2::from_elem((n, width), 1.0),
            units: FluxUnits::MegaJanskyPerSteradian,
            half_width: 2,
            order: None,
        }
    }

    #[test]
    fn test_segments_reordered() {
        let joined =
            concatenate_segments(vec![segment(10.0, 3, 4), segment(0.0, 5, 4), segment(5.0, 2, 4)])
                .unwrap();
        assert_eq!(joined.n_int(), 10);
        assert_eq!(joined.time.to_vec(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 10.0, 11.0, 12.0]);
        assert_eq!(joined.flux[[5, 0]], 5.0);
        assert_eq!(joined.flux[[9, 3]], 10.0);
    }

    #[test]
    fn test_overlap_rejected() {
        let err = concatenate_segments(vec![segment(0.0, 5, 4), segment(3.0, 5, 4)]).unwrap_err();
        assert!(matches!(err, ReductionError::NonMonotonicTime(_)));
    }

    #[test]
    fn test_mismatched_segments_rejected() {
        let err = concatenate_segments(vec![segment(0.0, 2, 4), segment(5.0, 2, 5)]).unwrap_err();
        assert!(matches!(err, ReductionError::ShapeMismatch { .. }));

        let mut calibrated = segment(5.0, 2, 4);
        calibrated.units = FluxUnits::MilliJansky;
        assert!(concatenate_segments(vec![segment(0.0, 2, 4), calibrated]).is_err());
        assert!(concatenate_segments(vec![segment(0.0, 0, 4)]).is_err());
    }
}
