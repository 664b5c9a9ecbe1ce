//! Mask-aware statistics.
//!
//! Every reduction here takes a value lane together with its bad-pixel lane
//! (`true` = excluded) and only ever looks at unmasked, finite values. Nothing
//! in the crate computes a median or spread over a lane any other way.

use ndarray::ArrayView1;

/// Collect the unmasked, finite values of a lane.
pub fn good_values(values: ArrayView1<f64>, mask: ArrayView1<bool>) -> Vec<f64> {
    values
        .iter()
        .zip(mask.iter())
        .filter(|(v, &m)| !m && v.is_finite())
        .map(|(&v, _)| v)
        .collect()
}

/// Median of a slice, reordering it in place.
///
/// Even-length input returns the mean of the two middle values. Returns `None`
/// for an empty slice.
pub fn median_in_place(values: &mut [f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }

    let mid = n / 2;
    let (lower, upper_mid, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper = *upper_mid;

    if n % 2 == 1 {
        Some(upper)
    } else {
        let lower_max = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(0.5 * (lower_max + upper))
    }
}

/// Median of the unmasked values of a lane.
pub fn masked_median(values: ArrayView1<f64>, mask: ArrayView1<bool>) -> Option<f64> {
    median_in_place(&mut good_values(values, mask))
}

/// Population mean and standard deviation (`ddof = 0`).
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

/// Inverse-variance weighted mean of the unmasked values of a lane.
///
/// Pixels with a non-positive or non-finite uncertainty carry no weight.
/// Returns `None` when no pixel carries weight.
pub fn weighted_mean(
    values: ArrayView1<f64>,
    errors: ArrayView1<f64>,
    mask: ArrayView1<bool>,
) -> Option<f64> {
    let mut sum = 0.0;
    let mut weight_sum = 0.0;

    for ((&v, &e), &m) in values.iter().zip(errors.iter()).zip(mask.iter()) {
        if m || !v.is_finite() || !e.is_finite() || e <= 0.0 {
            continue;
        }
        let w = 1.0 / (e * e);
        sum += v * w;
        weight_sum += w;
    }

    if weight_sum > 0.0 {
        Some(sum / weight_sum)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median_in_place(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median_in_place(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median_in_place(&mut []), None);
    }

    #[test]
    fn test_masked_median_skips_flagged_and_nan() {
        let values = array![1.0, 100.0, 2.0, f64::NAN, 3.0];
        let mask = array![false, true, false, false, false];
        assert_eq!(masked_median(values.view(), mask.view()), Some(2.0));
    }

    #[test]
    fn test_masked_median_all_masked() {
        let values = array![1.0, 2.0];
        let mask = array![true, true];
        assert_eq!(masked_median(values.view(), mask.view()), None);
    }

    #[test]
    fn test_mean_std_population() {
        let (mean, std) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_relative_eq!(mean, 5.0);
        assert_relative_eq!(std, 2.0);
    }

    #[test]
    fn test_weighted_mean() {
        let values = array![1.0, 3.0, 1000.0, 50.0];
        let errors = array![1.0, 1.0, 1.0, 0.0];
        let mask = array![false, false, true, false];
        // Masked and zero-error pixels drop out, equal weights remain
        assert_relative_eq!(
            weighted_mean(values.view(), errors.view(), mask.view()).unwrap(),
            2.0
        );

        let errors = array![1.0, 2.0, 1.0, 1.0];
        let mask = array![false, false, true, true];
        // weights 1 and 1/4
        assert_relative_eq!(
            weighted_mean(values.view(), errors.view(), mask.view()).unwrap(),
            (1.0 + 3.0 * 0.25) / 1.25
        );
    }

    #[test]
    fn test_weighted_mean_no_weight() {
        let values = array![1.0, 3.0];
        let errors = array![1.0, 1.0];
        let mask = array![true, true];
        assert_eq!(weighted_mean(values.view(), errors.view(), mask.view()), None);
    }
}
