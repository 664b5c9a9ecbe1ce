//! Sampling helpers shared by the cube and median-frame code.
//!
//! - **Clamped linear interpolation**: fills dead pixels along a row and
//!   resamples wavelength grids onto super-sampled rows
//! - **Evenly spaced samples**: synthetic time axes

use thiserror::Error;

/// Errors from interpolating over a set of known samples.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpError {
    #[error("Need at least 2 known samples to interpolate, got {0}")]
    TooFewSamples(usize),
    #[error("Sample positions ({0}) and values ({1}) differ in length")]
    LengthMismatch(usize, usize),
    #[error("Sample positions must increase strictly, position {0} does not")]
    NotIncreasing(usize),
}

fn check_samples(positions: &[f64], values: &[f64]) -> Result<(), InterpError> {
    if positions.len() != values.len() {
        return Err(InterpError::LengthMismatch(positions.len(), values.len()));
    }
    if positions.len() < 2 {
        return Err(InterpError::TooFewSamples(positions.len()));
    }
    match positions.windows(2).position(|w| w[1] <= w[0]) {
        Some(i) => Err(InterpError::NotIncreasing(i + 1)),
        None => Ok(()),
    }
}

/// Linear interpolation at `x`, holding the end values outside the samples.
///
/// # Examples
///
/// ```rust
/// use reduction::algo::interp_clamped;
///
/// // Row with a dead pixel at x = 2
/// let known_x = [0.0, 1.0, 3.0];
/// let known_flux = [4.0, 6.0, 10.0];
/// assert_eq!(interp_clamped(2.0, &known_x, &known_flux).unwrap(), 8.0);
/// assert_eq!(interp_clamped(5.0, &known_x, &known_flux).unwrap(), 10.0);
/// ```
pub fn interp_clamped(x: f64, positions: &[f64], values: &[f64]) -> Result<f64, InterpError> {
    check_samples(positions, values)?;

    let last = positions.len() - 1;
    if x <= positions[0] {
        return Ok(values[0]);
    }
    if x >= positions[last] {
        return Ok(values[last]);
    }

    // First sample strictly right of x; x lies inside the range so 1 <= hi <= last
    let hi = positions.partition_point(|&p| p <= x);
    let (x0, x1) = (positions[hi - 1], positions[hi]);
    let weight = (x - x0) / (x1 - x0);
    Ok(values[hi - 1] * (1.0 - weight) + values[hi] * weight)
}

/// `n` evenly spaced samples from `start` to `end` inclusive.
///
/// A single sample returns `[start]`; zero samples return an empty vector.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}
