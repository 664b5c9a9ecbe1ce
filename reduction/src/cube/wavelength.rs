//! Wavelength solutions.
//!
//! Filters with a fitted dispersion polynomial or a single photometric
//! wavelength are resolved from a static table once, at cube assembly.

use crate::error::{ReductionError, Result};
use ndarray::{Array1, Array2};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Wavelength of every pixel in a segment, in microns.
#[derive(Debug, Clone, PartialEq)]
pub enum Wavelength {
    /// Per-pixel grid `[y, x]` for spectroscopy
    Grid(Array2<f64>),
    /// One value per column for photometry (constant along x in practice)
    Photometric(Array1<f64>),
}

impl Wavelength {
    /// Wavelength of each column, taking the middle row of a 2-D grid.
    pub fn per_column(&self) -> Array1<f64> {
        match self {
            Wavelength::Grid(grid) => grid.row(grid.nrows() / 2).to_owned(),
            Wavelength::Photometric(wave) => wave.clone(),
        }
    }
}

/// Entry of the filter table.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterWavelength {
    /// `λ(X) = Σ c_k X'^k` with `X' = (X + offset - pivot) / 1000`
    Polynomial {
        pivot: f64,
        coeffs: &'static [f64],
    },
    /// Single wavelength for an imaging filter
    Constant(f64),
}

static FILTER_WAVELENGTHS: Lazy<HashMap<&'static str, FilterWavelength>> = Lazy::new(|| {
    HashMap::from([
        (
            "F322W2",
            FilterWavelength::Polynomial {
                pivot: 1571.0,
                coeffs: &[
                    3.9269369110332657,
                    0.9811653393151226,
                    0.001666535535484272,
                    -0.002874123523765872,
                ],
            },
        ),
        (
            "F444W",
            FilterWavelength::Polynomial {
                pivot: 852.0756,
                coeffs: &[3.928041104137344, 0.979649332832983],
            },
        ),
        ("F210M", FilterWavelength::Constant(2.095)),
        ("F187N", FilterWavelength::Constant(1.874)),
        ("WLP4", FilterWavelength::Constant(2.121)),
        ("F212N", FilterWavelength::Constant(2.121)),
    ])
});

/// Look up a filter in the wavelength table.
pub fn lookup_filter(filter: &str) -> Result<&'static FilterWavelength> {
    FILTER_WAVELENGTHS
        .get(filter.trim())
        .ok_or_else(|| ReductionError::UnknownFilter(filter.to_string()))
}

impl FilterWavelength {
    /// Evaluate at detector column `x` (untrimmed pixel index plus offset).
    pub fn eval(&self, x: f64, pixel_offset: f64) -> f64 {
        match self {
            FilterWavelength::Polynomial { pivot, coeffs } => {
                let xp = (x + pixel_offset - pivot) / 1000.0;
                coeffs.iter().rev().fold(0.0, |acc, &c| acc * xp + c)
            }
            FilterWavelength::Constant(w) => *w,
        }
    }

    /// Build a `[height, width]` grid, evaluating per column and repeating along y.
    pub fn grid(&self, height: usize, width: usize, pixel_offset: f64) -> Array2<f64> {
        let row: Vec<f64> = (0..width)
            .map(|x| self.eval(x as f64, pixel_offset))
            .collect();
        Array2::from_shape_fn((height, width), |(_, x)| row[x])
    }

    /// Constant per-column wavelength for photometry.
    pub fn photometric(&self, width: usize) -> Result<Array1<f64>> {
        match self {
            FilterWavelength::Constant(w) => Ok(Array1::from_elem(width, *w)),
            FilterWavelength::Polynomial { .. } => Err(ReductionError::InvalidConfig(
                "photometric segment uses a spectroscopic filter".to_string(),
            )),
        }
    }
}
