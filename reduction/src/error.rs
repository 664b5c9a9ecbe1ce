//! Error taxonomy for the reduction core.
//!
//! Only structural and configuration problems are errors. Statistical anomalies
//! (degenerate background fits, pixels masked at every time step, missing
//! timestamps) are absorbed into the mask and reported through
//! [`crate::pipeline::SegmentDiagnostics`] instead.

use crate::algo::misc::InterpError;
use crate::cube::units::FluxUnits;
use thiserror::Error;

/// Errors that abort a reduction segment.
#[derive(Error, Debug)]
pub enum ReductionError {
    #[error("Unsupported 1/f correction method '{0}', choose between 'meanerr' or 'median'")]
    UnknownNoiseMethod(String),

    #[error("Super-sampling has already been applied to this segment (factor {0})")]
    AlreadySuperSampled(usize),

    #[error("Flux has already been converted to {0}")]
    AlreadyCalibrated(FluxUnits),

    #[error("Aperture rows [{start}, {end}) exceed detector height {height}")]
    ApertureOutOfBounds { start: i64, end: i64, height: usize },

    #[error("Background bounds [{lower}, {upper}) are invalid for an axis of length {len}")]
    BackgroundRegionOutOfBounds {
        lower: usize,
        upper: usize,
        len: usize,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No wavelength solution known for filter '{0}'")]
    UnknownFilter(String),

    #[error("Shape mismatch: {name} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        name: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Time axis is not strictly increasing at index {0}")]
    NonMonotonicTime(usize),

    #[error("Interpolation failed: {0}")]
    Interp(#[from] InterpError),

    #[error("Failed to read configuration file: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl ReductionError {
    /// True for the fatal configuration class (bad selector, repeated
    /// super-sampling or unit conversion, out-of-range windows).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ReductionError::UnknownNoiseMethod(_)
                | ReductionError::AlreadySuperSampled(_)
                | ReductionError::AlreadyCalibrated(_)
                | ReductionError::ApertureOutOfBounds { .. }
                | ReductionError::BackgroundRegionOutOfBounds { .. }
                | ReductionError::InvalidConfig(_)
                | ReductionError::UnknownFilter(_)
                | ReductionError::ConfigIo(_)
                | ReductionError::ConfigParse(_)
        )
    }

    pub(crate) fn shape_mismatch(name: &'static str, expected: &[usize], found: &[usize]) -> Self {
        ReductionError::ShapeMismatch {
            name,
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReductionError>;
