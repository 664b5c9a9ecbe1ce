//! Numeric building blocks for the reduction stages
//!
//! Mask-aware statistics, least-squares polynomials and interpolation.

pub mod misc;
pub mod polyfit;
pub mod stats;

pub use misc::{interp_clamped, linspace, InterpError};
pub use polyfit::Polynomial;
pub use stats::{good_values, masked_median, mean_std, median_in_place, weighted_mean};
