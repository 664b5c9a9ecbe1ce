//! Image-to-spectrum reduction for time-series detector cubes
//!
//! This crate turns a time-ordered stack of 2-D detector images into boxcar
//! spectra. One reduction segment flows through:
//!
//! - [`cube`]: assembly, super-sampling and unit calibration of the `(t, y, x)` cube
//! - [`image_proc`]: sigma clipping, 1/f correction, background fits, median frame
//!   and aperture extraction
//! - [`pipeline`]: the stage ordering, with diagnostics for recovered anomalies
//! - [`lightcurve`]: joining segments back into one time-ordered series

pub mod algo;
pub mod config;
pub mod cube;
pub mod error;
pub mod image_proc;
pub mod lightcurve;
pub mod pipeline;
pub mod synthetic;

pub use config::ReductionConfig;
pub use cube::{assemble_cube, CubeInputs, CubeShape, ImageCube};
pub use error::{ReductionError, Result};
pub use image_proc::{Spectrum, WhiteLight};
pub use lightcurve::concatenate_segments;
pub use pipeline::{reduce_cube, reduce_segment, SegmentDiagnostics, SegmentProducts};
