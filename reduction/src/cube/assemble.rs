//! Building an [`ImageCube`] from already-parsed instrument arrays.
//!
//! File ingestion is somebody else's job: the assembler receives the science,
//! error, quality and read-noise variance planes plus scalar metadata, and
//! normalises them into the canonical cube (wavelength, time axis, geometry,
//! optional super-sampling).

use super::time::{resolve_time_axis, ExposureWindow};
use super::wavelength::{lookup_filter, Wavelength};
use super::{check_window, CubeShape, FluxUnits, ImageCube, ObservingMode, SegmentGeometry};
use crate::config::ReductionConfig;
use crate::error::{ReductionError, Result};
use log::{info, warn};
use ndarray::{Array2, Array3};

/// Wavelength information delivered with the segment.
#[derive(Debug, Clone, PartialEq)]
pub enum WavelengthInput {
    /// Per-pixel wavelength grid `[y, x]` from the calibrated product
    Grid(Array2<f64>),
    /// Nothing recorded; the filter table must supply it
    Missing,
}

/// Scalar metadata of a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentMetadata {
    pub filter: String,
    pub mode: ObservingMode,
    /// Unit string of the science plane, e.g. `MJy/sr`
    pub flux_units: String,
    /// Solid angle of one native pixel in steradians
    pub pixel_area_sr: Option<f64>,
    pub int_start: Option<usize>,
    pub int_end: Option<usize>,
    pub exp_start: f64,
    pub exp_end: f64,
}

/// Parsed per-pixel arrays of one segment, all shaped `(t, y, x)`.
#[derive(Debug, Clone)]
pub struct CubeInputs {
    pub flux: Array3<f64>,
    pub err: Array3<f64>,
    pub dq: Array3<u32>,
    pub v0: Array3<f64>,
    /// Integration mid-times, if the product recorded them
    pub time: Option<Vec<f64>>,
    pub wavelength: WavelengthInput,
    pub metadata: SegmentMetadata,
}

/// Assemble, validate and (optionally) super-sample the cube for one segment.
///
/// Fails atomically: any shape, time or configuration problem returns an
/// error and no partial cube.
pub fn assemble_cube(inputs: CubeInputs, config: &ReductionConfig) -> Result<ImageCube> {
    let CubeInputs {
        flux,
        err,
        dq,
        v0,
        time,
        wavelength,
        metadata,
    } = inputs;

    let shape = CubeShape::from(&flux);
    shape.check("err", &err)?;
    shape.check("dq", &dq)?;
    shape.check("v0", &v0)?;

    let (int_start, int_end) = match (metadata.int_start, metadata.int_end) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            warn!("  WARNING: Manually setting INTSTART to 0 and INTEND to NINTS");
            (0, shape.n_int)
        }
    };
    if int_end < int_start {
        return Err(ReductionError::InvalidConfig(format!(
            "integration range [{int_start}, {int_end}) is empty"
        )));
    }

    let wavelength = resolve_wavelength(wavelength, &metadata, shape, config)?;

    let window = ExposureWindow {
        int_start,
        int_end,
        exp_start: metadata.exp_start,
        exp_end: metadata.exp_end,
    };
    let time = resolve_time_axis(time.as_deref(), &window, shape.n_int)?;

    let geometry = resolve_geometry(config, shape)?;

    let mut cube = ImageCube::new(
        flux,
        err,
        dq,
        v0,
        wavelength,
        time,
        geometry,
        metadata.filter.clone(),
        metadata.mode,
        FluxUnits::from_header(&metadata.flux_units),
        metadata.pixel_area_sr,
    )?;

    if config.expand > 1 {
        match metadata.mode {
            ObservingMode::Spectroscopy => cube.supersample(config.expand)?,
            ObservingMode::Photometry => {
                warn!(
                    "  Ignoring super-sampling factor {} for a photometric segment",
                    config.expand
                );
            }
        }
    }

    Ok(cube)
}

fn resolve_wavelength(
    input: WavelengthInput,
    metadata: &SegmentMetadata,
    shape: CubeShape,
    config: &ReductionConfig,
) -> Result<Wavelength> {
    match metadata.mode {
        ObservingMode::Photometry => {
            let solution = lookup_filter(&metadata.filter)?;
            Ok(Wavelength::Photometric(solution.photometric(shape.width)?))
        }
        ObservingMode::Spectroscopy if config.poly_wavelength => {
            let solution = lookup_filter(&metadata.filter)?;
            let offset = config.wave_pixel_offset.unwrap_or(0.0);
            if offset != 0.0 {
                info!("  Offsetting polynomial wavelength solution by {offset} pixels.");
            }
            Ok(Wavelength::Grid(solution.grid(
                shape.height,
                shape.width,
                offset,
            )))
        }
        ObservingMode::Spectroscopy => match input {
            WavelengthInput::Grid(grid) => Ok(Wavelength::Grid(grid)),
            WavelengthInput::Missing => Err(ReductionError::InvalidConfig(
                "spectroscopic segment has no wavelength grid and poly_wavelength is off"
                    .to_string(),
            )),
        },
    }
}

fn resolve_geometry(config: &ReductionConfig, shape: CubeShape) -> Result<SegmentGeometry> {
    let xwindow = config.xwindow.unwrap_or((0, shape.width));
    check_window("xwindow", xwindow, shape.width)?;
    let ywindow = config.ywindow.unwrap_or((0, shape.height));
    check_window("ywindow", ywindow, shape.height)?;

    Ok(SegmentGeometry {
        source_y: config.src_ypos,
        source_x: config.src_xpos,
        spec_hw: config.spec_hw,
        bg_y1: config.bg_y1,
        bg_y2: config.bg_y2,
        bg_x1: config.bg_x1,
        bg_x2: config.bg_x2,
        ywindow,
        xwindow,
    })
}
