//! Stage ordering for one reduction segment.
//!
//! assemble → calibrate → straighten trace → flag invalid → reject outliers →
//! 1/f correction → background fit and subtraction → median frame → extraction.
//!
//! The segment owns its cube from start to finish; any fatal error drops it,
//! so a failed segment never leaves a partially reduced cube behind.

use crate::config::ReductionConfig;
use crate::cube::{assemble_cube, CubeInputs, ImageCube};
use crate::error::Result;
use crate::image_proc::aperture::{extract, extract_orders, sweep_half_widths, Spectrum};
use crate::image_proc::background::{fit_background_cube, subtract_background, BackgroundFit};
use crate::image_proc::median_frame::{clean_median_frame, MedianFrame};
use crate::image_proc::oneoverf::correct_one_over_f;
use crate::image_proc::sigma_clip::{flag_background, flag_background_photometry, flag_full_frame};
use crate::image_proc::straighten::straighten_trace;
use log::{info, warn};
use ndarray::{Array1, Array3};
use serde::{Deserialize, Serialize};

/// Counts of everything the segment absorbed instead of failing on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentDiagnostics {
    /// Factor applied by the MJy/sr → mJy conversion, if it ran
    pub calibration_factor: Option<f64>,
    /// Columns moved onto the source row, if trace straightening ran
    pub straightened_columns: Option<usize>,
    /// Pixels flagged for non-finite values or quality bits
    pub invalid_pixels: usize,
    /// Pixels flagged by sigma clipping
    pub outlier_pixels: usize,
    /// Outliers as a percentage of the whole cube
    pub outlier_percent: f64,
    /// Amplifier regions corrected per integration, if 1/f correction ran
    pub oneoverf_regions: Option<usize>,
    /// Pixels flagged by the background fit, degenerate lines included
    pub background_pixels: usize,
    pub degenerate_background_lines: usize,
    /// Median frame pixels masked at every integration
    pub all_masked_median_pixels: usize,
    /// Of those, pixels the fill policy left NaN
    pub unfilled_median_pixels: usize,
    /// Fraction of the cube still good after every stage
    pub good_fraction: f64,
}

/// Everything a reduced segment hands downstream.
#[derive(Debug, Clone)]
pub struct SegmentProducts {
    /// Background-subtracted cube with its final mask
    pub cube: ImageCube,
    pub background: Array3<f64>,
    pub median: MedianFrame,
    /// Per-row median of the background-subtracted median frame
    pub residual_background: Array1<f64>,
    pub spectrum: Spectrum,
    /// One spectrum per configured order
    pub orders: Vec<Spectrum>,
    /// One spectrum per half-width of the sweep
    pub sweep: Vec<Spectrum>,
    pub diagnostics: SegmentDiagnostics,
}

/// Assemble and reduce one segment.
pub fn reduce_segment(inputs: CubeInputs, config: &ReductionConfig) -> Result<SegmentProducts> {
    config.validate()?;
    let cube = assemble_cube(inputs, config)?;
    reduce_cube(cube, config)
}

/// Reduce an already assembled cube.
pub fn reduce_cube(mut cube: ImageCube, config: &ReductionConfig) -> Result<SegmentProducts> {
    config.validate()?;
    let mut diagnostics = SegmentDiagnostics::default();
    info!("  Reducing {} segment of shape {}", cube.filter(), cube.shape());

    if config.calibrated_spectra {
        diagnostics.calibration_factor = Some(cube.convert_to_millijansky()?);
    }

    if config.straighten_trace {
        diagnostics.straightened_columns = Some(straighten_trace(&mut cube)?);
    }

    diagnostics.invalid_pixels = cube.flag_invalid(config.dq_bits);
    if diagnostics.invalid_pixels > 0 {
        info!(
            "  Masked {} invalid pixels ({:.6}% of the cube).",
            diagnostics.invalid_pixels,
            cube.percent_of_cube(diagnostics.invalid_pixels)
        );
    }

    diagnostics.outlier_pixels = if cube.is_photometry() {
        flag_background_photometry(&mut cube, &config.bg_thresh, config.photap)?
    } else if config.ff_outlier {
        flag_full_frame(&mut cube, &config.bg_thresh)?
    } else {
        flag_background(&mut cube, &config.bg_thresh, config.use_estsig)?
    };
    diagnostics.outlier_percent = cube.percent_of_cube(diagnostics.outlier_pixels);

    if let Some(method) = config.oneoverf_corr {
        diagnostics.oneoverf_regions = Some(correct_one_over_f(
            &mut cube,
            method,
            &config.amplifiers,
            config.oneoverf_dist,
        )?);
    }

    let fitted = fit_background_cube(&cube, &BackgroundFit::from_config(config))?;
    diagnostics.background_pixels = cube.merge_mask(&fitted.mask)?;
    diagnostics.degenerate_background_lines = fitted.degenerate_lines;
    info!(
        "    Flagged {:.6}% of pixels as bad.",
        cube.percent_of_cube(diagnostics.background_pixels)
    );
    subtract_background(&mut cube, &fitted.background)?;

    let median = clean_median_frame(&cube, config.median_fill)?;
    diagnostics.all_masked_median_pixels = median.all_masked;
    diagnostics.unfilled_median_pixels = median.unfilled;
    let residual_background = median.residual_background_profile();

    info!("  Extracting aperture region...");
    let geometry = *cube.geometry();
    let spectrum = extract(
        &cube,
        &fitted.background,
        &median,
        geometry.source_y,
        geometry.spec_hw,
        None,
    )?;

    let orders = match &config.orders {
        Some(orders) => extract_orders(&cube, &fitted.background, &median, orders)?,
        None => Vec::new(),
    };
    let sweep = sweep_half_widths(
        &cube,
        &fitted.background,
        &median,
        config.src_ypos,
        &config.spec_hw_range,
    )?;

    let pixels = cube.shape().pixel_count();
    diagnostics.good_fraction = if pixels == 0 {
        0.0
    } else {
        cube.good_pixel_count() as f64 / pixels as f64
    };
    if diagnostics.good_fraction < 0.5 {
        warn!(
            "  Only {:.1}% of the segment is still good after reduction",
            100.0 * diagnostics.good_fraction
        );
    }

    Ok(SegmentProducts {
        cube,
        background: fitted.background,
        median,
        residual_background,
        spectrum,
        orders,
        sweep,
        diagnostics,
    })
}
