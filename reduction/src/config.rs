//! Reduction configuration.
//!
//! The JSON document is read into a loosely typed file struct with the same
//! field names as the control file, then converted into [`ReductionConfig`].
//! Every field is validated once at conversion; downstream stages receive the
//! config by reference and never modify it.

use crate::cube::DO_NOT_USE;
use crate::error::{ReductionError, Result};
use crate::image_proc::aperture::OrderGeometry;
use crate::image_proc::background::BackgroundDirection;
use crate::image_proc::median_frame::MedianFill;
use crate::image_proc::oneoverf::{AmplifierLayout, OneOverFMethod};
use serde::Deserialize;
use std::path::Path;

/// Validated reduction settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionConfig {
    /// Sigma thresholds for outlier rejection, one pass per entry
    pub bg_thresh: Vec<f64>,
    /// Background polynomial degree; 0 fits the median
    pub bg_deg: usize,
    /// Residual rejection threshold in the background fit
    pub p3thresh: f64,
    pub bg_dir: BackgroundDirection,
    /// Lines keeping no more than this fraction of their background pixels are degenerate
    pub bg_min_good_frac: f64,
    /// 1/f correction estimator, `None` disables the correction
    pub oneoverf_corr: Option<OneOverFMethod>,
    /// Half-width in columns of the region around the source excluded from 1/f estimates
    pub oneoverf_dist: usize,
    pub amplifiers: AmplifierLayout,
    /// Super-sampling factor along y
    pub expand: usize,
    /// Aperture half-width in native rows
    pub spec_hw: usize,
    /// Extra half-widths to extract in a sweep
    pub spec_hw_range: Vec<usize>,
    pub bg_y1: usize,
    pub bg_y2: usize,
    pub bg_x1: usize,
    pub bg_x2: usize,
    pub src_ypos: f64,
    pub src_xpos: f64,
    /// Detector columns kept in the segment, full frame when absent
    pub xwindow: Option<(usize, usize)>,
    pub ywindow: Option<(usize, usize)>,
    pub use_estsig: bool,
    pub ff_outlier: bool,
    /// Photometric aperture radius in pixels
    pub photap: f64,
    pub calibrated_spectra: bool,
    /// Quality bits that mark a pixel bad before any rejection
    pub dq_bits: u32,
    pub poly_wavelength: bool,
    pub wave_pixel_offset: Option<f64>,
    pub median_fill: MedianFill,
    pub orders: Option<Vec<OrderGeometry>>,
    /// Shift columns so a curved trace lies along `src_ypos`
    pub straighten_trace: bool,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            bg_thresh: vec![5.0, 5.0],
            bg_deg: 0,
            p3thresh: 5.0,
            bg_dir: BackgroundDirection::ColumnByColumn,
            bg_min_good_frac: 0.1,
            oneoverf_corr: None,
            oneoverf_dist: 15,
            amplifiers: AmplifierLayout::default(),
            expand: 1,
            spec_hw: 8,
            spec_hw_range: Vec::new(),
            bg_y1: 0,
            bg_y2: 0,
            bg_x1: 0,
            bg_x2: 0,
            src_ypos: 0.0,
            src_xpos: 0.0,
            xwindow: None,
            ywindow: None,
            use_estsig: false,
            ff_outlier: false,
            photap: 10.0,
            calibrated_spectra: false,
            dq_bits: DO_NOT_USE,
            poly_wavelength: false,
            wave_pixel_offset: None,
            median_fill: MedianFill::default(),
            orders: None,
            straighten_trace: false,
        }
    }
}

/// Control file as written on disk.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default = "default_bg_thresh")]
    bg_thresh: Vec<f64>,
    #[serde(default)]
    bg_deg: usize,
    #[serde(default = "default_p3thresh")]
    p3thresh: f64,
    #[serde(default = "default_bg_dir")]
    bg_dir: String,
    #[serde(default = "default_bg_min_good_frac")]
    bg_min_good_frac: f64,
    #[serde(default)]
    oneoverf_corr: Option<String>,
    #[serde(default = "default_oneoverf_dist")]
    oneoverf_dist: usize,
    #[serde(default = "default_detector_width")]
    detector_width: usize,
    #[serde(default = "default_n_amplifiers")]
    n_amplifiers: usize,
    #[serde(default = "default_expand")]
    expand: usize,
    #[serde(default = "default_spec_hw")]
    spec_hw: usize,
    #[serde(default)]
    spec_hw_range: Vec<usize>,
    #[serde(default)]
    bg_y1: usize,
    #[serde(default)]
    bg_y2: usize,
    #[serde(default)]
    bg_x1: usize,
    #[serde(default)]
    bg_x2: usize,
    #[serde(default)]
    src_ypos: f64,
    #[serde(default)]
    src_xpos: f64,
    #[serde(default)]
    xwindow: Option<[usize; 2]>,
    #[serde(default)]
    ywindow: Option<[usize; 2]>,
    #[serde(default)]
    use_estsig: bool,
    #[serde(default)]
    ff_outlier: bool,
    #[serde(default = "default_photap")]
    photap: f64,
    #[serde(default)]
    calibrated_spectra: bool,
    #[serde(default = "default_dq_bits")]
    dq_bits: u32,
    #[serde(default)]
    poly_wavelength: bool,
    #[serde(default)]
    wave_pixel_offset: Option<f64>,
    #[serde(default = "default_median_fill")]
    median_fill: String,
    #[serde(default)]
    orders: Option<Vec<OrderGeometry>>,
    #[serde(default)]
    straighten_trace: bool,
}

fn default_bg_thresh() -> Vec<f64> {
    vec![5.0, 5.0]
}

fn default_p3thresh() -> f64 {
    5.0
}

fn default_bg_dir() -> String {
    "CxC".to_string()
}

fn default_bg_min_good_frac() -> f64 {
    0.1
}

fn default_oneoverf_dist() -> usize {
    15
}

fn default_detector_width() -> usize {
    2048
}

fn default_n_amplifiers() -> usize {
    4
}

fn default_expand() -> usize {
    1
}

fn default_spec_hw() -> usize {
    8
}

fn default_photap() -> f64 {
    10.0
}

fn default_dq_bits() -> u32 {
    DO_NOT_USE
}

fn default_median_fill() -> String {
    "interpolate".to_string()
}

impl ReductionConfig {
    /// Parse and validate a JSON control document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(json)?;
        Self::try_from(file)
    }

    /// Read, parse and validate a JSON control file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.expand == 0 {
            return Err(invalid("expand must be at least 1"));
        }
        if self.bg_thresh.is_empty() {
            return Err(invalid("bg_thresh needs at least one threshold"));
        }
        if self.bg_thresh.iter().any(|t| !(t.is_finite() && *t > 0.0)) {
            return Err(invalid("bg_thresh entries must be positive"));
        }
        if !(self.p3thresh.is_finite() && self.p3thresh > 0.0) {
            return Err(invalid("p3thresh must be positive"));
        }
        if !(0.0..1.0).contains(&self.bg_min_good_frac) {
            return Err(invalid("bg_min_good_frac must lie in [0, 1)"));
        }
        if self.bg_y1 > self.bg_y2 {
            return Err(ReductionError::BackgroundRegionOutOfBounds {
                lower: self.bg_y1,
                upper: self.bg_y2,
                len: self.bg_y2,
            });
        }
        if self.bg_x1 > self.bg_x2 {
            return Err(ReductionError::BackgroundRegionOutOfBounds {
                lower: self.bg_x1,
                upper: self.bg_x2,
                len: self.bg_x2,
            });
        }
        for (name, window) in [("xwindow", self.xwindow), ("ywindow", self.ywindow)] {
            if let Some((start, end)) = window {
                if end <= start {
                    return Err(invalid(&format!("{name} [{start}, {end}) is empty")));
                }
            }
        }
        if self.spec_hw_range.contains(&0) || self.spec_hw == 0 {
            return Err(invalid("aperture half-widths must be positive"));
        }
        if !(self.photap.is_finite() && self.photap >= 0.0) {
            return Err(invalid("photap must be non-negative"));
        }
        if let Some(orders) = &self.orders {
            if orders.is_empty() {
                return Err(invalid("orders must name at least one order when present"));
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ReductionError {
    ReductionError::InvalidConfig(message.to_string())
}

impl TryFrom<ConfigFile> for ReductionConfig {
    type Error = ReductionError;

    fn try_from(file: ConfigFile) -> Result<Self> {
        let config = ReductionConfig {
            bg_thresh: file.bg_thresh,
            bg_deg: file.bg_deg,
            p3thresh: file.p3thresh,
            bg_dir: file.bg_dir.parse()?,
            bg_min_good_frac: file.bg_min_good_frac,
            oneoverf_corr: file.oneoverf_corr.as_deref().map(str::parse).transpose()?,
            oneoverf_dist: file.oneoverf_dist,
            amplifiers: AmplifierLayout::new(file.detector_width, file.n_amplifiers)?,
            expand: file.expand,
            spec_hw: file.spec_hw,
            spec_hw_range: file.spec_hw_range,
            bg_y1: file.bg_y1,
            bg_y2: file.bg_y2,
            bg_x1: file.bg_x1,
            bg_x2: file.bg_x2,
            src_ypos: file.src_ypos,
            src_xpos: file.src_xpos,
            xwindow: file.xwindow.map(|[a, b]| (a, b)),
            ywindow: file.ywindow.map(|[a, b]| (a, b)),
            use_estsig: file.use_estsig,
            ff_outlier: file.ff_outlier,
            photap: file.photap,
            calibrated_spectra: file.calibrated_spectra,
            dq_bits: file.dq_bits,
            poly_wavelength: file.poly_wavelength,
            wave_pixel_offset: file.wave_pixel_offset,
            median_fill: file.median_fill.parse()?,
            orders: file.orders,
            straighten_trace: file.straighten_trace,
        };
        config.validate()?;
        Ok(config)
    }
}
