//! Brightness units and the one-shot calibration to flux density.

use super::ImageCube;
use crate::error::{ReductionError, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;

/// MJy/sr multiplied by a solid angle in sr gives MJy; 1 MJy = 1e9 mJy.
pub const MJY_TO_MILLIJANSKY: f64 = 1e9;

/// Units carried by the flux-like planes of a cube.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FluxUnits {
    /// Detector-native surface brightness
    MegaJanskyPerSteradian,
    /// Calibrated flux density per pixel
    MilliJansky,
    /// Anything else the instrument pipeline reports, kept verbatim
    Other(String),
}

impl FluxUnits {
    /// Parse the unit string recorded by the instrument pipeline.
    pub fn from_header(unit: &str) -> Self {
        match unit.trim() {
            "MJy/sr" => FluxUnits::MegaJanskyPerSteradian,
            "mJy" => FluxUnits::MilliJansky,
            other => FluxUnits::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FluxUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FluxUnits::MegaJanskyPerSteradian => write!(f, "MJy/sr"),
            FluxUnits::MilliJansky => write!(f, "mJy"),
            FluxUnits::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Multiplicative factor from MJy/sr to mJy for a pixel of the given solid angle.
pub fn millijansky_factor(pixel_area_sr: f64) -> f64 {
    MJY_TO_MILLIJANSKY * pixel_area_sr
}

impl ImageCube {
    /// Convert flux, err and v0 from MJy/sr to mJy.
    ///
    /// The conversion is applied at most once per segment: a cube that is
    /// already in mJy is rejected with [`ReductionError::AlreadyCalibrated`]
    /// and left untouched. Returns the factor that was applied.
    pub fn convert_to_millijansky(&mut self) -> Result<f64> {
        match &self.units {
            FluxUnits::MegaJanskyPerSteradian => {}
            FluxUnits::MilliJansky => {
                return Err(ReductionError::AlreadyCalibrated(FluxUnits::MilliJansky))
            }
            FluxUnits::Other(unit) => {
                return Err(ReductionError::InvalidConfig(format!(
                    "cannot calibrate flux in units of '{unit}', expected MJy/sr"
                )))
            }
        }

        let pixel_area_sr = self.pixel_area_sr.ok_or_else(|| {
            ReductionError::InvalidConfig(
                "pixel solid angle is required to calibrate spectra".to_string(),
            )
        })?;
        if !(pixel_area_sr.is_finite() && pixel_area_sr > 0.0) {
            return Err(ReductionError::InvalidConfig(format!(
                "pixel solid angle must be positive, got {pixel_area_sr}"
            )));
        }

        info!("  Converting from MJy/sr to mJy...");
        let factor = millijansky_factor(pixel_area_sr);
        self.flux *= factor;
        self.err *= factor;
        self.v0 *= factor;
        self.units = FluxUnits::MilliJansky;

        Ok(factor)
    }
}
