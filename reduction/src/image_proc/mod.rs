//! Per-segment image processing stages.
//!
//! Each stage borrows the [`crate::cube::ImageCube`] and either returns a
//! derived artifact or merges new flags into its mask.

pub mod aperture;
pub mod background;
pub mod median_frame;
pub mod oneoverf;
pub mod sigma_clip;
pub mod straighten;

pub use aperture::{
    cut_aperture, standard_spectrum, ApertureSlice, OrderGeometry, Spectrum, WhiteLight,
};
pub use background::{fit_background, fit_background_cube, BackgroundDirection, BackgroundFit};
pub use median_frame::{clean_median_frame, MedianFill, MedianFrame};
pub use oneoverf::{correct_one_over_f, AmplifierLayout, OneOverFMethod};
pub use sigma_clip::{flag_background, flag_background_photometry, flag_full_frame, sigma_reject};
pub use straighten::straighten_trace;
