//! snipocr-imaging - region cropping and legibility preprocessing
//!
//! Converts a selected region of an RGBA frame into a buffer tuned for text
//! recognition: crop, upscale, luminance, optional denoise, binarization,
//! optional stroke cleanup and inversion, always in that order.

mod buffer;
mod config;
mod error;
pub mod pipeline;
mod rect;

pub use buffer::PixelBuffer;
pub use config::{PreprocessConfig, MAX_SCALE, MIN_SCALE};
pub use error::{ImagingError, Result};
pub use pipeline::{otsu_threshold, preprocess};
pub use rect::{DeviceRect, DisplayRect, MIN_SELECTION_EXTENT};
