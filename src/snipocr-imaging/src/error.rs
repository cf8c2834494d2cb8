//! Imaging error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("invalid pixel buffer: expected {expected} bytes for {width}x{height}, got {actual}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("crop region {0} does not intersect the source image")]
    EmptyRegion(String),

    #[error("invalid preprocess configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported image: {0}")]
    UnsupportedImage(String),

    #[error("image encoding error: {0}")]
    Encode(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, ImagingError>;
