//! RGBA pixel buffers and their raster encodings

use crate::error::{ImagingError, Result};
use image::{ImageBuffer, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use tracing::debug;

/// Width, height and RGBA bytes (`width * height * 4` of them)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap raw RGBA bytes, validating the length against the dimensions
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(ImagingError::BufferSize {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { width, height, data })
    }

    /// Buffer filled with a single RGBA color
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self { width, height, data }
    }

    /// Decode any raster format the `image` crate understands
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| ImagingError::UnsupportedImage(e.to_string()))?;
        debug!("decoded {}x{} image", img.width(), img.height());
        Ok(Self::from(img.to_rgba8()))
    }

    /// Encode as PNG, the transport format handed to recognition backends
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let img = self.to_image();
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(png)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]])
    }

    /// Copy into an `image` buffer
    pub fn to_image(&self) -> RgbaImage {
        // Length was validated at construction, so from_raw cannot fail here.
        ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl From<RgbaImage> for PixelBuffer {
    fn from(img: RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            data: img.into_raw(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_length() {
        let result = PixelBuffer::new(100, 100, vec![0; 100]);
        assert!(matches!(
            result,
            Err(ImagingError::BufferSize { expected: 40000, actual: 100, .. })
        ));
    }

    #[test]
    fn test_png_round_trip_preserves_pixels() {
        let mut img = RgbaImage::new(3, 2);
        img.put_pixel(2, 1, Rgba([10, 20, 30, 40]));
        let buffer = PixelBuffer::from(img);

        let png = buffer.encode_png().unwrap();
        let decoded = PixelBuffer::decode(&png).unwrap();

        assert_eq!(decoded, buffer);
        assert_eq!(decoded.pixel(2, 1), Some([10, 20, 30, 40]));
        assert_eq!(decoded.pixel(3, 0), None);
    }

    #[test]
    fn test_decode_garbage_is_unsupported() {
        let result = PixelBuffer::decode(b"definitely not an image");
        assert!(matches!(result, Err(ImagingError::UnsupportedImage(_))));
    }

    #[test]
    fn test_filled() {
        let buffer = PixelBuffer::filled(2, 2, [1, 2, 3, 4]);
        assert_eq!(buffer.data().len(), 16);
        assert_eq!(buffer.pixel(1, 1), Some([1, 2, 3, 4]));
    }
}
