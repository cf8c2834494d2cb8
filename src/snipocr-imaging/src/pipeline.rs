//! Deterministic legibility pipeline
//!
//! Stage order: crop, scale, luminance, denoise, binarize (global or
//! adaptive), morphology, invert. Every stage is a pure function from one
//! buffer to a new buffer. The composed [`preprocess`] always runs them in
//! that order regardless of which flags are set, and invert is always last
//! so toggling it twice restores the previous output exactly.

use crate::buffer::PixelBuffer;
use crate::config::PreprocessConfig;
use crate::error::{ImagingError, Result};
use crate::rect::DeviceRect;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::filter::median_filter;
use imageproc::morphology;
use tracing::debug;

/// Side of the square neighbourhood for adaptive binarization
pub const ADAPTIVE_BLOCK: u32 = 21;

/// Subtracted from the neighbourhood mean before comparing
pub const ADAPTIVE_OFFSET: i32 = 10;

/// Run the full pipeline on `crop` of `source`
pub fn preprocess(
    source: &PixelBuffer,
    crop_rect: DeviceRect,
    config: &PreprocessConfig,
) -> Result<PixelBuffer> {
    config.validate()?;
    debug!(
        "preprocessing {} of {}x{} source: {:?}",
        crop_rect,
        source.width(),
        source.height(),
        config
    );

    let mut out = crop(source, crop_rect)?;
    out = scale(&out, config.scale);

    if config.needs_luminance() {
        out = luminance(&out);
    }
    if config.denoise {
        out = denoise(&out);
    }
    if config.adaptive {
        out = adaptive_threshold(&out, ADAPTIVE_BLOCK, ADAPTIVE_OFFSET);
    } else if config.binarizes() {
        out = threshold(&out, config.threshold);
    }
    if config.morphology {
        out = clean_strokes(&out);
    }
    if config.invert {
        out = invert(&out);
    }

    debug!("preprocessed buffer is {}x{}", out.width(), out.height());
    Ok(out)
}

/// Cut `rect` out of `source`, clamped to the source bounds
pub fn crop(source: &PixelBuffer, rect: DeviceRect) -> Result<PixelBuffer> {
    let region = rect
        .clamp_to(source.width(), source.height())
        .ok_or_else(|| ImagingError::EmptyRegion(rect.to_string()))?;

    let img = source.to_image();
    let cropped = imageops::crop_imm(&img, region.x, region.y, region.w, region.h).to_image();
    Ok(PixelBuffer::from(cropped))
}

/// Resample by `factor` with nearest-neighbour filtering
pub fn scale(buffer: &PixelBuffer, factor: f64) -> PixelBuffer {
    if factor == 1.0 {
        return buffer.clone();
    }
    let width = ((buffer.width() as f64 * factor).round() as u32).max(1);
    let height = ((buffer.height() as f64 * factor).round() as u32).max(1);

    let resized = imageops::resize(&buffer.to_image(), width, height, FilterType::Nearest);
    PixelBuffer::from(resized)
}

/// `round(0.299 R + 0.587 G + 0.114 B)`, computed exactly in integers
pub fn luma(rgb: [u8; 3]) -> u8 {
    let weighted = 299 * rgb[0] as u32 + 587 * rgb[1] as u32 + 114 * rgb[2] as u32;
    ((weighted + 500) / 1000) as u8
}

/// Set R, G and B to the pixel luminance; alpha untouched
pub fn luminance(buffer: &PixelBuffer) -> PixelBuffer {
    let mut out = buffer.clone();
    for px in out.data_mut().chunks_exact_mut(4) {
        let l = luma([px[0], px[1], px[2]]);
        px[0] = l;
        px[1] = l;
        px[2] = l;
    }
    out
}

/// Binarize: white when luminance is strictly above `cutoff`, else black.
/// Alpha becomes fully opaque.
pub fn threshold(buffer: &PixelBuffer, cutoff: u8) -> PixelBuffer {
    let mut out = buffer.clone();
    for px in out.data_mut().chunks_exact_mut(4) {
        let value = if luma([px[0], px[1], px[2]]) > cutoff { 255 } else { 0 };
        px[0] = value;
        px[1] = value;
        px[2] = value;
        px[3] = 255;
    }
    out
}

/// 3x3 median of the luminance, removing isolated speckles; alpha untouched
pub fn denoise(buffer: &PixelBuffer) -> PixelBuffer {
    let filtered = median_filter(&to_gray(buffer), 1, 1);
    with_gray(buffer, &filtered)
}

/// Binarize each pixel against the mean luminance of the `block` x `block`
/// square around it (clipped at the edges) minus `offset`. White when
/// strictly above, else black. Alpha becomes fully opaque.
pub fn adaptive_threshold(buffer: &PixelBuffer, block: u32, offset: i32) -> PixelBuffer {
    let gray = to_gray(buffer);
    let (width, height) = gray.dimensions();
    let radius = block / 2;

    // Summed-area table with a leading zero row and column
    let stride = width as usize + 1;
    let mut sums = vec![0u64; stride * (height as usize + 1)];
    for (y, row) in gray.rows().enumerate() {
        let mut running = 0u64;
        for (x, px) in row.enumerate() {
            running += px[0] as u64;
            sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + running;
        }
    }

    let mut out = buffer.clone();
    for (i, px) in out.data_mut().chunks_exact_mut(4).enumerate() {
        let x = (i % width as usize) as u32;
        let y = (i / width as usize) as u32;
        let (x0, y0) = (x.saturating_sub(radius) as usize, y.saturating_sub(radius) as usize);
        let x1 = (x + radius + 1).min(width) as usize;
        let y1 = (y + radius + 1).min(height) as usize;

        let sum = sums[y1 * stride + x1] + sums[y0 * stride + x0]
            - sums[y0 * stride + x1]
            - sums[y1 * stride + x0];
        let mean = (sum / ((x1 - x0) * (y1 - y0)) as u64) as i64;

        let value = if gray.get_pixel(x, y)[0] as i64 > mean - offset as i64 { 255 } else { 0 };
        px[0] = value;
        px[1] = value;
        px[2] = value;
        px[3] = 255;
    }
    out
}

/// Open then close the dark strokes with a 3x3 square. Specks smaller than
/// the square vanish and one-pixel gaps inside strokes fill. Expects a
/// binarized buffer; alpha untouched.
pub fn clean_strokes(buffer: &PixelBuffer) -> PixelBuffer {
    let mut ink = to_gray(buffer);
    imageops::invert(&mut ink);
    let opened = morphology::open(&ink, Norm::LInf, 1);
    let mut cleaned = morphology::close(&opened, Norm::LInf, 1);
    imageops::invert(&mut cleaned);
    with_gray(buffer, &cleaned)
}

fn to_gray(buffer: &PixelBuffer) -> GrayImage {
    GrayImage::from_fn(buffer.width(), buffer.height(), |x, y| {
        Luma([buffer.pixel(x, y).map_or(0, |px| luma([px[0], px[1], px[2]]))])
    })
}

/// `buffer` with R, G and B replaced by `gray`
fn with_gray(buffer: &PixelBuffer, gray: &GrayImage) -> PixelBuffer {
    let mut out = buffer.clone();
    for (px, &value) in out.data_mut().chunks_exact_mut(4).zip(gray.as_raw()) {
        px[0] = value;
        px[1] = value;
        px[2] = value;
    }
    out
}

/// `255 - c` on R, G and B; alpha untouched
pub fn invert(buffer: &PixelBuffer) -> PixelBuffer {
    let mut out = buffer.clone();
    for px in out.data_mut().chunks_exact_mut(4) {
        px[0] = 255 - px[0];
        px[1] = 255 - px[1];
        px[2] = 255 - px[2];
    }
    out
}

/// Global threshold separating the luminance histogram into two classes
/// with maximal between-class variance (Otsu).
pub fn otsu_threshold(buffer: &PixelBuffer) -> u8 {
    let mut histogram = [0u64; 256];
    for px in buffer.data().chunks_exact(4) {
        histogram[luma([px[0], px[1], px[2]]) as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 128;
    }
    let sum_all: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut weight_bg = 0u64;
    let mut sum_bg = 0.0;
    let mut best_variance = 0.0;
    let mut best = 0u8;

    for (t, &count) in histogram.iter().enumerate() {
        weight_bg += count;
        if weight_bg == 0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0 {
            break;
        }
        sum_bg += t as f64 * count as f64;

        let mean_bg = sum_bg / weight_bg as f64;
        let mean_fg = (sum_all - sum_bg) / weight_fg as f64;
        let variance = weight_bg as f64 * weight_fg as f64 * (mean_bg - mean_fg).powi(2);

        if variance > best_variance {
            best_variance = variance;
            best = t as u8;
        }
    }

    debug!("otsu threshold: {}", best);
    best
}
