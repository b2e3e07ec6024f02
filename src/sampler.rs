//! Raster decimation shared by every color algorithm.
//!
//! Instead of reading every pixel of a full-screen capture, algorithms read a
//! grid of pixels spaced `stride` apart in both directions.

use crate::types::RasterImage;
use image::Rgb;
use std::num::NonZeroU32;

/// Default distance between sampled pixels
pub const DEFAULT_STRIDE: u32 = 4;

/// Sampling step, always at least 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stride(NonZeroU32);

impl Stride {
    /// Returns `None` for a zero stride
    pub fn new(stride: u32) -> Option<Self> {
        NonZeroU32::new(stride).map(Self)
    }

    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl Default for Stride {
    fn default() -> Self {
        Self::new(DEFAULT_STRIDE).unwrap_or(Self(NonZeroU32::MIN))
    }
}

/// Iterate the sampled pixels of `image`, column by column.
///
/// Coordinates are `x = 0, d, 2d, ...` and `y = 0, d, 2d, ...` strictly inside
/// the image. Any non-empty image yields at least the pixel at `(0, 0)`.
pub fn sample_pixels(image: &RasterImage, stride: Stride) -> impl Iterator<Item = Rgb<u8>> + '_ {
    sample_coordinates(image.width(), image.height(), stride)
        .map(move |(x, y)| *image.get_pixel(x, y))
}

/// Sampled coordinates for an image of the given size
pub fn sample_coordinates(
    width: u32,
    height: u32,
    stride: Stride,
) -> impl Iterator<Item = (u32, u32)> {
    let step = stride.get() as usize;
    (0..width)
        .step_by(step)
        .flat_map(move |x| (0..height).step_by(step).map(move |y| (x, y)))
}

/// Number of samples `sample_pixels` yields for an image of this size
pub fn sample_count(width: u32, height: u32, stride: Stride) -> u64 {
    let d = stride.get() as u64;
    (width as u64).div_ceil(d) * (height as u64).div_ceil(d)
}
