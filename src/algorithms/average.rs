//! Linear and quadratic (root-mean-square) channel averages.

use super::ColorAlgorithm;
use crate::sampler::{sample_pixels, Stride};
use crate::types::{AlgorithmError, AlgorithmName, Color, RasterImage};

/// Per-channel sums over the sampled pixels
#[derive(Debug, Default)]
struct ChannelSums {
    red: u64,
    green: u64,
    blue: u64,
    count: u64,
}

impl ChannelSums {
    fn collect(image: &RasterImage, stride: Stride, weight: impl Fn(u8) -> u64) -> Self {
        sample_pixels(image, stride).fold(Self::default(), |mut sums, pixel| {
            let [r, g, b] = pixel.0;
            sums.red += weight(r);
            sums.green += weight(g);
            sums.blue += weight(b);
            sums.count += 1;
            sums
        })
    }
}

/// Arithmetic mean of each channel, truncated toward zero
#[derive(Debug, Clone, Copy, Default)]
pub struct AverageRgb {
    stride: Stride,
}

impl AverageRgb {
    pub fn new(stride: Stride) -> Self {
        Self { stride }
    }
}

impl ColorAlgorithm for AverageRgb {
    fn name(&self) -> AlgorithmName {
        AlgorithmName::AverageRgb
    }

    fn apply(&self, image: &RasterImage) -> Result<Color, AlgorithmError> {
        let sums = ChannelSums::collect(image, self.stride, u64::from);
        if sums.count == 0 {
            return Err(AlgorithmError::EmptyInput(self.name()));
        }

        // Integer division truncates; the mean of u8 values fits in u8
        let mean = |sum: u64| (sum / sums.count) as u8;
        Ok(Color::new(mean(sums.red), mean(sums.green), mean(sums.blue)))
    }
}

/// Root-mean-square of each channel, truncated toward zero.
///
/// Weights bright pixels more heavily than [`AverageRgb`], so the result is
/// never darker than the linear mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquaredAverageRgb {
    stride: Stride,
}

impl SquaredAverageRgb {
    pub fn new(stride: Stride) -> Self {
        Self { stride }
    }
}

impl ColorAlgorithm for SquaredAverageRgb {
    fn name(&self) -> AlgorithmName {
        AlgorithmName::SquaredAverageRgb
    }

    fn apply(&self, image: &RasterImage) -> Result<Color, AlgorithmError> {
        let sums = ChannelSums::collect(image, self.stride, |v| u64::from(v) * u64::from(v));
        if sums.count == 0 {
            return Err(AlgorithmError::EmptyInput(self.name()));
        }

        let count = sums.count as f64;
        // sqrt of a mean of squares of u8 values is within [0, 255]; `as` truncates
        let rms = |sum: u64| (sum as f64 / count).sqrt() as u8;
        Ok(Color::new(rms(sums.red), rms(sums.green), rms(sums.blue)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn uniform(width: u32, height: u32, rgb: [u8; 3]) -> RasterImage {
        RasterImage::from_pixel(width, height, Rgb(rgb))
    }

    #[test]
    fn test_uniform_image_returns_its_color() {
        for rgb in [[0, 0, 0], [255, 255, 255], [12, 200, 99], [1, 254, 128]] {
            let image = uniform(37, 23, rgb);
            for d in [1, 2, 4, 7, 50] {
                let stride = Stride::new(d).unwrap();
                let expected = Color::new(rgb[0], rgb[1], rgb[2]);
                assert_eq!(AverageRgb::new(stride).apply(&image).unwrap(), expected);
                assert_eq!(SquaredAverageRgb::new(stride).apply(&image).unwrap(), expected);
            }
        }
    }

    #[test]
    fn test_linear_mean_truncates() {
        // Mean of 0 and 255 is 127.5
        let image = RasterImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 1, 3])
            }
        });
        let color = AverageRgb::new(Stride::new(1).unwrap()).apply(&image).unwrap();
        assert_eq!(color, Color::new(127, 0, 1));
    }

    #[test]
    fn test_rms_at_least_mean() {
        let image = RasterImage::from_fn(16, 16, |x, y| {
            Rgb([(x * 16) as u8, (y * 16) as u8, ((x + y) * 8) as u8])
        });
        let stride = Stride::new(1).unwrap();
        let mean = AverageRgb::new(stride).apply(&image).unwrap();
        let rms = SquaredAverageRgb::new(stride).apply(&image).unwrap();

        assert!(rms.red > mean.red);
        assert!(rms.green > mean.green);
        assert!(rms.blue > mean.blue);
    }

    #[test]
    fn test_rms_black_and_white() {
        // sqrt((0 + 255^2) / 2) = 180.3
        let image = RasterImage::from_fn(2, 1, |x, _| Rgb([(x * 255) as u8; 3]));
        let color = SquaredAverageRgb::new(Stride::new(1).unwrap()).apply(&image).unwrap();
        assert_eq!(color, Color::new(180, 180, 180));
    }

    #[test]
    fn test_empty_image_fails() {
        let image = RasterImage::new(0, 0);
        assert!(matches!(
            AverageRgb::default().apply(&image),
            Err(AlgorithmError::EmptyInput(AlgorithmName::AverageRgb))
        ));
        assert!(matches!(
            SquaredAverageRgb::default().apply(&image),
            Err(AlgorithmError::EmptyInput(AlgorithmName::SquaredAverageRgb))
        ));
    }
}
