//! Circular mean of pixel hues.
//!
//! Hue is an angle, so 1° and 359° are neighbours. Averaging the angles
//! directly would give 180°; averaging unit vectors gives 0°.

use super::ColorAlgorithm;
use crate::sampler::{sample_pixels, Stride};
use crate::types::{AlgorithmError, AlgorithmName, Color, RasterImage};

/// Saturation of the reconstructed color
const OUTPUT_SATURATION: f64 = 1.0;
/// Brightness of the reconstructed color
const OUTPUT_BRIGHTNESS: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default)]
pub struct AverageHue {
    stride: Stride,
}

impl AverageHue {
    pub fn new(stride: Stride) -> Self {
        Self { stride }
    }
}

impl ColorAlgorithm for AverageHue {
    fn name(&self) -> AlgorithmName {
        AlgorithmName::AverageHue
    }

    fn apply(&self, image: &RasterImage) -> Result<Color, AlgorithmError> {
        let hues = sample_pixels(image, self.stride).map(|p| rgb_to_hue(p.into()));
        let hue = circular_mean_degrees(hues).ok_or(AlgorithmError::EmptyInput(self.name()))?;
        Ok(hsb_to_rgb(hue, OUTPUT_SATURATION, OUTPUT_BRIGHTNESS))
    }
}

/// Circular mean of angles in degrees, normalized to `[0, 360)`.
///
/// Returns `None` for an empty input. When the vectors cancel out exactly the
/// mean is 0°.
pub fn circular_mean_degrees(angles: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (mut x, mut y, mut count) = (0.0f64, 0.0f64, 0u64);
    for angle in angles {
        let radians = angle.to_radians();
        x += radians.cos();
        y += radians.sin();
        count += 1;
    }

    if count == 0 {
        return None;
    }

    let n = count as f64;
    let mean = (y / n).atan2(x / n).to_degrees();
    Some(normalize_degrees(mean))
}

fn normalize_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Hue of an RGB color in degrees `[0, 360)`. Greys have hue 0.
pub fn rgb_to_hue(color: Color) -> f64 {
    let r = f64::from(color.red);
    let g = f64::from(color.green);
    let b = f64::from(color.blue);

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    if delta == 0.0 {
        return 0.0;
    }

    let sector = if max == r {
        (g - b) / delta
    } else if max == g {
        2.0 + (b - r) / delta
    } else {
        4.0 + (r - g) / delta
    };

    normalize_degrees(sector * 60.0)
}

/// Convert hue (degrees), saturation and brightness (both `[0, 1]`) to RGB.
///
/// Channels are rounded to nearest.
pub fn hsb_to_rgb(hue: f64, saturation: f64, brightness: f64) -> Color {
    let to_channel = |v: f64| (v * 255.0 + 0.5).clamp(0.0, 255.0) as u8;

    if saturation == 0.0 {
        let v = to_channel(brightness);
        return Color::new(v, v, v);
    }

    let h = normalize_degrees(hue) / 60.0;
    let sector = h.floor();
    let f = h - sector;
    let p = brightness * (1.0 - saturation);
    let q = brightness * (1.0 - saturation * f);
    let t = brightness * (1.0 - saturation * (1.0 - f));

    let (r, g, b) = match sector as u32 {
        0 => (brightness, t, p),
        1 => (q, brightness, p),
        2 => (p, brightness, t),
        3 => (p, q, brightness),
        4 => (t, p, brightness),
        _ => (brightness, p, q),
    };

    Color::new(to_channel(r), to_channel(g), to_channel(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn angular_distance(a: f64, b: f64) -> f64 {
        let d = (a - b).rem_euclid(360.0);
        d.min(360.0 - d)
    }

    #[test]
    fn test_wraparound_mean_is_zero() {
        let mean = circular_mean_degrees([1.0, 359.0]).unwrap();
        assert!(angular_distance(mean, 0.0) < 1e-9, "mean was {}", mean);
    }

    #[test]
    fn test_invariant_under_full_turns() {
        let hues = [10.0, 80.0, 350.0, 200.0, 45.5];
        let base = circular_mean_degrees(hues).unwrap();
        let shifted = circular_mean_degrees(hues.iter().map(|h| h + 360.0)).unwrap();
        let negative = circular_mean_degrees(hues.iter().map(|h| h - 720.0)).unwrap();

        assert!(angular_distance(base, shifted) < 1e-9);
        assert!(angular_distance(base, negative) < 1e-9);
    }

    #[test]
    fn test_empty_mean() {
        assert_eq!(circular_mean_degrees(std::iter::empty()), None);
    }

    #[test]
    fn test_rgb_to_hue_primaries() {
        assert_eq!(rgb_to_hue(Color::new(255, 0, 0)), 0.0);
        assert_eq!(rgb_to_hue(Color::new(0, 255, 0)), 120.0);
        assert_eq!(rgb_to_hue(Color::new(0, 0, 255)), 240.0);
        assert_eq!(rgb_to_hue(Color::new(255, 0, 255)), 300.0);
        assert_eq!(rgb_to_hue(Color::new(90, 90, 90)), 0.0);
    }

    #[test]
    fn test_hsb_to_rgb() {
        assert_eq!(hsb_to_rgb(0.0, 1.0, 1.0), Color::new(255, 0, 0));
        assert_eq!(hsb_to_rgb(120.0, 1.0, 1.0), Color::new(0, 255, 0));
        assert_eq!(hsb_to_rgb(240.0, 1.0, 0.5), Color::new(0, 0, 128));
        assert_eq!(hsb_to_rgb(360.0, 1.0, 0.5), Color::new(128, 0, 0));
        assert_eq!(hsb_to_rgb(42.0, 0.0, 1.0), Color::new(255, 255, 255));
    }

    #[test]
    fn test_average_hue_across_red_boundary() {
        // Hues just above 0° and just below 360°
        let image = RasterImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgb([255, 4, 0])
            } else {
                Rgb([255, 0, 4])
            }
        });
        let color = AverageHue::new(Stride::new(1).unwrap()).apply(&image).unwrap();
        assert_eq!(color, Color::new(128, 0, 0));
    }

    #[test]
    fn test_average_hue_uniform_green() {
        let image = RasterImage::from_pixel(10, 10, Rgb([0, 200, 0]));
        let color = AverageHue::default().apply(&image).unwrap();
        assert_eq!(color, Color::new(0, 128, 0));
    }

    #[test]
    fn test_average_hue_empty() {
        let image = RasterImage::new(0, 5);
        assert!(AverageHue::default().apply(&image).is_err());
    }
}
