//! Core types for the color extraction pipeline.

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A captured raster. Immutable once captured.
pub type RasterImage = RgbImage;

/// RGB color with a derived `#rrggbb` hex triplet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "ColorWire", from = "ColorWire")]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Color {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Lowercase, zero-padded `#rrggbb`
    pub fn hex_triplet(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }

    /// Parse a `#rrggbb` triplet (the leading `#` is optional)
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.is_ascii() {
            return None;
        }

        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&digits[range], 16).ok();
        Some(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl From<image::Rgb<u8>> for Color {
    fn from(pixel: image::Rgb<u8>) -> Self {
        let [red, green, blue] = pixel.0;
        Self::new(red, green, blue)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex_triplet())
    }
}

/// Wire shape of a color. `hexTriplet` is written on output and ignored on input.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColorWire {
    red: u8,
    green: u8,
    blue: u8,
    #[serde(default, skip_deserializing)]
    hex_triplet: String,
}

impl From<Color> for ColorWire {
    fn from(color: Color) -> Self {
        Self {
            red: color.red,
            green: color.green,
            blue: color.blue,
            hex_triplet: color.hex_triplet(),
        }
    }
}

impl From<ColorWire> for Color {
    fn from(wire: ColorWire) -> Self {
        Self::new(wire.red, wire.green, wire.blue)
    }
}

/// Stable keys for algorithm results. These strings are part of the event wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlgorithmName {
    AverageRgb,
    SquaredAverageRgb,
    AverageHue,
    MostDominant,
}

impl AlgorithmName {
    pub const ALL: [AlgorithmName; 4] = [
        AlgorithmName::AverageRgb,
        AlgorithmName::SquaredAverageRgb,
        AlgorithmName::AverageHue,
        AlgorithmName::MostDominant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmName::AverageRgb => "averageRgb",
            AlgorithmName::SquaredAverageRgb => "squaredAverageRgb",
            AlgorithmName::AverageHue => "averageHue",
            AlgorithmName::MostDominant => "mostDominant",
        }
    }
}

impl fmt::Display for AlgorithmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| format!("unknown algorithm: {}", s))
    }
}

/// One captured frame, shared read-only by every consumer
#[derive(Debug, Clone)]
pub struct Frame {
    /// Timer tick that produced this frame (1-based, gaps mean skipped ticks)
    pub tick: u64,
    /// Capture instant
    pub captured_at: DateTime<Utc>,
    pub image: Arc<RasterImage>,
}

impl Frame {
    pub fn new(tick: u64, image: RasterImage) -> Self {
        Self {
            tick,
            captured_at: Utc::now(),
            image: Arc::new(image),
        }
    }
}

/// A color with its share of the sampled pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeightedColor {
    pub color: Color,
    pub weight: f64,
}

/// Colors computed for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorEvent {
    pub time: DateTime<Utc>,
    pub algorithm_results: BTreeMap<AlgorithmName, Color>,
    pub color: Color,
}

impl ColorEvent {
    /// Build an event, picking the primary color from `preferred` if it succeeded.
    ///
    /// Returns `None` when `results` is empty.
    pub fn new(
        time: DateTime<Utc>,
        algorithm_results: BTreeMap<AlgorithmName, Color>,
        preferred: AlgorithmName,
    ) -> Option<Self> {
        let color = select_primary(&algorithm_results, preferred)?;
        Some(Self {
            time,
            algorithm_results,
            color,
        })
    }
}

/// Preferred result if present, else the first result in declaration order
pub fn select_primary(
    results: &BTreeMap<AlgorithmName, Color>,
    preferred: AlgorithmName,
) -> Option<Color> {
    results
        .get(&preferred)
        .or_else(|| results.values().next())
        .copied()
}

/// Errors from the capture collaborator
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Screen capture failed: {0}")]
    Failed(String),

    #[error("Screen capture unavailable: {0}")]
    Unavailable(String),
}

/// Errors from a single algorithm run
#[derive(Debug, thiserror::Error)]
pub enum AlgorithmError {
    #[error("{0}: image produced no samples")]
    EmptyInput(AlgorithmName),

    #[error("{name}: worker failed: {source}")]
    Worker {
        name: AlgorithmName,
        #[source]
        source: crate::worker_pool::PoolError,
    },
}

/// Errors for a whole frame
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("All algorithms failed for frame {tick}")]
    AllAlgorithmsFailed { tick: u64 },

    #[error("Analysis of frame {tick} panicked")]
    AnalysisPanicked { tick: u64 },
}

/// Errors when opening a subscription
#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
}
