//! Screen Color - representative colors of the screen as a live event stream
//!
//! The screen is captured at a caller-chosen interval and every frame is
//! reduced to a handful of representative colors:
//!
//! - **averageRgb**: arithmetic mean of each channel
//! - **squaredAverageRgb**: root-mean-square of each channel
//! - **averageHue**: circular mean of hue
//! - **mostDominant**: largest k-means cluster
//!
//! # Architecture
//!
//! A [`FrameSource`] runs one capture timer per interval and multicasts each
//! frame to the analysis task of that interval. The [`ColorFinder`] runs every
//! enabled algorithm concurrently on a bounded worker pool. [`ColorStream`]
//! analyzes each frame once and multicasts the resulting [`ColorEvent`]s,
//! which the [`server`] publishes as server-sent events.

pub mod algorithms;
pub mod capture;
pub mod color_finder;
pub mod color_stream;
pub mod config;
pub mod frame_source;
pub mod sampler;
pub mod server;
pub mod types;
pub mod worker_pool;

// Re-export commonly used types
pub use algorithms::{AlgorithmRegistry, ColorAlgorithm, KmeansOptions};
pub use capture::{DisplayCapture, ScreenCapture};
pub use color_finder::ColorFinder;
pub use color_stream::{ColorStream, ColorSubscription};
pub use config::Config;
pub use frame_source::{FrameSource, FrameSubscription};
pub use sampler::Stride;
pub use types::{
    AlgorithmError, AlgorithmName, CaptureError, Color, ColorEvent, Frame, FrameError,
    RasterImage, SubscribeError, WeightedColor,
};
pub use worker_pool::WorkerPool;
