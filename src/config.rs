//! Configuration management.
//!
//! Loads configuration from a TOML file and provides runtime defaults.

use crate::algorithms::KmeansOptions;
use crate::color_stream::MIN_FRAMES_IN_FLIGHT;
use crate::frame_source::check_interval;
use crate::types::AlgorithmName;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub sampling: SamplingConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub algorithms: AlgorithmsConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the event-stream server listens on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Interval for `/screen-color` requests that do not pass one
    #[serde(default = "default_interval_ms")]
    pub default_interval_ms: u64,

    /// Interval of the shared `/screen-colors` feed
    #[serde(default = "default_shared_interval_ms")]
    pub shared_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            default_interval_ms: default_interval_ms(),
            shared_interval_ms: default_shared_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Distance in pixels between samples, in both directions
    #[serde(default = "default_stride")]
    pub stride: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            stride: default_stride(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Number of k-means clusters
    #[serde(default = "default_clusters")]
    pub clusters: usize,

    /// Iteration cap for k-means
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Seed for centroid initialisation
    #[serde(default)]
    pub seed: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            clusters: default_clusters(),
            max_iterations: default_max_iterations(),
            seed: 0,
        }
    }
}

impl ClusteringConfig {
    pub fn options(&self) -> KmeansOptions {
        KmeansOptions {
            clusters: self.clusters,
            max_iterations: self.max_iterations,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmsConfig {
    /// Algorithms run on every frame
    #[serde(default = "default_enabled_algorithms")]
    pub enabled: Vec<AlgorithmName>,

    /// Result used as the event's primary color when available
    #[serde(default = "default_primary")]
    pub primary: AlgorithmName,
}

impl Default for AlgorithmsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_algorithms(),
            primary: default_primary(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Algorithm jobs allowed to run at once
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Frames analyzed concurrently per interval (results stay in order)
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,

    /// Frames and events buffered per subscriber before a slow one starts skipping
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            frames_in_flight: default_frames_in_flight(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

// Default value functions for serde
fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_shared_interval_ms() -> u64 {
    60
}

fn default_stride() -> u32 {
    crate::sampler::DEFAULT_STRIDE
}

fn default_clusters() -> usize {
    4
}

fn default_max_iterations() -> usize {
    100
}

fn default_enabled_algorithms() -> Vec<AlgorithmName> {
    AlgorithmName::ALL.to_vec()
}

fn default_primary() -> AlgorithmName {
    AlgorithmName::SquaredAverageRgb
}

fn default_worker_threads() -> usize {
    crate::worker_pool::DEFAULT_WORKERS
}

fn default_frames_in_flight() -> usize {
    2
}

fn default_broadcast_capacity() -> usize {
    16
}

/// Errors from reading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_config_path())
    }

    /// Load configuration from a specific path, falling back to defaults
    pub fn load_from_path(path: PathBuf) -> Self {
        match Self::try_load_from_path(&path) {
            Ok(config) => {
                info!("Loaded configuration from {:?}", path);
                config
            }
            Err(ConfigError::Read(_)) => {
                info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
            Err(e) => {
                warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path, reporting every failure
    pub fn try_load_from_path(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("screen-color")
            .join("config.toml")
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: PathBuf) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        std::fs::write(&path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.sampling.stride == 0, "sampling.stride must be at least 1"),
            (self.clustering.clusters == 0, "clustering.clusters must be at least 1"),
            (self.clustering.max_iterations == 0, "clustering.max_iterations must be at least 1"),
            (self.algorithms.enabled.is_empty(), "algorithms.enabled must not be empty"),
            (self.pipeline.worker_threads == 0, "pipeline.worker_threads must be at least 1"),
            (self.pipeline.frames_in_flight < MIN_FRAMES_IN_FLIGHT, "pipeline.frames_in_flight must be at least 2"),
            (self.pipeline.broadcast_capacity == 0, "pipeline.broadcast_capacity must be at least 1"),
            (check_interval(self.server.default_interval_ms).is_err(), "server.default_interval_ms is out of range"),
            (check_interval(self.server.shared_interval_ms).is_err(), "server.shared_interval_ms is out of range"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::Invalid(message.to_string())),
            None => Ok(()),
        }
    }
}
