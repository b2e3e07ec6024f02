//! Color reduction algorithms.
//!
//! Each algorithm reduces a raster to one representative color:
//! - `averageRgb`: arithmetic mean of each channel
//! - `squaredAverageRgb`: root-mean-square of each channel
//! - `averageHue`: circular mean of hue, shown at full saturation
//! - `mostDominant`: centroid of the largest k-means cluster

pub mod average;
pub mod dominant;
pub mod hue;

use crate::config::{Config, ConfigError};
use crate::sampler::Stride;
use crate::types::{AlgorithmError, AlgorithmName, Color, RasterImage};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use average::{AverageRgb, SquaredAverageRgb};
pub use dominant::{dominant_colors, KmeansOptions, MostDominant};
pub use hue::AverageHue;

/// Reduces an image to a single color.
///
/// Implementations must be pure: the same image always gives the same result
/// and no state is shared between calls.
pub trait ColorAlgorithm: Send + Sync {
    /// Key under which the result is reported
    fn name(&self) -> AlgorithmName;

    /// Compute the color for `image`
    fn apply(&self, image: &RasterImage) -> Result<Color, AlgorithmError>;
}

/// Enabled algorithms, keyed by name
#[derive(Clone, Default)]
pub struct AlgorithmRegistry {
    algorithms: BTreeMap<AlgorithmName, Arc<dyn ColorAlgorithm>>,
}

impl AlgorithmRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// All four built-in algorithms with the given parameters
    pub fn with_builtins(stride: Stride, kmeans: KmeansOptions) -> Self {
        let mut registry = Self::new();
        for name in AlgorithmName::ALL {
            registry.register(builtin(name, stride, kmeans));
        }
        registry
    }

    /// The algorithms enabled in `config`
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let stride = Stride::new(config.sampling.stride).ok_or_else(|| {
            ConfigError::Invalid("sampling.stride must be at least 1".to_string())
        })?;
        let kmeans = config.clustering.options();

        let mut registry = Self::new();
        for &name in &config.algorithms.enabled {
            registry.register(builtin(name, stride, kmeans));
        }
        Ok(registry)
    }

    /// Add an algorithm, replacing any existing one with the same name
    pub fn register(&mut self, algorithm: Arc<dyn ColorAlgorithm>) {
        self.algorithms.insert(algorithm.name(), algorithm);
    }

    pub fn remove(&mut self, name: AlgorithmName) -> Option<Arc<dyn ColorAlgorithm>> {
        self.algorithms.remove(&name)
    }

    pub fn get(&self, name: AlgorithmName) -> Option<&Arc<dyn ColorAlgorithm>> {
        self.algorithms.get(&name)
    }

    pub fn names(&self) -> impl Iterator<Item = AlgorithmName> + '_ {
        self.algorithms.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ColorAlgorithm>> {
        self.algorithms.values()
    }

    pub fn len(&self) -> usize {
        self.algorithms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty()
    }
}

fn builtin(name: AlgorithmName, stride: Stride, kmeans: KmeansOptions) -> Arc<dyn ColorAlgorithm> {
    match name {
        AlgorithmName::AverageRgb => Arc::new(AverageRgb::new(stride)),
        AlgorithmName::SquaredAverageRgb => Arc::new(SquaredAverageRgb::new(stride)),
        AlgorithmName::AverageHue => Arc::new(AverageHue::new(stride)),
        AlgorithmName::MostDominant => Arc::new(MostDominant::new(stride, kmeans)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = AlgorithmRegistry::with_builtins(Stride::default(), KmeansOptions::default());
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.names().collect::<Vec<_>>(), AlgorithmName::ALL.to_vec());
    }

    #[test]
    fn test_from_config_respects_enabled_set() {
        let mut config = Config::default();
        config.algorithms.enabled = vec![AlgorithmName::AverageHue, AlgorithmName::AverageRgb];

        let registry = AlgorithmRegistry::from_config(&config).unwrap();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec![AlgorithmName::AverageRgb, AlgorithmName::AverageHue]
        );
        assert!(registry.get(AlgorithmName::MostDominant).is_none());
    }

    #[test]
    fn test_from_config_rejects_zero_stride() {
        let mut config = Config::default();
        config.sampling.stride = 0;
        assert!(matches!(
            AlgorithmRegistry::from_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = AlgorithmRegistry::new();
        registry.register(Arc::new(AverageRgb::default()));
        registry.register(Arc::new(AverageRgb::new(Stride::new(1).unwrap())));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(AlgorithmName::AverageRgb).is_some());
        assert!(registry.is_empty());
    }
}
