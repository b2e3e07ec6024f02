//! Runs every enabled algorithm against one frame.
//!
//! Algorithms run concurrently on the worker pool. Each one succeeds or fails
//! on its own; the frame's event holds whichever results succeeded and is only
//! built once every algorithm has settled.

use crate::algorithms::{AlgorithmRegistry, ColorAlgorithm};
use crate::config::{Config, ConfigError};
use crate::types::{AlgorithmError, AlgorithmName, Color, ColorEvent, Frame, FrameError};
use crate::worker_pool::WorkerPool;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Frame analyzer. Cheap to clone; clones share the registry and pool.
#[derive(Clone)]
pub struct ColorFinder {
    registry: Arc<AlgorithmRegistry>,
    pool: Arc<WorkerPool>,
    primary: AlgorithmName,
}

impl ColorFinder {
    pub fn new(registry: AlgorithmRegistry, pool: WorkerPool, primary: AlgorithmName) -> Self {
        Self {
            registry: Arc::new(registry),
            pool: Arc::new(pool),
            primary,
        }
    }

    /// Validates `config` before building the registry and pool
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(
            AlgorithmRegistry::from_config(config)?,
            WorkerPool::new(config.pipeline.worker_threads),
            config.algorithms.primary,
        ))
    }

    pub fn registry(&self) -> &AlgorithmRegistry {
        &self.registry
    }

    pub fn primary(&self) -> AlgorithmName {
        self.primary
    }

    /// Compute every algorithm's color for `frame`
    pub async fn analyze(&self, frame: &Frame) -> Result<ColorEvent, FrameError> {
        let started = Instant::now();
        let results = self.colors(frame).await;

        let mut colors = BTreeMap::new();
        for (name, result) in results {
            match result {
                Ok((color, elapsed)) => {
                    trace!("Frame {} {}: {} in {:?}", frame.tick, name, color, elapsed);
                    colors.insert(name, color);
                }
                Err(e @ AlgorithmError::EmptyInput(_)) => {
                    debug!("Frame {}: {}", frame.tick, e);
                }
                Err(e) => {
                    warn!("Frame {}: {}", frame.tick, e);
                }
            }
        }

        let event = ColorEvent::new(frame.captured_at, colors, self.primary)
            .ok_or(FrameError::AllAlgorithmsFailed { tick: frame.tick })?;

        debug!(
            "Frame {} analyzed in {:?}: {} ({} results)",
            frame.tick,
            started.elapsed(),
            event.color,
            event.algorithm_results.len()
        );
        Ok(event)
    }

    /// Run each algorithm as its own pool job and wait for all of them
    async fn colors(
        &self,
        frame: &Frame,
    ) -> Vec<(AlgorithmName, Result<(Color, Duration), AlgorithmError>)> {
        let jobs = self.registry.iter().map(|algorithm| {
            let algorithm: Arc<dyn ColorAlgorithm> = Arc::clone(algorithm);
            let image = Arc::clone(&frame.image);
            let name = algorithm.name();
            let pool = Arc::clone(&self.pool);

            async move {
                let outcome = pool
                    .run(move || {
                        let start = Instant::now();
                        algorithm.apply(&image).map(|color| (color, start.elapsed()))
                    })
                    .await
                    .map_err(|source| AlgorithmError::Worker { name, source })
                    .and_then(|result| result);
                (name, outcome)
            }
        });

        join_all(jobs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::KmeansOptions;
    use crate::sampler::Stride;
    use crate::types::RasterImage;
    use image::Rgb;

    struct Failing(AlgorithmName);

    impl ColorAlgorithm for Failing {
        fn name(&self) -> AlgorithmName {
            self.0
        }

        fn apply(&self, _image: &RasterImage) -> Result<Color, AlgorithmError> {
            Err(AlgorithmError::EmptyInput(self.0))
        }
    }

    struct Panicking(AlgorithmName);

    impl ColorAlgorithm for Panicking {
        fn name(&self) -> AlgorithmName {
            self.0
        }

        fn apply(&self, _image: &RasterImage) -> Result<Color, AlgorithmError> {
            panic!("algorithm bug")
        }
    }

    fn red_frame() -> Frame {
        Frame::new(1, RasterImage::from_pixel(20, 20, Rgb([255, 0, 0])))
    }

    fn builtins() -> AlgorithmRegistry {
        AlgorithmRegistry::with_builtins(Stride::default(), KmeansOptions::default())
    }

    #[tokio::test]
    async fn test_all_algorithms_reported() {
        let finder = ColorFinder::new(builtins(), WorkerPool::new(2), AlgorithmName::SquaredAverageRgb);
        let event = finder.analyze(&red_frame()).await.unwrap();

        assert_eq!(event.algorithm_results.len(), 4);
        assert_eq!(event.color.hex_triplet(), "#ff0000");
        assert_eq!(event.algorithm_results[&AlgorithmName::AverageRgb], Color::new(255, 0, 0));
        assert_eq!(event.algorithm_results[&AlgorithmName::MostDominant], Color::new(255, 0, 0));
        assert_eq!(event.algorithm_results[&AlgorithmName::AverageHue], Color::new(128, 0, 0));
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let mut registry = builtins();
        registry.register(Arc::new(Failing(AlgorithmName::SquaredAverageRgb)));
        registry.register(Arc::new(Panicking(AlgorithmName::MostDominant)));

        let finder = ColorFinder::new(registry, WorkerPool::new(4), AlgorithmName::SquaredAverageRgb);
        let event = finder.analyze(&red_frame()).await.unwrap();

        assert_eq!(
            event.algorithm_results.keys().copied().collect::<Vec<_>>(),
            vec![AlgorithmName::AverageRgb, AlgorithmName::AverageHue]
        );
        // Preferred result missing, so the first available one is used
        assert_eq!(event.color, Color::new(255, 0, 0));
    }

    #[tokio::test]
    async fn test_all_failed_drops_frame() {
        let mut registry = AlgorithmRegistry::new();
        registry.register(Arc::new(Failing(AlgorithmName::AverageRgb)));
        registry.register(Arc::new(Failing(AlgorithmName::AverageHue)));

        let finder = ColorFinder::new(registry, WorkerPool::default(), AlgorithmName::AverageRgb);
        let result = finder.analyze(&red_frame()).await;
        assert!(matches!(result, Err(FrameError::AllAlgorithmsFailed { tick: 1 })));
    }

    #[tokio::test]
    async fn test_empty_frame_drops_frame() {
        let finder = ColorFinder::new(builtins(), WorkerPool::default(), AlgorithmName::SquaredAverageRgb);
        let frame = Frame::new(3, RasterImage::new(0, 0));
        assert!(finder.analyze(&frame).await.is_err());
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let mut config = Config::default();
        config.sampling.stride = 0;
        assert!(matches!(
            ColorFinder::from_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_event_time_is_capture_time() {
        let finder = ColorFinder::from_config(&Config::default()).unwrap();
        let frame = red_frame();
        let event = finder.analyze(&frame).await.unwrap();
        assert_eq!(event.time, frame.captured_at);
    }
}
