//! Dominant color by k-means clustering.
//!
//! Sampled pixels are clustered with Lloyd's algorithm, seeded with
//! k-means++. The centroid of the largest cluster is the dominant color and
//! every cluster's share of the samples is reported as its weight.

use super::ColorAlgorithm;
use crate::sampler::{sample_pixels, Stride};
use crate::types::{AlgorithmError, AlgorithmName, Color, RasterImage, WeightedColor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type Point = [f32; 3];

/// k-means parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KmeansOptions {
    /// Number of clusters
    pub clusters: usize,
    /// Iteration cap; iteration also stops once assignments are stable
    pub max_iterations: usize,
    /// Seed for k-means++ initialisation
    pub seed: u64,
}

impl Default for KmeansOptions {
    fn default() -> Self {
        Self {
            clusters: 4,
            max_iterations: 100,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MostDominant {
    stride: Stride,
    options: KmeansOptions,
}

impl MostDominant {
    pub fn new(stride: Stride, options: KmeansOptions) -> Self {
        Self { stride, options }
    }
}

impl ColorAlgorithm for MostDominant {
    fn name(&self) -> AlgorithmName {
        AlgorithmName::MostDominant
    }

    fn apply(&self, image: &RasterImage) -> Result<Color, AlgorithmError> {
        dominant_colors(image, self.stride, &self.options)
            .first()
            .map(|weighted| weighted.color)
            .ok_or(AlgorithmError::EmptyInput(self.name()))
    }
}

/// Cluster the sampled pixels and return every cluster's centroid with its
/// share of the samples, most populous first.
///
/// Empty clusters are omitted. The result is empty only for an image with no
/// samples.
pub fn dominant_colors(
    image: &RasterImage,
    stride: Stride,
    options: &KmeansOptions,
) -> Vec<WeightedColor> {
    let points: Vec<Point> = sample_pixels(image, stride)
        .map(|p| {
            let [r, g, b] = p.0;
            [f32::from(r), f32::from(g), f32::from(b)]
        })
        .collect();

    if points.is_empty() {
        return Vec::new();
    }

    let clustering = kmeans(&points, options);
    let total = points.len() as f64;

    let mut clusters: Vec<(usize, usize)> = clustering
        .counts
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, count)| count > 0)
        .collect();
    // Stable sort keeps lower cluster index first on ties
    clusters.sort_by(|a, b| b.1.cmp(&a.1));

    clusters
        .into_iter()
        .map(|(index, count)| WeightedColor {
            color: centroid_color(&clustering.centroids[index]),
            weight: count as f64 / total,
        })
        .collect()
}

struct Clustering {
    centroids: Vec<Point>,
    counts: Vec<usize>,
}

fn kmeans(points: &[Point], options: &KmeansOptions) -> Clustering {
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut centroids = seed_centroids(points, options.clusters.max(1), &mut rng);
    let mut assignments = vec![usize::MAX; points.len()];

    for _ in 0..options.max_iterations.max(1) {
        let mut changed = false;
        for (point, assignment) in points.iter().zip(assignments.iter_mut()) {
            let nearest = nearest_centroid(point, &centroids);
            if *assignment != nearest {
                *assignment = nearest;
                changed = true;
            }
        }

        if !changed {
            break;
        }

        update_centroids(points, &assignments, &mut centroids);
    }

    let mut counts = vec![0usize; centroids.len()];
    for &assignment in &assignments {
        counts[assignment] += 1;
    }

    Clustering { centroids, counts }
}

/// k-means++: each further centroid is drawn with probability proportional to
/// its squared distance from the nearest centroid already chosen. Stops early
/// when every point coincides with a centroid.
fn seed_centroids(points: &[Point], k: usize, rng: &mut StdRng) -> Vec<Point> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())]);

    let mut distances: Vec<f64> = points
        .iter()
        .map(|p| f64::from(distance_squared(p, &centroids[0])))
        .collect();

    while centroids.len() < k {
        let total: f64 = distances.iter().sum();
        if total <= 0.0 {
            break;
        }

        let target = rng.gen::<f64>() * total;
        let mut cumulative = 0.0;
        let mut chosen = None;
        for (index, &d) in distances.iter().enumerate() {
            if d <= 0.0 {
                continue;
            }
            cumulative += d;
            chosen = Some(index);
            if cumulative > target {
                break;
            }
        }

        let Some(index) = chosen else { break };
        let centroid = points[index];
        centroids.push(centroid);

        for (d, p) in distances.iter_mut().zip(points) {
            *d = d.min(f64::from(distance_squared(p, &centroid)));
        }
    }

    centroids
}

fn update_centroids(points: &[Point], assignments: &[usize], centroids: &mut [Point]) {
    let mut sums = vec![[0.0f64; 3]; centroids.len()];
    let mut counts = vec![0usize; centroids.len()];

    for (point, &cluster) in points.iter().zip(assignments) {
        for (sum, &value) in sums[cluster].iter_mut().zip(point) {
            *sum += f64::from(value);
        }
        counts[cluster] += 1;
    }

    // An empty cluster keeps its previous centroid
    for ((centroid, sum), &count) in centroids.iter_mut().zip(&sums).zip(&counts) {
        if count > 0 {
            for (c, &s) in centroid.iter_mut().zip(sum) {
                *c = (s / count as f64) as f32;
            }
        }
    }
}

fn nearest_centroid(point: &Point, centroids: &[Point]) -> usize {
    centroids
        .iter()
        .map(|c| distance_squared(point, c))
        .enumerate()
        .fold((0, f32::INFINITY), |best, (index, d)| {
            if d < best.1 {
                (index, d)
            } else {
                best
            }
        })
        .0
}

fn distance_squared(a: &Point, b: &Point) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn centroid_color(centroid: &Point) -> Color {
    let channel = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    Color::new(channel(centroid[0]), channel(centroid[1]), channel(centroid[2]))
}
