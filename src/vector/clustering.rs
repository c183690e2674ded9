//! K-means clustering for IVF vector indexing.
//!
//! A pure Rust K-means over cosine similarity with K-means++ seeding. The
//! random source is seeded explicitly, so the same vectors and seed always
//! produce the same centroids and assignments.
//!
//! # Algorithm Details
//! - Distance metric: Cosine similarity (not Euclidean)
//! - Initialization: K-means++ for better convergence
//! - Max iterations: 100
//! - Convergence tolerance: 1e-4
//! - Assignments are always recomputed after the centroids move, so every
//!   vector ends in the cluster of its nearest final centroid

use crate::vector::embedding::normalize_in_place;
use crate::vector::types::{ClusterId, VectorError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Upper bound on Lloyd iterations.
const MAX_ITERATIONS: usize = 100;

/// Mean centroid movement (cosine distance) below which iteration stops.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Total seeding weight below which all points coincide with a centroid.
const EPSILON: f32 = 1e-10;

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Cluster centroids, unit-normalized.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster of each input vector, consistent with `centroids`.
    pub assignments: Vec<ClusterId>,

    pub iterations: usize,
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error("Cannot cluster an empty vector set")]
    EmptyVectorSet,

    #[error("Invalid cluster count {0}: must be between 1 and the number of vectors")]
    InvalidClusterCount(usize),

    #[error("Vectors passed to clustering have different dimensions")]
    DimensionMismatch,

    #[error("Seeding produced fewer centroids than requested")]
    InitializationFailed,

    #[error("Vector operation error: {0}")]
    VectorError(#[from] VectorError),
}

/// Seeded K-means over cosine similarity.
///
/// `vectors` must be non-empty and share one dimension; `k` must lie in
/// `1..=vectors.len()`. The same input and `seed` always give the same result.
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans_clustering(
    vectors: &[Vec<f32>],
    k: usize,
    seed: u64,
) -> Result<KMeansResult, ClusteringError> {
    let Some(first) = vectors.first() else {
        return Err(ClusteringError::EmptyVectorSet);
    };
    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount(k));
    }
    if vectors.iter().any(|v| v.len() != first.len()) {
        return Err(ClusteringError::DimensionMismatch);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = seed_centroids(vectors, k, &mut rng)?;
    let mut assignments = assign_all(vectors, &centroids);
    let mut iterations = 1;

    // Assignments are refreshed after every centroid update
    while iterations < MAX_ITERATIONS {
        let moved_to = recompute_centroids(vectors, &assignments, k, &mut rng);
        let movement = mean_movement(&centroids, &moved_to);
        centroids = moved_to;
        iterations += 1;

        let reassigned = assign_all(vectors, &centroids);
        let stable = reassigned == assignments;
        assignments = reassigned;
        if stable || movement < CONVERGENCE_TOLERANCE {
            break;
        }
    }

    if iterations >= MAX_ITERATIONS {
        tracing::warn!("K-means stopped after {MAX_ITERATIONS} iterations without converging");
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

fn assign_all(vectors: &[Vec<f32>], centroids: &[Vec<f32>]) -> Vec<ClusterId> {
    let refs: Vec<&[f32]> = centroids.iter().map(Vec::as_slice).collect();
    vectors
        .iter()
        .map(|vector| assign_to_nearest_centroid(vector, &refs))
        .collect()
}

/// Nearest centroid by cosine similarity; ties go to the lowest position.
pub fn assign_to_nearest_centroid(vector: &[f32], centroids: &[&[f32]]) -> ClusterId {
    let best = centroids
        .iter()
        .map(|centroid| cosine_similarity(vector, centroid))
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, similarity)| {
            if similarity > best.1 { (i, similarity) } else { best }
        });
    ClusterId::from_position(best.0)
}

/// Normalized mean of each cluster's members.
///
/// A cluster that lost all members is reseeded from a random vector drawn
/// from the seeded generator, so the result stays deterministic.
fn recompute_centroids(
    vectors: &[Vec<f32>],
    assignments: &[ClusterId],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut sums = vec![vec![0.0f32; dimension]; k];
    let mut members = vec![0usize; k];

    for (vector, cluster) in vectors.iter().zip(assignments) {
        let slot = cluster.position();
        members[slot] += 1;
        sums[slot]
            .iter_mut()
            .zip(vector)
            .for_each(|(sum, value)| *sum += value);
    }

    sums.into_iter()
        .zip(members)
        .map(|(sum, count)| {
            if count == 0 {
                unit(&vectors[rng.random_range(0..vectors.len())])
            } else {
                unit(&sum)
            }
        })
        .collect()
}

/// Cosine similarity in `[-1, 1]`; 0 if either vector is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

/// K-means++ seeding: each further centroid is drawn with probability
/// proportional to its squared cosine distance from the chosen ones.
fn seed_centroids(
    vectors: &[Vec<f32>],
    k: usize,
    rng: &mut StdRng,
) -> Result<Vec<Vec<f32>>, ClusteringError> {
    let mut centroids = vec![unit(&vectors[rng.random_range(0..vectors.len())])];

    while centroids.len() < k {
        let weights: Vec<f32> = vectors
            .iter()
            .map(|vector| {
                let nearest = centroids
                    .iter()
                    .map(|c| 1.0 - cosine_similarity(vector, c))
                    .fold(f32::MAX, f32::min);
                nearest * nearest
            })
            .collect();
        let total: f32 = weights.iter().sum();

        if total < EPSILON {
            // All points coincide with chosen centroids; repeat one so the
            // cluster count stays k
            centroids.push(centroids[0].clone());
            continue;
        }

        let target = rng.random::<f32>() * total;
        let mut cumulative = 0.0;
        // Rounding can leave the target past the final sum; fall back to the last vector
        let chosen = weights
            .iter()
            .position(|w| {
                cumulative += w;
                cumulative >= target
            })
            .unwrap_or(vectors.len() - 1);
        centroids.push(unit(&vectors[chosen]));
    }

    if centroids.len() != k {
        return Err(ClusteringError::InitializationFailed);
    }
    Ok(centroids)
}

/// Mean cosine distance between matching old and new centroids.
fn mean_movement(old: &[Vec<f32>], new: &[Vec<f32>]) -> f32 {
    let total: f32 = old
        .iter()
        .zip(new)
        .map(|(a, b)| 1.0 - cosine_similarity(a, b))
        .sum();
    total / old.len() as f32
}

fn unit(vector: &[f32]) -> Vec<f32> {
    let mut copy = vector.to_vec();
    normalize_in_place(&mut copy);
    copy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_axis_clusters() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.1, 0.0],
            vec![0.9, 0.2, 0.1],
            vec![1.1, 0.0, 0.2],
            vec![0.1, 1.0, 0.0],
            vec![0.2, 0.9, 0.1],
            vec![0.0, 1.1, 0.2],
            vec![0.0, 0.1, 1.0],
            vec![0.1, 0.2, 0.9],
            vec![0.2, 0.0, 1.1],
        ]
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);

        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < f32::EPSILON);

        let b = vec![-1.0, -2.0, -3.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);

        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_assign_to_nearest_centroid() {
        let centroids = [
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        let refs: Vec<&[f32]> = centroids.iter().map(|c| c.as_slice()).collect();

        assert_eq!(assign_to_nearest_centroid(&[0.9, 0.1, 0.0], &refs).get(), 1);
        assert_eq!(assign_to_nearest_centroid(&[0.1, 0.9, 0.1], &refs).get(), 2);
        assert_eq!(assign_to_nearest_centroid(&[0.0, 0.1, 0.9], &refs).get(), 3);
    }

    #[test]
    fn test_kmeans_clustering_basic() {
        let vectors = three_axis_clusters();
        let result = kmeans_clustering(&vectors, 3, 7).unwrap();

        assert_eq!(result.centroids.len(), 3);
        assert_eq!(result.assignments.len(), 9);
        assert!(result.iterations <= MAX_ITERATIONS);

        for group in result.assignments.chunks(3) {
            assert!(group.iter().all(|c| *c == group[0]));
        }
    }

    #[test]
    fn test_kmeans_is_deterministic_for_seed() {
        let vectors = three_axis_clusters();
        let a = kmeans_clustering(&vectors, 3, 42).unwrap();
        let b = kmeans_clustering(&vectors, 3, 42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_assignments_match_final_centroids() {
        let vectors = three_axis_clusters();
        let result = kmeans_clustering(&vectors, 2, 1).unwrap();
        let refs: Vec<&[f32]> = result.centroids.iter().map(|c| c.as_slice()).collect();
        for (vector, cluster) in vectors.iter().zip(&result.assignments) {
            assert_eq!(assign_to_nearest_centroid(vector, &refs), *cluster);
        }
    }

    #[test]
    fn test_kmeans_edge_cases() {
        let vectors: Vec<Vec<f32>> = vec![];
        assert!(matches!(
            kmeans_clustering(&vectors, 1, 0),
            Err(ClusteringError::EmptyVectorSet)
        ));

        let vectors = vec![vec![1.0, 2.0]];
        assert!(matches!(
            kmeans_clustering(&vectors, 0, 0),
            Err(ClusteringError::InvalidClusterCount(0))
        ));

        let vectors = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        assert!(matches!(
            kmeans_clustering(&vectors, 3, 0),
            Err(ClusteringError::InvalidClusterCount(3))
        ));

        let vectors = vec![vec![1.0, 2.0], vec![3.0, 4.0, 5.0]];
        assert!(matches!(
            kmeans_clustering(&vectors, 1, 0),
            Err(ClusteringError::DimensionMismatch)
        ));
    }

    #[test]
    fn test_duplicate_points_keep_cluster_count() {
        let vectors = vec![vec![1.0, 0.0]; 4];
        let result = kmeans_clustering(&vectors, 2, 3).unwrap();
        assert_eq!(result.centroids.len(), 2);
        assert!(result.assignments.iter().all(|c| c.get() == 1));
    }

    #[test]
    fn test_centroids_are_unit_length() {
        let result = kmeans_clustering(&three_axis_clusters(), 3, 11).unwrap();
        for centroid in &result.centroids {
            let norm: f32 = centroid.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }
}
