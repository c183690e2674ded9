//! Approximate nearest-neighbour index over unit-normalized embeddings.
//!
//! Small partitions are searched exhaustively. Larger ones are organised as an
//! inverted file (IVF): vectors are grouped by K-means and a query only scans
//! the `n_probe` clusters whose centroids are closest to it.
//!
//! Results are ranked by score descending, then by insertion index ascending,
//! so among equally similar entries the first-inserted one wins.

use serde::{Deserialize, Serialize};

use crate::vector::{
    ClusterId, Score, VectorDimension, VectorError, assign_to_nearest_centroid, cosine_similarity,
    kmeans_clustering,
};

/// Partitions smaller than this are searched exhaustively.
pub const DEFAULT_FLAT_THRESHOLD: usize = 2048;

/// Clusters scanned per query.
pub const DEFAULT_N_PROBE: usize = 8;

/// Upper bound for the number of IVF clusters.
const MAX_CLUSTERS: usize = 1024;

/// Fixed clustering seed so identical inputs build identical indexes.
pub const DEFAULT_SEED: u64 = 0x7472_616e_736d_656d;

/// Tuning knobs for [`VectorIndex::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexParams {
    pub flat_threshold: usize,
    pub n_probe: usize,
    pub max_clusters: usize,
    pub seed: u64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            flat_threshold: DEFAULT_FLAT_THRESHOLD,
            n_probe: DEFAULT_N_PROBE,
            max_clusters: MAX_CLUSTERS,
            seed: DEFAULT_SEED,
        }
    }
}

/// Serializable clustering state of an index.
///
/// The vectors themselves are persisted separately; this is what
/// `index.bin` holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexState {
    pub centroids: Vec<Vec<f32>>,
    /// 1-based cluster id per vector; empty for a flat index.
    pub assignments: Vec<u32>,
    pub n_probe: usize,
}

/// In-memory ANN index over one partition of the dictionary.
///
/// Index `i` in search results refers to the `i`-th inserted vector.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: VectorDimension,
    vectors: Vec<Vec<f32>>,
    centroids: Vec<Vec<f32>>,
    /// Member indices per cluster, ascending.
    lists: Vec<Vec<usize>>,
    assignments: Vec<ClusterId>,
    n_probe: usize,
}

impl VectorIndex {
    /// Builds an index over `vectors`.
    ///
    /// # Errors
    /// Fails if a vector has the wrong dimension or clustering fails.
    pub fn build(
        dimension: VectorDimension,
        vectors: Vec<Vec<f32>>,
        params: &IndexParams,
    ) -> Result<Self, VectorError> {
        for vector in &vectors {
            dimension.validate_vector(vector)?;
        }

        let n_probe = params.n_probe.max(1);

        if vectors.len() < params.flat_threshold.max(1) {
            tracing::debug!("Building flat index over {} vectors", vectors.len());
            return Ok(Self {
                dimension,
                vectors,
                centroids: Vec::new(),
                lists: Vec::new(),
                assignments: Vec::new(),
                n_probe,
            });
        }

        // sqrt(n) clusters, clamped to reasonable bounds
        let k = ((vectors.len() as f32).sqrt().ceil() as usize)
            .clamp(1, params.max_clusters.max(1))
            .min(vectors.len());

        let clustering = kmeans_clustering(&vectors, k, params.seed)
            .map_err(|e| VectorError::ClusteringFailed(e.to_string()))?;

        tracing::debug!(
            "Built IVF index: {} vectors, {} clusters, {} iterations",
            vectors.len(),
            k,
            clustering.iterations
        );

        let lists = build_lists(&clustering.assignments, clustering.centroids.len());

        Ok(Self {
            dimension,
            vectors,
            centroids: clustering.centroids,
            lists,
            assignments: clustering.assignments,
            n_probe,
        })
    }

    /// An index with no vectors.
    #[must_use]
    pub fn empty(dimension: VectorDimension) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            centroids: Vec::new(),
            lists: Vec::new(),
            assignments: Vec::new(),
            n_probe: DEFAULT_N_PROBE,
        }
    }

    /// Restores an index from persisted vectors and clustering state.
    ///
    /// # Errors
    /// Returns [`VectorError::InconsistentIndex`] when the state does not
    /// describe these vectors.
    pub fn from_parts(
        dimension: VectorDimension,
        vectors: Vec<Vec<f32>>,
        state: IndexState,
    ) -> Result<Self, VectorError> {
        for vector in &vectors {
            dimension.validate_vector(vector)?;
        }
        for centroid in &state.centroids {
            dimension.validate_vector(centroid)?;
        }

        if state.centroids.is_empty() {
            if !state.assignments.is_empty() {
                return Err(VectorError::InconsistentIndex(
                    "flat index carries cluster assignments".to_string(),
                ));
            }
        } else if state.assignments.len() != vectors.len() {
            return Err(VectorError::InconsistentIndex(format!(
                "{} assignments for {} vectors",
                state.assignments.len(),
                vectors.len()
            )));
        }

        let mut assignments = Vec::with_capacity(state.assignments.len());
        for raw in &state.assignments {
            let cluster = ClusterId::new(*raw)
                .filter(|c| c.position() < state.centroids.len())
                .ok_or_else(|| {
                    VectorError::InconsistentIndex(format!(
                        "cluster id {raw} out of range (have {} clusters)",
                        state.centroids.len()
                    ))
                })?;
            assignments.push(cluster);
        }

        let lists = build_lists(&assignments, state.centroids.len());

        Ok(Self {
            dimension,
            vectors,
            centroids: state.centroids,
            lists,
            assignments,
            n_probe: state.n_probe.max(1),
        })
    }

    /// Exports the clustering state for persistence.
    #[must_use]
    pub fn state(&self) -> IndexState {
        IndexState {
            centroids: self.centroids.clone(),
            assignments: self.assignments.iter().map(ClusterId::get).collect(),
            n_probe: self.n_probe,
        }
    }

    /// Returns the `k` best matches for `query` as `(index, score)` pairs.
    ///
    /// # Errors
    /// Fails if the query has the wrong dimension.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, Score)>, VectorError> {
        self.dimension.validate_vector(query)?;

        if k == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<(usize, Score)> = if self.is_flat() {
            self.score_all(query, 0..self.vectors.len())
        } else {
            let mut members: Vec<usize> = self
                .probe_order(query)
                .into_iter()
                .take(self.n_probe)
                .flat_map(|cluster| self.lists[cluster].iter().copied())
                .collect();
            members.sort_unstable();
            self.score_all(query, members)
        };

        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        candidates.truncate(k);
        Ok(candidates)
    }

    fn score_all(
        &self,
        query: &[f32],
        indices: impl IntoIterator<Item = usize>,
    ) -> Vec<(usize, Score)> {
        indices
            .into_iter()
            .filter_map(|i| {
                Score::new(cosine_similarity(query, &self.vectors[i]))
                    .ok()
                    .map(|score| (i, score))
            })
            .collect()
    }

    /// Cluster positions ordered by centroid similarity, ties to the lower position.
    fn probe_order(&self, query: &[f32]) -> Vec<usize> {
        let centroid_refs: Vec<&[f32]> = self.centroids.iter().map(|c| c.as_slice()).collect();
        let nearest = assign_to_nearest_centroid(query, &centroid_refs).position();

        let mut order: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != nearest)
            .map(|(i, c)| (i, cosine_similarity(query, c)))
            .collect();
        order.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        std::iter::once(nearest)
            .chain(order.into_iter().map(|(i, _)| i))
            .collect()
    }

    /// Returns the stored vector at `index`.
    #[must_use]
    pub fn vector(&self, index: usize) -> Option<&[f32]> {
        self.vectors.get(index).map(|v| v.as_slice())
    }

    /// All stored vectors in insertion order.
    #[must_use]
    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Whether queries scan every vector.
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.centroids.is_empty()
    }

    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.centroids.len()
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Gets the cluster assignment for a specific vector.
    #[must_use]
    pub fn cluster_for(&self, index: usize) -> Option<ClusterId> {
        self.assignments.get(index).copied()
    }
}

fn build_lists(assignments: &[ClusterId], clusters: usize) -> Vec<Vec<usize>> {
    let mut lists = vec![Vec::new(); clusters];
    for (i, cluster) in assignments.iter().enumerate() {
        lists[cluster.position()].push(i);
    }
    lists
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(v: Vec<f32>) -> Vec<f32> {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.into_iter().map(|x| x / norm).collect()
    }

    fn spread_vectors(n: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                let t = i as f32 * 0.37;
                unit(vec![t.sin() + 1.5, t.cos() + 0.2, (t * 1.7).sin(), (t * 0.3).cos()])
            })
            .collect()
    }

    fn ivf_params() -> IndexParams {
        IndexParams {
            flat_threshold: 1,
            n_probe: 1,
            ..IndexParams::default()
        }
    }

    #[test]
    fn test_flat_search_ranks_by_score() {
        let dim = VectorDimension::new(2).unwrap();
        let vectors = vec![unit(vec![1.0, 0.0]), unit(vec![0.0, 1.0]), unit(vec![1.0, 1.0])];
        let index = VectorIndex::build(dim, vectors, &IndexParams::default()).unwrap();
        assert!(index.is_flat());

        let results = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(results[0].0, 0);
        assert_eq!(results[1].0, 2);
        assert_eq!(results[2].0, 1);
    }

    #[test]
    fn test_ties_go_to_first_inserted() {
        let dim = VectorDimension::new(2).unwrap();
        let same = unit(vec![0.6, 0.8]);
        let vectors = vec![unit(vec![1.0, 0.0]), same.clone(), same.clone()];
        let index = VectorIndex::build(dim, vectors, &IndexParams::default()).unwrap();

        let results = index.search(&same, 2).unwrap();
        assert_eq!(results[0].0, 1);
        assert_eq!(results[1].0, 2);
    }

    #[test]
    fn test_ivf_self_retrieval() {
        let dim = VectorDimension::new(4).unwrap();
        let vectors = spread_vectors(60);
        let index = VectorIndex::build(dim, vectors.clone(), &ivf_params()).unwrap();
        assert!(!index.is_flat());
        assert!(index.cluster_count() > 1);

        for (i, vector) in vectors.iter().enumerate() {
            let results = index.search(vector, 1).unwrap();
            let (hit, score) = results[0];
            assert!(score.get() > 0.9999, "vector {i} scored {}", score.get());
            // Either itself or an earlier duplicate
            assert!(hit <= i);
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let dim = VectorDimension::new(4).unwrap();
        let a = VectorIndex::build(dim, spread_vectors(40), &ivf_params()).unwrap();
        let b = VectorIndex::build(dim, spread_vectors(40), &ivf_params()).unwrap();
        assert_eq!(a.state(), b.state());
    }

    #[test]
    fn test_state_roundtrip_preserves_results() {
        let dim = VectorDimension::new(4).unwrap();
        let vectors = spread_vectors(30);
        let built = VectorIndex::build(dim, vectors.clone(), &ivf_params()).unwrap();
        let restored = VectorIndex::from_parts(dim, vectors.clone(), built.state()).unwrap();

        let query = &vectors[7];
        assert_eq!(built.search(query, 5).unwrap(), restored.search(query, 5).unwrap());
    }

    #[test]
    fn test_from_parts_rejects_inconsistent_state() {
        let dim = VectorDimension::new(4).unwrap();
        let vectors = spread_vectors(10);
        let mut state = VectorIndex::build(dim, vectors.clone(), &ivf_params())
            .unwrap()
            .state();
        state.assignments.pop();
        assert!(matches!(
            VectorIndex::from_parts(dim, vectors.clone(), state.clone()),
            Err(VectorError::InconsistentIndex(_))
        ));

        state.assignments = vec![999; vectors.len()];
        assert!(matches!(
            VectorIndex::from_parts(dim, vectors, state),
            Err(VectorError::InconsistentIndex(_))
        ));
    }

    #[test]
    fn test_empty_index_and_dimension_check() {
        let dim = VectorDimension::new(3).unwrap();
        let index = VectorIndex::build(dim, Vec::new(), &IndexParams::default()).unwrap();
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
        assert!(matches!(
            index.search(&[1.0, 0.0], 5),
            Err(VectorError::DimensionMismatch { .. })
        ));
    }
}
