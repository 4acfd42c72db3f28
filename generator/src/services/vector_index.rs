//! In-memory vector store with cosine similarity search and k-means clustering.

use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::RwLock;
use postgen_config::{CacheSettings, VectorIndexSettings};
use postgen_utils::CacheManager;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::Metadata;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorIndexError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector not found: {0}")]
    NotFound(String),

    #[error("Insufficient vectors: requested {requested} clusters from {available} vectors")]
    InsufficientVectors { requested: usize, available: usize },

    #[error("No ids given")]
    EmptyIds,
}

pub type VectorResult<T> = Result<T, VectorIndexError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub centroid: Vec<f32>,
    pub member_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResult {
    pub clusters: Vec<Cluster>,
    pub iterations: usize,
    /// False when the iteration bound was hit before assignments settled
    pub converged: bool,
}

/// Vector math helpers
pub struct VectorOps;

impl VectorOps {
    /// Cosine similarity in [-1, 1]; 0 when either vector is zero or lengths differ
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;
        for (x, y) in a.iter().zip(b.iter()) {
            let (x, y) = (*x as f64, *y as f64);
            dot += x * y;
            norm_a += x * x;
            norm_b += y * y;
        }

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
        if similarity.is_nan() {
            0.0
        } else {
            similarity.clamp(-1.0, 1.0) as f32
        }
    }

    pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
        1.0 - Self::cosine_similarity(a, b)
    }

    /// Component-wise mean of equal-length vectors
    pub fn mean(vectors: &[&[f32]]) -> Vec<f32> {
        let Some(first) = vectors.first() else {
            return Vec::new();
        };

        let mut sum = vec![0.0f64; first.len()];
        for vector in vectors {
            for (acc, v) in sum.iter_mut().zip(vector.iter()) {
                *acc += *v as f64;
            }
        }

        let n = vectors.len() as f64;
        sum.into_iter().map(|v| (v / n) as f32).collect()
    }
}

pub struct VectorIndex {
    dimension: usize,
    settings: VectorIndexSettings,
    records: RwLock<IndexMap<String, VectorRecord>>,
    query_cache: Option<CacheManager>,
}

#[derive(Serialize)]
struct QueryKey<'a> {
    vector: &'a [f32],
    k: usize,
    threshold: f32,
}

impl VectorIndex {
    pub fn new(dimension: usize, settings: VectorIndexSettings) -> Self {
        let query_cache = settings.query_cache.then(|| {
            CacheManager::new(CacheSettings {
                capacity: settings.query_cache_capacity,
                default_ttl_ms: Duration::from_secs(600).as_millis() as u64,
                ..Default::default()
            })
        });

        Self {
            dimension,
            settings,
            records: RwLock::new(IndexMap::new()),
            query_cache,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn check_dimension(&self, vector: &[f32]) -> VectorResult<()> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn invalidate_queries(&self) {
        if let Some(cache) = &self.query_cache {
            cache.clear();
        }
    }

    /// Insert or replace a record; a replaced id keeps its original position
    pub fn add(&self, id: impl Into<String>, vector: Vec<f32>, metadata: Metadata) -> VectorResult<()> {
        self.check_dimension(&vector)?;
        let id = id.into();

        self.records.write().insert(
            id.clone(),
            VectorRecord {
                id,
                vector,
                metadata,
            },
        );
        self.invalidate_queries();
        Ok(())
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = self.records.write().shift_remove(id).is_some();
        if removed {
            self.invalidate_queries();
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<VectorRecord> {
        self.records.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.read().keys().cloned().collect()
    }

    /// Top `k` records with `score >= threshold`, best first; ties keep insertion order
    pub fn search(&self, query: &[f32], k: usize, threshold: f32) -> VectorResult<Vec<VectorMatch>> {
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let cache_key = self.query_cache.as_ref().map(|_| query_cache_key(query, k, threshold));
        if let (Some(cache), Some(key)) = (&self.query_cache, &cache_key) {
            if let Some(hit) = cache.get::<Vec<VectorMatch>>(key) {
                return Ok(hit);
            }
        }

        // The read guard is held until the result is cached so a concurrent
        // mutation can only invalidate after this entry is written
        let records = self.records.read();
        let matches = Self::rank(&records, query, k, threshold, |_| true);

        if let (Some(cache), Some(key)) = (&self.query_cache, &cache_key) {
            if let Err(e) = cache.set(key, &matches, None) {
                tracing::debug!("Query result not cached: {}", e);
            }
        }
        Ok(matches)
    }

    /// Like [`search`](Self::search) but only scores records accepted by `predicate`
    pub fn search_filtered<F>(
        &self,
        query: &[f32],
        k: usize,
        threshold: f32,
        predicate: F,
    ) -> VectorResult<Vec<VectorMatch>>
    where
        F: Fn(&VectorRecord) -> bool + Sync,
    {
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let records = self.records.read();
        Ok(Self::rank(&records, query, k, threshold, predicate))
    }

    fn rank<F>(
        records: &IndexMap<String, VectorRecord>,
        query: &[f32],
        k: usize,
        threshold: f32,
        predicate: F,
    ) -> Vec<VectorMatch>
    where
        F: Fn(&VectorRecord) -> bool + Sync,
    {
        let candidates: Vec<&VectorRecord> = records.values().collect();

        // Parallel collect preserves input order, so the stable sort below keeps insertion order on ties
        let mut scored: Vec<(&VectorRecord, f32)> = candidates
            .par_iter()
            .filter(|record| predicate(record))
            .map(|record| (*record, VectorOps::cosine_similarity(query, &record.vector)))
            .filter(|(_, score)| *score >= threshold)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(record, score)| VectorMatch {
                id: record.id.clone(),
                score,
                metadata: record.metadata.clone(),
            })
            .collect()
    }

    /// Component-wise mean of the named vectors
    pub fn calculate_centroid(&self, ids: &[String]) -> VectorResult<Vec<f32>> {
        if ids.is_empty() {
            return Err(VectorIndexError::EmptyIds);
        }

        let records = self.records.read();
        let vectors = ids
            .iter()
            .map(|id| {
                records
                    .get(id)
                    .map(|r| r.vector.as_slice())
                    .ok_or_else(|| VectorIndexError::NotFound(id.clone()))
            })
            .collect::<VectorResult<Vec<&[f32]>>>()?;

        Ok(VectorOps::mean(&vectors))
    }

    /// k-means over all stored vectors using cosine distance.
    ///
    /// Best effort: stops when assignments no longer change or after
    /// `kmeans_max_iterations` rounds, whichever comes first.
    pub fn find_clusters(&self, k: usize) -> VectorResult<ClusterResult> {
        let records = self.records.read();
        let n = records.len();
        if k == 0 || k > n {
            return Err(VectorIndexError::InsufficientVectors {
                requested: k,
                available: n,
            });
        }

        let vectors: Vec<&[f32]> = records.values().map(|r| r.vector.as_slice()).collect();
        let mut centroids = Self::initialize_centroids(&vectors, k);
        let mut assignments = vec![usize::MAX; n];
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.settings.kmeans_max_iterations {
            iterations += 1;

            // Assign points to nearest centroids
            let next: Vec<usize> = vectors
                .par_iter()
                .map(|v| Self::nearest(v, &centroids))
                .collect();

            if next == assignments {
                converged = true;
                break;
            }
            assignments = next;

            // Update centroids; an empty cluster keeps its previous centroid
            for (cluster, centroid) in centroids.iter_mut().enumerate() {
                let members: Vec<&[f32]> = vectors
                    .iter()
                    .zip(assignments.iter())
                    .filter(|(_, a)| **a == cluster)
                    .map(|(v, _)| *v)
                    .collect();
                if !members.is_empty() {
                    *centroid = VectorOps::mean(&members);
                }
            }
        }

        let ids: Vec<&String> = records.keys().collect();
        let clusters = centroids
            .into_iter()
            .enumerate()
            .map(|(cluster, centroid)| Cluster {
                centroid,
                member_ids: ids
                    .iter()
                    .zip(assignments.iter())
                    .filter(|(_, a)| **a == cluster)
                    .map(|(id, _)| (*id).clone())
                    .collect(),
            })
            .collect();

        Ok(ClusterResult {
            clusters,
            iterations,
            converged,
        })
    }

    /// Farthest-point initialisation: first vector, then repeatedly the vector
    /// farthest from its nearest chosen centroid
    fn initialize_centroids(vectors: &[&[f32]], k: usize) -> Vec<Vec<f32>> {
        let mut centroids: Vec<Vec<f32>> = vec![vectors[0].to_vec()];

        while centroids.len() < k {
            let mut best_index = 0;
            let mut best_distance = f32::NEG_INFINITY;

            for (i, vector) in vectors.iter().enumerate() {
                let distance = centroids
                    .iter()
                    .map(|c| VectorOps::cosine_distance(vector, c))
                    .fold(f32::INFINITY, f32::min);
                if distance > best_distance {
                    best_distance = distance;
                    best_index = i;
                }
            }

            centroids.push(vectors[best_index].to_vec());
        }

        centroids
    }

    fn nearest(vector: &[f32], centroids: &[Vec<f32>]) -> usize {
        let mut best_cluster = 0;
        let mut best_distance = f32::INFINITY;

        for (j, centroid) in centroids.iter().enumerate() {
            let distance = VectorOps::cosine_distance(vector, centroid);
            if distance < best_distance {
                best_distance = distance;
                best_cluster = j;
            }
        }

        best_cluster
    }
}

fn query_cache_key(vector: &[f32], k: usize, threshold: f32) -> String {
    let key = QueryKey { vector, k, threshold };
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(&key).unwrap_or_default());
    format!("vq:{:x}", hasher.finalize())
}
