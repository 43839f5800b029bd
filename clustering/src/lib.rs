mod classify;
mod kmeans;

pub use classify::{classify_clusters, median, tie_break_factor};
pub use kmeans::KMeans;

use catalog::FileId;
use features::Dimension;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type ClusterId = usize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeansConfig {
    pub k: usize,
    pub seed: u64,
    pub max_iterations: usize,
    /// Total centroid movement below which iteration stops.
    pub convergence_epsilon: f64,
}

impl KMeansConfig {
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(ClusteringError::InvalidConfig("k must be at least 1".to_string()));
        }
        if self.max_iterations == 0 {
            return Err(ClusteringError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !(self.convergence_epsilon.is_finite() && self.convergence_epsilon >= 0.0) {
            return Err(ClusteringError::InvalidConfig(format!(
                "convergence_epsilon must be finite and non-negative, got {}",
                self.convergence_epsilon
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub centroid: Vec<f64>,
    pub members: BTreeSet<FileId>,
}

/// Mean behaviour of a cluster, read off its centroid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BehaviorSummary {
    pub mean_access_frequency: f64,
    pub mean_client_spread: f64,
    pub mean_write_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clustering {
    pub dimensions: Vec<Dimension>,
    pub clusters: Vec<Cluster>,
    pub assignments: BTreeMap<FileId, ClusterId>,
    pub iterations: usize,
    pub converged: bool,
    /// Number of times an empty cluster was reseeded.
    pub reseeds: usize,
}

impl Clustering {
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn cluster_of(&self, file_id: &str) -> Option<ClusterId> {
        self.assignments.get(file_id).copied()
    }

    /// Centroids ordered by Euclidean distance to `point`, nearest first,
    /// ties broken by cluster id.
    pub fn ranked_centroids(&self, point: &[f64]) -> Vec<(ClusterId, f64)> {
        let mut ranked: Vec<(ClusterId, f64)> = self
            .clusters
            .iter()
            .map(|cluster| (cluster.id, squared_distance(point, &cluster.centroid).sqrt()))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        ranked
    }

    pub fn summary(&self, id: ClusterId) -> Option<BehaviorSummary> {
        let cluster = self.clusters.get(id)?;
        let value = |dimension: Dimension| {
            self.dimensions
                .iter()
                .position(|d| *d == dimension)
                .map(|i| cluster.centroid[i])
                .unwrap_or(0.0)
        };
        Some(BehaviorSummary {
            mean_access_frequency: value(Dimension::AccessFrequency),
            mean_client_spread: value(Dimension::ClientSpread),
            mean_write_ratio: value(Dimension::WriteRatio),
        })
    }
}

pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

pub type Result<T> = std::result::Result<T, ClusteringError>;

#[derive(Debug, thiserror::Error)]
pub enum ClusteringError {
    #[error("Invalid cluster count: k = {k} with {n} feature vectors")]
    InvalidClusterCount { k: usize, n: usize },

    #[error("No feature vectors to cluster")]
    EmptyFeatureSet,

    #[error("Feature vector {file_id} has {actual} finite values, expected {expected}")]
    DimensionMismatch {
        file_id: FileId,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid clustering configuration: {0}")]
    InvalidConfig(String),
}
