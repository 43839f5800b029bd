use clustering::{ClusterId, Clustering};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub cluster_id: ClusterId,
    pub replicas: usize,
    /// Mean of the centroid's access-frequency and client-spread values.
    pub score: f64,
}

/// Maps each cluster to a replica count. Scores are rescaled across the
/// partition so the busiest, most widely shared cluster gets `max_replicas`
/// and the quietest gets `min_replicas`; the mapping is monotonic in score.
pub fn tier_policies(clustering: &Clustering, min_replicas: usize, max_replicas: usize) -> Vec<TierPolicy> {
    let scores: Vec<(ClusterId, f64)> = clustering
        .clusters
        .iter()
        .map(|cluster| {
            let score = clustering
                .summary(cluster.id)
                .map(|s| (s.mean_access_frequency + s.mean_client_spread) / 2.0)
                .unwrap_or(0.0);
            (cluster.id, score)
        })
        .collect();

    let low = scores.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let high = scores.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
    let span = high - low;
    let range = (max_replicas - min_replicas) as f64;

    scores
        .into_iter()
        .map(|(cluster_id, score)| {
            let relative = if span > 1e-12 {
                (score - low) / span
            } else {
                score.clamp(0.0, 1.0)
            };
            let replicas = (min_replicas + (relative * range).round() as usize).clamp(min_replicas, max_replicas);
            info!(
                "Cluster {} policy: {} replicas (score {:.4})",
                cluster_id, replicas, score
            );
            TierPolicy {
                cluster_id,
                replicas,
                score,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustering::Cluster;
    use features::Dimension;
    use std::collections::{BTreeMap, BTreeSet};

    fn clustering(centroids: &[[f64; 2]]) -> Clustering {
        Clustering {
            dimensions: vec![Dimension::AccessFrequency, Dimension::ClientSpread],
            clusters: centroids
                .iter()
                .enumerate()
                .map(|(id, c)| Cluster {
                    id,
                    centroid: c.to_vec(),
                    members: BTreeSet::new(),
                })
                .collect(),
            assignments: BTreeMap::new(),
            iterations: 1,
            converged: true,
            reseeds: 0,
        }
    }

    #[test]
    fn test_extremes_map_to_bounds() {
        let policies = tier_policies(&clustering(&[[0.05, 0.1], [1.0, 1.0], [0.5, 0.4]]), 1, 4);
        assert_eq!(policies[0].replicas, 1);
        assert_eq!(policies[1].replicas, 4);
        assert!(policies[2].replicas > 1 && policies[2].replicas < 4);
    }

    #[test]
    fn test_mapping_is_monotonic() {
        let policies = tier_policies(
            &clustering(&[[0.9, 0.8], [0.1, 0.0], [0.3, 0.3], [0.6, 0.7]]),
            2,
            5,
        );
        let mut by_score = policies.clone();
        by_score.sort_by(|a, b| a.score.total_cmp(&b.score));
        for pair in by_score.windows(2) {
            assert!(pair[0].replicas <= pair[1].replicas);
        }
    }

    #[test]
    fn test_single_cluster_uses_raw_score() {
        assert_eq!(tier_policies(&clustering(&[[0.0, 0.0]]), 1, 3)[0].replicas, 1);
        assert_eq!(tier_policies(&clustering(&[[1.0, 1.0]]), 1, 3)[0].replicas, 3);
    }
}
