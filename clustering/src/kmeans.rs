use features::{FeatureSet, FeatureVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::{squared_distance, Cluster, ClusterId, Clustering, ClusteringError, KMeansConfig, Result};

/// K-means with K-means++ seeding. All randomness comes from a `StdRng`
/// seeded from the config, so a fixed seed reproduces the partition.
pub struct KMeans {
    config: KMeansConfig,
}

impl KMeans {
    pub fn new(config: KMeansConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &KMeansConfig {
        &self.config
    }

    pub fn fit(&self, features: &FeatureSet) -> Result<Clustering> {
        let n = features.len();
        let k = self.config.k;
        if n == 0 {
            return Err(ClusteringError::EmptyFeatureSet);
        }
        if k > n {
            return Err(ClusteringError::InvalidClusterCount { k, n });
        }

        let dims = features.dimensions.len();
        for vector in &features.vectors {
            let finite = vector.values.iter().filter(|x| x.is_finite()).count();
            if vector.values.len() != dims || finite != dims {
                return Err(ClusteringError::DimensionMismatch {
                    file_id: vector.file_id.clone(),
                    expected: dims,
                    actual: finite,
                });
            }
        }

        // Index order doubles as file id order for every tie-break below.
        let mut points: Vec<&FeatureVector> = features.vectors.iter().collect();
        points.sort_by(|a, b| a.file_id.cmp(&b.file_id));

        info!("Clustering {} vectors into {} clusters (seed {})", n, k, self.config.seed);

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut centroids = seed_centroids(&points, k, &mut rng);
        let mut assignment = assign(&points, &centroids);
        let mut iterations = 0;
        let mut converged = false;
        let mut reseeds = 0;

        while iterations < self.config.max_iterations {
            iterations += 1;
            reseeds += fill_empty_clusters(&points, &mut assignment, &mut centroids);

            let updated = means(&points, &assignment, &centroids);
            let movement: f64 = centroids
                .iter()
                .zip(&updated)
                .map(|(old, new)| squared_distance(old, new).sqrt())
                .sum();
            centroids = updated;

            let reassigned = assign(&points, &centroids);
            let changed = assignment
                .iter()
                .zip(&reassigned)
                .filter(|(a, b)| a != b)
                .count();
            assignment = reassigned;

            debug!(
                "Iteration {}: {} reassignments, centroid movement {:.6}",
                iterations, changed, movement
            );

            if changed == 0 || movement < self.config.convergence_epsilon {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                "K-means did not converge within {} iterations; returning the partition at the cap",
                self.config.max_iterations
            );
        }

        reseeds += fill_empty_clusters(&points, &mut assignment, &mut centroids);
        let centroids = means(&points, &assignment, &centroids);

        let mut members: Vec<BTreeSet<String>> = vec![BTreeSet::new(); k];
        let mut assignments = BTreeMap::new();
        for (point, cluster) in points.iter().zip(&assignment) {
            members[*cluster].insert(point.file_id.clone());
            assignments.insert(point.file_id.clone(), *cluster);
        }

        let clusters: Vec<Cluster> = centroids
            .into_iter()
            .zip(members)
            .enumerate()
            .map(|(id, (centroid, members))| Cluster { id, centroid, members })
            .collect();

        info!(
            "Clustering finished after {} iterations (converged: {}, reseeds: {}), sizes {:?}",
            iterations,
            converged,
            reseeds,
            clusters.iter().map(|c| c.members.len()).collect::<Vec<_>>()
        );

        Ok(Clustering {
            dimensions: features.dimensions.clone(),
            clusters,
            assignments,
            iterations,
            converged,
            reseeds,
        })
    }
}

/// K-means++: the first centroid is uniform, each later one is drawn with
/// probability proportional to its squared distance from the nearest
/// centroid chosen so far.
fn seed_centroids(points: &[&FeatureVector], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = points.len();
    let first = rng.gen_range(0..n);
    let mut chosen = vec![false; n];
    chosen[first] = true;

    let mut centroids = vec![points[first].values.clone()];
    let mut nearest: Vec<f64> = points
        .iter()
        .map(|p| squared_distance(&p.values, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = (0..n).filter(|&i| !chosen[i]).map(|i| nearest[i]).sum();

        let next = if total > 0.0 {
            let threshold = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            let mut picked = None;
            let mut last_positive = None;
            for i in (0..n).filter(|&i| !chosen[i] && nearest[i] > 0.0) {
                cumulative += nearest[i];
                last_positive = Some(i);
                if cumulative >= threshold {
                    picked = Some(i);
                    break;
                }
            }
            picked.or(last_positive)
        } else {
            None
        };

        // Every remaining point coincides with a centroid; take the lowest one.
        let next = match next.or_else(|| (0..n).find(|&i| !chosen[i])) {
            Some(i) => i,
            None => break,
        };

        chosen[next] = true;
        let centroid = points[next].values.clone();
        for (i, point) in points.iter().enumerate() {
            nearest[i] = nearest[i].min(squared_distance(&point.values, &centroid));
        }
        centroids.push(centroid);
    }

    centroids
}

/// Nearest centroid per point, ties to the lowest cluster id.
fn assign(points: &[&FeatureVector], centroids: &[Vec<f64>]) -> Vec<ClusterId> {
    points
        .iter()
        .map(|point| {
            let mut best = 0;
            let mut best_distance = f64::INFINITY;
            for (id, centroid) in centroids.iter().enumerate() {
                let distance = squared_distance(&point.values, centroid);
                if distance < best_distance {
                    best = id;
                    best_distance = distance;
                }
            }
            best
        })
        .collect()
}

/// Member means; a cluster without members keeps its previous centroid.
fn means(points: &[&FeatureVector], assignment: &[ClusterId], previous: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let dims = previous.first().map(|c| c.len()).unwrap_or(0);
    let mut sums = vec![vec![0.0; dims]; previous.len()];
    let mut counts = vec![0usize; previous.len()];

    for (point, cluster) in points.iter().zip(assignment) {
        counts[*cluster] += 1;
        for (sum, value) in sums[*cluster].iter_mut().zip(&point.values) {
            *sum += value;
        }
    }

    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), old)| {
            if count == 0 {
                old.clone()
            } else {
                sum.into_iter().map(|s| s / count as f64).collect()
            }
        })
        .collect()
}

/// Moves the point farthest from its own centroid into each empty cluster,
/// drawing only from clusters that keep at least one member. Returns the
/// number of clusters reseeded.
fn fill_empty_clusters(
    points: &[&FeatureVector],
    assignment: &mut [ClusterId],
    centroids: &mut [Vec<f64>],
) -> usize {
    let mut sizes = vec![0usize; centroids.len()];
    for cluster in assignment.iter() {
        sizes[*cluster] += 1;
    }

    let mut reseeded = 0;
    for empty in 0..centroids.len() {
        if sizes[empty] > 0 {
            continue;
        }

        let mut farthest: Option<(usize, f64)> = None;
        for (i, point) in points.iter().enumerate() {
            let owner = assignment[i];
            if sizes[owner] < 2 {
                continue;
            }
            let distance = squared_distance(&point.values, &centroids[owner]);
            if farthest.map_or(true, |(_, best)| distance > best) {
                farthest = Some((i, distance));
            }
        }

        // k <= n guarantees a donor whenever a cluster is empty.
        let Some((index, _)) = farthest else { break };

        sizes[assignment[index]] -= 1;
        assignment[index] = empty;
        sizes[empty] = 1;
        centroids[empty] = points[index].values.clone();
        reseeded += 1;

        debug!("Reseeded empty cluster {} with {}", empty, points[index].file_id);
    }

    reseeded
}
