use catalog::Category;
use features::{Dimension, FeatureSet};
use std::collections::BTreeMap;
use tracing::debug;

use crate::{ClusterId, Clustering};

/// Deviation band inside which a cluster still counts as moderate.
const MODERATE_BAND: f64 = 0.1;

/// Weight and expected direction of a dimension for a tier. A direction of
/// 0 accepts a deviation either way.
fn rule(category: Category, dimension: Dimension) -> (f64, i8) {
    use Dimension::*;
    match category {
        Category::Hot => match dimension {
            AccessFrequency => (1.0, 1),
            ClientSpread => (0.3, 1),
            Recency => (1.0, 1),
            WriteRatio => (0.5, 1),
            Locality => (0.5, 1),
            Concurrency => (1.0, 1),
            Age => (0.8, -1),
            Size => (0.0, 0),
        },
        Category::Shared => match dimension {
            AccessFrequency => (0.7, 1),
            ClientSpread => (1.0, 1),
            Recency => (0.3, 1),
            WriteRatio => (0.3, -1),
            Locality => (0.8, -1),
            Concurrency => (0.5, 1),
            Age => (0.2, 0),
            Size => (0.0, 0),
        },
        Category::Moderate => (0.5, 0),
        Category::Archival => match dimension {
            AccessFrequency => (0.8, -1),
            ClientSpread => (0.3, -1),
            Recency => (0.8, -1),
            WriteRatio => (0.2, -1),
            Locality => (0.3, 1),
            Concurrency => (0.3, -1),
            Age => (1.0, 1),
            Size => (0.2, 1),
        },
    }
}

/// Preference among tiers with identical scores.
pub fn tie_break_factor(category: Category) -> u8 {
    match category {
        Category::Archival => 4,
        Category::Hot => 3,
        Category::Shared => 2,
        Category::Moderate => 1,
    }
}

pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn score(category: Category, dimensions: &[Dimension], cluster: &[f64], global: &[f64]) -> f64 {
    let mut score = 0.0;
    for (d, dimension) in dimensions.iter().enumerate() {
        let (weight, direction) = rule(category, *dimension);
        let delta = cluster[d] - global[d];
        if category == Category::Moderate {
            if delta.abs() < MODERATE_BAND {
                score += weight * (1.0 - delta.abs()).powi(2);
            }
        } else {
            let sign = if delta > 0.0 {
                1
            } else if delta < 0.0 {
                -1
            } else {
                0
            };
            if direction == 0 || sign == direction {
                score += weight * delta * delta;
            }
        }
    }
    score
}

fn column_medians<'a, I>(dims: usize, rows: I) -> Vec<f64>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); dims];
    for row in rows {
        for (d, value) in row.iter().enumerate().take(dims) {
            columns[d].push(*value);
        }
    }
    columns.iter_mut().map(|column| median(column)).collect()
}

/// Labels every cluster with the tier whose profile best matches the
/// deviation of its member medians from the population medians.
pub fn classify_clusters(clustering: &Clustering, features: &FeatureSet) -> BTreeMap<ClusterId, Category> {
    let dims = features.dimensions.len();
    let global = column_medians(dims, features.vectors.iter().map(|v| v.values.as_slice()));

    clustering
        .clusters
        .iter()
        .map(|cluster| {
            let medians = column_medians(
                dims,
                cluster
                    .members
                    .iter()
                    .filter_map(|id| features.get(id))
                    .map(|v| v.values.as_slice()),
            );

            let mut best = Category::Moderate;
            let mut best_score = f64::NEG_INFINITY;
            for category in Category::ALL {
                let s = score(category, &features.dimensions, &medians, &global);
                let better = s > best_score
                    || (s == best_score && tie_break_factor(category) > tie_break_factor(best));
                if better {
                    best = category;
                    best_score = s;
                }
            }

            debug!("Cluster {} labelled {} (score {:.4})", cluster.id, best, best_score);
            (cluster.id, best)
        })
        .collect()
}
