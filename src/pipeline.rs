use catalog::{AccessEvent, Category, FileRecord, NodeState};
use clustering::{classify_clusters, BehaviorSummary, ClusterId, KMeans};
use features::{Dimension, FeatureExtractor};
use placement::{NodeProjection, PlanningInput, ReplicaPlan, ReplicationPlanner, UnsatisfiedFile};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ReplicationError, Result};
use crate::ingest::FeedSource;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster_id: ClusterId,
    pub label: Category,
    pub size: usize,
    pub replicas: usize,
    pub centroid: Vec<f64>,
    pub behavior: BehaviorSummary,
}

/// The serialized output of a run. Nothing in it depends on wall-clock time,
/// so identical inputs produce byte-identical documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDocument {
    pub dimensions: Vec<Dimension>,
    pub clusters: Vec<ClusterSummary>,
    pub plans: Vec<ReplicaPlan>,
    pub unsatisfied: Vec<UnsatisfiedFile>,
    pub nodes: Vec<NodeProjection>,
    /// BLAKE3 digest of the serialized plans.
    pub fingerprint: String,
}

impl PlanDocument {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub async fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        tokio::fs::write(path.as_ref(), self.to_json()?).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Events referencing files absent from the manifest.
    pub dropped_events: u64,
    /// Access log rows that could not be parsed.
    pub malformed_events: u64,
    pub converged: bool,
    pub iterations: usize,
    pub refinement_moves: usize,
    pub unsatisfied: Vec<String>,
    /// Fraction of files whose declared category matches their cluster label.
    pub category_agreement: f64,
    pub imbalance_before: f64,
    pub imbalance_after: f64,
}

impl Diagnostics {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub async fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        tokio::fs::write(path.as_ref(), self.to_json()?).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub document: PlanDocument,
    pub diagnostics: Diagnostics,
}

/// Runs extraction, clustering and planning in order. Stages are built once
/// from the config and are stateless across runs.
pub struct Pipeline {
    config: Config,
    extractor: FeatureExtractor,
    kmeans: KMeans,
    planner: ReplicationPlanner,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let extractor = FeatureExtractor::new((&config).into())?;
        let kmeans = KMeans::new((&config).into())?;
        let planner = ReplicationPlanner::new((&config).into())?;
        Ok(Self {
            config,
            extractor,
            kmeans,
            planner,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run_feeds<S>(&self, source: &S) -> Result<PipelineOutput>
    where
        S: FeedSource + ?Sized,
    {
        let files = source.files().await?;
        let batch = source.events().await?;
        let nodes = source.nodes().await?;

        let mut output = self.run(&files, &batch.events, &nodes)?;
        output.diagnostics.malformed_events = batch.malformed;
        Ok(output)
    }

    pub fn run(&self, files: &[FileRecord], events: &[AccessEvent], nodes: &[NodeState]) -> Result<PipelineOutput> {
        if files.is_empty() {
            return Err(ReplicationError::EmptyStage("feature extraction".to_string()));
        }
        let report = self.extractor.extract(files, events)?;

        if report.features.is_empty() {
            return Err(ReplicationError::EmptyStage("clustering".to_string()));
        }
        let clustering = self.kmeans.fit(&report.features)?;

        if clustering.is_empty() {
            return Err(ReplicationError::EmptyStage("placement".to_string()));
        }
        let labels = classify_clusters(&clustering, &report.features);

        let outcome = self.planner.plan(&PlanningInput {
            clustering: &clustering,
            features: &report.features,
            files,
            profiles: &report.profiles,
            nodes,
        })?;

        let clusters: Vec<ClusterSummary> = clustering
            .clusters
            .iter()
            .map(|cluster| ClusterSummary {
                cluster_id: cluster.id,
                label: labels.get(&cluster.id).copied().unwrap_or(Category::Moderate),
                size: cluster.members.len(),
                replicas: outcome
                    .policies
                    .iter()
                    .find(|p| p.cluster_id == cluster.id)
                    .map(|p| p.replicas)
                    .unwrap_or(self.config.min_replicas),
                centroid: cluster.centroid.clone(),
                behavior: clustering.summary(cluster.id).unwrap_or(BehaviorSummary {
                    mean_access_frequency: 0.0,
                    mean_client_spread: 0.0,
                    mean_write_ratio: 0.0,
                }),
            })
            .collect();

        let agreeing = files
            .iter()
            .filter(|f| {
                clustering
                    .cluster_of(&f.file_id)
                    .and_then(|id| labels.get(&id))
                    .map_or(false, |label| *label == f.category)
            })
            .count();
        let category_agreement = agreeing as f64 / files.len() as f64;

        let fingerprint = blake3::hash(&serde_json::to_vec(&outcome.plans)?).to_hex().to_string();

        let diagnostics = Diagnostics {
            dropped_events: report.dropped_events,
            malformed_events: 0,
            converged: clustering.converged,
            iterations: clustering.iterations,
            refinement_moves: outcome.refinement_moves,
            unsatisfied: outcome.unsatisfied.iter().map(|u| u.file_id.clone()).collect(),
            category_agreement,
            imbalance_before: outcome.imbalance_before,
            imbalance_after: outcome.imbalance_after,
        };

        if !diagnostics.unsatisfied.is_empty() {
            warn!("{} files could not be placed within node capacity", diagnostics.unsatisfied.len());
        }
        info!(
            "Run complete: {} plans, {} unsatisfied, {} dropped events, converged={} after {} iterations, category agreement {:.3}",
            outcome.plans.len(),
            diagnostics.unsatisfied.len(),
            diagnostics.dropped_events,
            diagnostics.converged,
            diagnostics.iterations,
            diagnostics.category_agreement
        );

        Ok(PipelineOutput {
            document: PlanDocument {
                dimensions: report.features.dimensions.clone(),
                clusters,
                plans: outcome.plans,
                unsatisfied: outcome.unsatisfied,
                nodes: outcome.nodes,
                fingerprint,
            },
            diagnostics,
        })
    }
}
