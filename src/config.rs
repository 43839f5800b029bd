use clustering::KMeansConfig;
use features::ExtractorConfig;
use placement::PlannerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ReplicationError, Result};

/// Run configuration. Every key is required; a missing key fails loading
/// rather than falling back to a value that could change the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub k: usize,
    pub seed: u64,
    pub min_replicas: usize,
    pub max_replicas: usize,
    pub convergence_epsilon: f64,
    pub max_iterations: usize,
    pub recency_half_life_secs: f64,
    pub boundary_epsilon: f64,
    pub refinement_passes: usize,
    pub aggregation_workers: usize,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        let config = Self::from_json(&text)?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(ReplicationError::InvalidConfig("k must be at least 1".to_string()));
        }
        if self.max_iterations == 0 {
            return Err(ReplicationError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        ExtractorConfig::from(self).validate()?;
        KMeansConfig::from(self).validate()?;
        PlannerConfig::from(self).validate()?;
        Ok(())
    }
}

impl From<&Config> for ExtractorConfig {
    fn from(config: &Config) -> Self {
        ExtractorConfig {
            recency_half_life_secs: config.recency_half_life_secs,
            aggregation_workers: config.aggregation_workers,
        }
    }
}

impl From<&Config> for KMeansConfig {
    fn from(config: &Config) -> Self {
        KMeansConfig {
            k: config.k,
            seed: config.seed,
            max_iterations: config.max_iterations,
            convergence_epsilon: config.convergence_epsilon,
        }
    }
}

impl From<&Config> for PlannerConfig {
    fn from(config: &Config) -> Self {
        PlannerConfig {
            min_replicas: config.min_replicas,
            max_replicas: config.max_replicas,
            boundary_epsilon: config.boundary_epsilon,
            refinement_passes: config.refinement_passes,
        }
    }
}
