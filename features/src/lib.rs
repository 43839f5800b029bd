mod aggregate;
mod extractor;
mod normalize;

pub use aggregate::{aggregate_partitioned, AggregationResult, FileAggregate};
pub use extractor::{AccessProfile, Dimension, FeatureExtractor, FeatureReport, FeatureSet, FeatureVector};
pub use normalize::NormalizationStats;

use catalog::CatalogError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Half-life, in seconds, of the exponential decay applied to event age.
    pub recency_half_life_secs: f64,
    /// Number of worker units the event stream is split across.
    pub aggregation_workers: usize,
}

impl ExtractorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.recency_half_life_secs.is_finite() && self.recency_half_life_secs > 0.0) {
            return Err(FeatureError::InvalidConfig(format!(
                "recency half-life must be positive, got {}",
                self.recency_half_life_secs
            )));
        }
        if self.aggregation_workers == 0 {
            return Err(FeatureError::InvalidConfig(
                "at least one aggregation worker is required".to_string(),
            ));
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, FeatureError>;

#[derive(Debug, thiserror::Error)]
pub enum FeatureError {
    #[error("Malformed record {record}: {reason}")]
    MalformedRecord { record: String, reason: String },

    #[error("No file records supplied")]
    EmptyFileSet,

    #[error("Invalid extractor configuration: {0}")]
    InvalidConfig(String),

    #[error("Aggregation worker panicked")]
    WorkerPanicked,
}

impl From<CatalogError> for FeatureError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::MalformedRecord { record, reason } => {
                FeatureError::MalformedRecord { record, reason }
            }
            CatalogError::InvalidNode { node, reason } => FeatureError::MalformedRecord {
                record: node,
                reason,
            },
        }
    }
}
