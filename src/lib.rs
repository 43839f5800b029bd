pub mod config;
pub mod error;
pub mod ingest;
pub mod pipeline;

pub use config::Config;
pub use error::{ReplicationError, Result};
pub use ingest::{CsvFeedSource, EventBatch, FeedSource};
pub use pipeline::{ClusterSummary, Diagnostics, Pipeline, PipelineOutput, PlanDocument};

// Re-export the stage crates
pub use catalog;
pub use clustering;
pub use features;
pub use placement;
