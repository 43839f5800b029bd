use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Catalog error: {0}")]
    Catalog(#[from] catalog::CatalogError),

    #[error("Feature extraction error: {0}")]
    Features(#[from] features::FeatureError),

    #[error("Clustering error: {0}")]
    Clustering(#[from] clustering::ClusteringError),

    #[error("Placement error: {0}")]
    Placement(#[from] placement::PlacementError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Empty input before the {0} stage")]
    EmptyStage(String),
}

pub type Result<T> = std::result::Result<T, ReplicationError>;
