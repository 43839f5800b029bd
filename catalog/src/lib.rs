mod event;
mod file;
mod node;

pub use event::{AccessEvent, Operation};
pub use file::{Category, FileId, FileRecord};
pub use node::{NodeId, NodeState};

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Malformed record {record}: {reason}")]
    MalformedRecord { record: String, reason: String },

    #[error("Invalid node {node}: {reason}")]
    InvalidNode { node: String, reason: String },
}

impl CatalogError {
    pub fn malformed(record: impl Into<String>, reason: impl Into<String>) -> Self {
        CatalogError::MalformedRecord {
            record: record.into(),
            reason: reason.into(),
        }
    }
}
