use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::node::NodeId;
use crate::{CatalogError, Result};

pub type FileId = String;

/// Declared storage tier of a file. Only ever used as a prior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Hot,
    Shared,
    Moderate,
    Archival,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Hot,
        Category::Shared,
        Category::Moderate,
        Category::Archival,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Hot => "hot",
            Category::Shared => "shared",
            Category::Moderate => "moderate",
            Category::Archival => "archival",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(Category::Hot),
            "shared" => Ok(Category::Shared),
            "moderate" => Ok(Category::Moderate),
            "archival" => Ok(Category::Archival),
            other => Err(CatalogError::malformed(
                "category",
                format!("unknown category '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub file_id: FileId,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub primary_node: NodeId,
    pub category: Category,
}

impl FileRecord {
    pub fn new(
        file_id: impl Into<FileId>,
        size_bytes: u64,
        created_at: DateTime<Utc>,
        primary_node: impl Into<NodeId>,
        category: Category,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            size_bytes,
            created_at,
            primary_node: primary_node.into(),
            category,
        }
    }

    /// Rejects records whose required fields are blank or zero.
    pub fn validate(&self) -> Result<()> {
        if self.file_id.trim().is_empty() {
            return Err(CatalogError::malformed("<unnamed>", "file id is empty"));
        }
        if self.size_bytes == 0 {
            return Err(CatalogError::malformed(&self.file_id, "size must be positive"));
        }
        if self.primary_node.as_str().trim().is_empty() {
            return Err(CatalogError::malformed(&self.file_id, "primary node is empty"));
        }
        Ok(())
    }
}
