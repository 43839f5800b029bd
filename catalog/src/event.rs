use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::file::FileId;
use crate::node::NodeId;
use crate::{CatalogError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
}

impl FromStr for Operation {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "READ" => Ok(Operation::Read),
            "WRITE" => Ok(Operation::Write),
            other => Err(CatalogError::malformed(
                "operation",
                format!("unknown operation '{}'", other),
            )),
        }
    }
}

/// One entry of the append-only access log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessEvent {
    pub file_id: FileId,
    pub client_node: NodeId,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
}

impl AccessEvent {
    pub fn new(
        file_id: impl Into<FileId>,
        client_node: impl Into<NodeId>,
        timestamp: DateTime<Utc>,
        operation: Operation,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            client_node: client_node.into(),
            timestamp,
            operation,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self.operation, Operation::Write)
    }
}
