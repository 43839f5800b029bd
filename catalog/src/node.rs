use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CatalogError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Capacity snapshot of a storage node, refreshed once per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeState {
    pub node_id: NodeId,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    /// Rack or failure-domain label, when the cluster reports one.
    pub rack: Option<String>,
}

impl NodeState {
    pub fn new(node_id: impl Into<NodeId>, capacity_bytes: u64, used_bytes: u64) -> Self {
        Self {
            node_id: node_id.into(),
            capacity_bytes,
            used_bytes,
            rack: None,
        }
    }

    pub fn with_rack(mut self, rack: impl Into<String>) -> Self {
        self.rack = Some(rack.into());
        self
    }

    pub fn free_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.used_bytes)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.as_str().trim().is_empty() {
            return Err(CatalogError::InvalidNode {
                node: "<unnamed>".to_string(),
                reason: "node id is empty".to_string(),
            });
        }
        if self.capacity_bytes == 0 {
            return Err(CatalogError::InvalidNode {
                node: self.node_id.to_string(),
                reason: "capacity must be positive".to_string(),
            });
        }
        Ok(())
    }
}
