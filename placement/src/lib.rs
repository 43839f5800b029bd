mod ledger;
mod planner;
mod policy;

pub use ledger::UsageLedger;
pub use planner::{PlanningInput, ReplicationPlanner};
pub use policy::{tier_policies, TierPolicy};

use catalog::{CatalogError, FileId, NodeId};
use clustering::ClusterId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub min_replicas: usize,
    pub max_replicas: usize,
    /// Distance gap under which a file counts as sitting on a cluster boundary.
    pub boundary_epsilon: f64,
    /// Upper bound on refinement passes over the boundary candidates.
    pub refinement_passes: usize,
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_replicas == 0 {
            return Err(PlacementError::InvalidConfig(
                "min_replicas must be at least 1".to_string(),
            ));
        }
        if self.min_replicas > self.max_replicas {
            return Err(PlacementError::InvalidConfig(format!(
                "min_replicas ({}) exceeds max_replicas ({})",
                self.min_replicas, self.max_replicas
            )));
        }
        if !(self.boundary_epsilon.is_finite() && self.boundary_epsilon >= 0.0) {
            return Err(PlacementError::InvalidConfig(format!(
                "boundary_epsilon must be finite and non-negative, got {}",
                self.boundary_epsilon
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaPlan {
    pub file_id: FileId,
    pub replica_count: usize,
    /// Distinct target nodes, best-ranked first.
    pub target_nodes: Vec<NodeId>,
    /// Behavioural cluster the file was clustered into.
    pub cluster_id: ClusterId,
    /// Cluster whose replica policy was applied; differs from `cluster_id`
    /// when refinement moved the file across a boundary.
    pub policy_cluster: ClusterId,
    pub size_bytes: u64,
}

/// A file no feasible node set could hold (CapacityExceeded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsatisfiedFile {
    pub file_id: FileId,
    pub required_replicas: usize,
    pub feasible_nodes: usize,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeProjection {
    pub node_id: NodeId,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub projected_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementOutcome {
    /// Sorted by file id.
    pub plans: Vec<ReplicaPlan>,
    /// Sorted by file id.
    pub unsatisfied: Vec<UnsatisfiedFile>,
    pub policies: Vec<TierPolicy>,
    /// Sorted by node id.
    pub nodes: Vec<NodeProjection>,
    pub refinement_moves: usize,
    pub imbalance_before: f64,
    pub imbalance_after: f64,
}

pub type Result<T> = std::result::Result<T, PlacementError>;

#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    #[error("Cluster partition is empty")]
    EmptyPartition,

    #[error("No storage nodes supplied")]
    NoNodes,

    #[error("Invalid node {node}: {reason}")]
    InvalidNode { node: String, reason: String },

    #[error("File {0} has no cluster assignment")]
    UnassignedFile(FileId),

    #[error("Invalid planner configuration: {0}")]
    InvalidConfig(String),
}

impl From<CatalogError> for PlacementError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::InvalidNode { node, reason } => PlacementError::InvalidNode { node, reason },
            CatalogError::MalformedRecord { record, reason } => PlacementError::InvalidNode {
                node: record,
                reason,
            },
        }
    }
}
