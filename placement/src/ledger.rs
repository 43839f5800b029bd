use catalog::{NodeId, NodeState};

use crate::{NodeProjection, PlacementError, Result};

/// Run-scoped projected usage per node. The planner reserves and releases
/// bytes here; the node snapshot it was built from is never touched.
#[derive(Debug, Clone)]
pub struct UsageLedger {
    nodes: Vec<NodeState>,
    projected: Vec<u64>,
}

impl UsageLedger {
    /// Nodes are kept sorted by id so that every scan is deterministic.
    pub fn new(nodes: &[NodeState]) -> Result<Self> {
        if nodes.is_empty() {
            return Err(PlacementError::NoNodes);
        }
        let mut nodes = nodes.to_vec();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        for node in &nodes {
            node.validate()?;
        }
        if let Some(pair) = nodes.windows(2).find(|pair| pair[0].node_id == pair[1].node_id) {
            return Err(PlacementError::InvalidNode {
                node: pair[0].node_id.to_string(),
                reason: "duplicate node id".to_string(),
            });
        }

        let projected = nodes.iter().map(|n| n.used_bytes).collect();
        Ok(Self { nodes, projected })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &NodeState {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[NodeState] {
        &self.nodes
    }

    pub fn index_of(&self, node_id: &NodeId) -> Option<usize> {
        self.nodes.binary_search_by(|n| n.node_id.cmp(node_id)).ok()
    }

    pub fn projected(&self, index: usize) -> u64 {
        self.projected[index]
    }

    pub fn fits(&self, index: usize, bytes: u64) -> bool {
        self.projected[index]
            .checked_add(bytes)
            .map_or(false, |total| total <= self.nodes[index].capacity_bytes)
    }

    /// Free fraction of the node's capacity left after adding `bytes`.
    pub fn free_fraction_after(&self, index: usize, bytes: u64) -> f64 {
        let capacity = self.nodes[index].capacity_bytes;
        let remaining = capacity.saturating_sub(self.projected[index].saturating_add(bytes));
        remaining as f64 / capacity as f64
    }

    pub fn reserve(&mut self, targets: &[usize], bytes: u64) {
        for &index in targets {
            self.projected[index] = self.projected[index].saturating_add(bytes);
        }
    }

    pub fn release(&mut self, targets: &[usize], bytes: u64) {
        for &index in targets {
            self.projected[index] = self.projected[index].saturating_sub(bytes);
        }
    }

    /// Population variance of projected utilization across nodes.
    pub fn imbalance(&self) -> f64 {
        let utilization: Vec<f64> = self
            .nodes
            .iter()
            .zip(&self.projected)
            .map(|(node, projected)| *projected as f64 / node.capacity_bytes as f64)
            .collect();
        let n = utilization.len() as f64;
        let mean = utilization.iter().sum::<f64>() / n;
        utilization.iter().map(|u| (u - mean) * (u - mean)).sum::<f64>() / n
    }

    pub fn projections(&self) -> Vec<NodeProjection> {
        self.nodes
            .iter()
            .zip(&self.projected)
            .map(|(node, projected)| NodeProjection {
                node_id: node.node_id.clone(),
                capacity_bytes: node.capacity_bytes,
                used_bytes: node.used_bytes,
                projected_bytes: *projected,
            })
            .collect()
    }
}
