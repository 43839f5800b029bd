//! Shared fixtures for the integration and property suites.

use adaptive_replication::catalog::{AccessEvent, Category, FileRecord, NodeState, Operation};
use adaptive_replication::{Config, EventBatch, FeedSource, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config(k: usize, min_replicas: usize, max_replicas: usize) -> Config {
    Config {
        k,
        seed: 42,
        min_replicas,
        max_replicas,
        convergence_epsilon: 1e-9,
        max_iterations: 100,
        recency_half_life_secs: 3600.0,
        boundary_epsilon: 0.05,
        refinement_passes: 3,
        aggregation_workers: 4,
    }
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    epoch() + Duration::seconds(secs)
}

pub fn file(id: &str, size: u64, primary: &str, category: Category) -> FileRecord {
    FileRecord::new(id, size, epoch(), primary, category)
}

/// `count` reads of `file_id`, `per_second` per second, cycling through `clients`.
pub fn reads(file_id: &str, clients: &[&str], count: usize, per_second: usize) -> Vec<AccessEvent> {
    (0..count)
        .map(|i| {
            AccessEvent::new(
                file_id,
                clients[i % clients.len()],
                at((i / per_second.max(1)) as i64),
                Operation::Read,
            )
        })
        .collect()
}

pub fn nodes(count: usize, capacity: u64) -> Vec<NodeState> {
    (1..=count)
        .map(|i| NodeState::new(format!("dn{}", i), capacity, 0))
        .collect()
}

pub fn manifest_csv(files: &[FileRecord]) -> String {
    let mut out = String::from("path,creation_ts,primary_node,size_bytes,category\n");
    for f in files {
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            f.file_id,
            f.created_at.to_rfc3339(),
            f.primary_node,
            f.size_bytes,
            f.category
        ));
    }
    out
}

pub fn access_log_csv(events: &[AccessEvent]) -> String {
    events
        .iter()
        .enumerate()
        .map(|(pid, e)| {
            let op = if e.is_write() { "WRITE" } else { "READ" };
            format!(
                "{},{},{},{},{}\n",
                e.timestamp.format("%Y-%m-%dT%H:%M:%S%.f"),
                e.file_id,
                op,
                e.client_node,
                1000 + pid
            )
        })
        .collect()
}

pub fn nodes_csv(nodes: &[NodeState]) -> String {
    let mut out = String::from("node_id,capacity_bytes,used_bytes,rack\n");
    for n in nodes {
        out.push_str(&format!(
            "{},{},{},{}\n",
            n.node_id,
            n.capacity_bytes,
            n.used_bytes,
            n.rack.as_deref().unwrap_or("")
        ));
    }
    out
}

/// In-memory feeds for driving the pipeline without touching disk.
#[derive(Debug, Clone, Default)]
pub struct StaticFeed {
    pub files: Vec<FileRecord>,
    pub events: Vec<AccessEvent>,
    pub malformed: u64,
    pub nodes: Vec<NodeState>,
}

#[async_trait]
impl FeedSource for StaticFeed {
    async fn files(&self) -> Result<Vec<FileRecord>> {
        Ok(self.files.clone())
    }

    async fn events(&self) -> Result<EventBatch> {
        Ok(EventBatch {
            events: self.events.clone(),
            malformed: self.malformed,
        })
    }

    async fn nodes(&self) -> Result<Vec<NodeState>> {
        Ok(self.nodes.clone())
    }
}
