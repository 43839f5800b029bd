use catalog::{AccessEvent, FileId, NodeId};
use chrono::{DateTime, Utc};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use crate::{FeatureError, Result};

/// Per-file partial sums. Every field combines losslessly, so partials built
/// from disjoint slices of the event stream can be merged in any order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileAggregate {
    pub accesses: u64,
    pub writes: u64,
    pub local_accesses: u64,
    pub by_client: BTreeMap<NodeId, u64>,
    /// Access counts keyed by whole epoch second.
    pub per_second: BTreeMap<i64, u64>,
    pub recency: f64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl FileAggregate {
    fn observe(
        &mut self,
        event: &AccessEvent,
        primary: &NodeId,
        observation_end: DateTime<Utc>,
        half_life_secs: f64,
    ) {
        self.accesses += 1;
        if event.is_write() {
            self.writes += 1;
        }
        if &event.client_node == primary {
            self.local_accesses += 1;
        }
        *self.by_client.entry(event.client_node.clone()).or_insert(0) += 1;
        *self.per_second.entry(event.timestamp.timestamp()).or_insert(0) += 1;

        let age_secs = (observation_end - event.timestamp).num_milliseconds().max(0) as f64 / 1000.0;
        self.recency += (-age_secs / half_life_secs).exp2();

        self.first_seen = Some(match self.first_seen {
            Some(seen) => seen.min(event.timestamp),
            None => event.timestamp,
        });
        self.last_seen = Some(match self.last_seen {
            Some(seen) => seen.max(event.timestamp),
            None => event.timestamp,
        });
    }

    pub fn merge(&mut self, other: FileAggregate) {
        self.accesses += other.accesses;
        self.writes += other.writes;
        self.local_accesses += other.local_accesses;
        for (client, count) in other.by_client {
            *self.by_client.entry(client).or_insert(0) += count;
        }
        for (second, count) in other.per_second {
            *self.per_second.entry(second).or_insert(0) += count;
        }
        self.recency += other.recency;
        self.first_seen = match (self.first_seen, other.first_seen) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.last_seen = match (self.last_seen, other.last_seen) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn peak_concurrency(&self) -> u64 {
        self.per_second.values().copied().max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationResult {
    pub files: BTreeMap<FileId, FileAggregate>,
    /// Events naming a file outside the record set; dropped, never fatal.
    pub unknown_references: u64,
    /// Every client observed system-wide.
    pub clients: BTreeSet<NodeId>,
}

impl AggregationResult {
    pub fn merge(&mut self, other: AggregationResult) {
        for (file_id, aggregate) in other.files {
            match self.files.entry(file_id) {
                Entry::Vacant(slot) => {
                    slot.insert(aggregate);
                }
                Entry::Occupied(mut slot) => slot.get_mut().merge(aggregate),
            }
        }
        self.unknown_references += other.unknown_references;
        self.clients.extend(other.clients);
    }
}

fn aggregate_chunk(
    events: &[AccessEvent],
    primaries: &BTreeMap<FileId, NodeId>,
    observation_end: DateTime<Utc>,
    half_life_secs: f64,
) -> AggregationResult {
    let mut result = AggregationResult::default();
    for event in events {
        let Some(primary) = primaries.get(&event.file_id) else {
            result.unknown_references += 1;
            continue;
        };
        result.clients.insert(event.client_node.clone());
        result
            .files
            .entry(event.file_id.clone())
            .or_default()
            .observe(event, primary, observation_end, half_life_secs);
    }
    result
}

/// Splits the event stream into `workers` contiguous partitions, aggregates
/// each on its own scoped thread and folds the partials in partition order.
pub fn aggregate_partitioned(
    events: &[AccessEvent],
    primaries: &BTreeMap<FileId, NodeId>,
    observation_end: DateTime<Utc>,
    half_life_secs: f64,
    workers: usize,
) -> Result<AggregationResult> {
    if events.is_empty() {
        return Ok(AggregationResult::default());
    }

    let workers = workers.max(1);
    let chunk_size = (events.len() + workers - 1) / workers;

    let partials = crossbeam::scope(|scope| {
        let handles: Vec<_> = events
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move |_| aggregate_chunk(chunk, primaries, observation_end, half_life_secs))
            })
            .collect();
        handles.into_iter().map(|handle| handle.join()).collect::<Vec<_>>()
    })
    .map_err(|_| FeatureError::WorkerPanicked)?;

    let mut result = AggregationResult::default();
    for partial in partials {
        result.merge(partial.map_err(|_| FeatureError::WorkerPanicked)?);
    }

    tracing::debug!(
        "Aggregated {} events across {} partitions ({} files touched, {} unknown references)",
        events.len(),
        (events.len() + chunk_size - 1) / chunk_size,
        result.files.len(),
        result.unknown_references
    );

    Ok(result)
}
