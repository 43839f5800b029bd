use async_trait::async_trait;
use catalog::{AccessEvent, CatalogError, Category, FileRecord, NodeState, Operation};
use chrono::{DateTime, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Access events as read from the log, plus the rows that could not be parsed.
#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    pub events: Vec<AccessEvent>,
    pub malformed: u64,
}

/// The three input feeds a run consumes. Each is read once per run.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn files(&self) -> Result<Vec<FileRecord>>;
    async fn events(&self) -> Result<EventBatch>;
    async fn nodes(&self) -> Result<Vec<NodeState>>;
}

/// Feeds backed by CSV files on local disk.
#[derive(Debug, Clone)]
pub struct CsvFeedSource {
    manifest: PathBuf,
    access_log: PathBuf,
    nodes: PathBuf,
}

impl CsvFeedSource {
    pub fn new(manifest: impl Into<PathBuf>, access_log: impl Into<PathBuf>, nodes: impl Into<PathBuf>) -> Self {
        Self {
            manifest: manifest.into(),
            access_log: access_log.into(),
            nodes: nodes.into(),
        }
    }
}

#[async_trait]
impl FeedSource for CsvFeedSource {
    async fn files(&self) -> Result<Vec<FileRecord>> {
        let text = tokio::fs::read_to_string(&self.manifest).await?;
        let files = parse_manifest(&text)?;
        info!("Loaded {} file records from {}", files.len(), self.manifest.display());
        Ok(files)
    }

    async fn events(&self) -> Result<EventBatch> {
        let bytes = tokio::fs::read(&self.access_log).await?;
        let batch = parse_access_log(&bytes);
        info!(
            "Loaded {} access events from {} ({} malformed rows skipped)",
            batch.events.len(),
            self.access_log.display(),
            batch.malformed
        );
        Ok(batch)
    }

    async fn nodes(&self) -> Result<Vec<NodeState>> {
        let text = tokio::fs::read_to_string(&self.nodes).await?;
        let nodes = parse_nodes(&text)?;
        info!("Loaded {} storage nodes from {}", nodes.len(), self.nodes.display());
        Ok(nodes)
    }
}

/// Accepts RFC 3339, or a zone-less ISO timestamp taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|ts| ts.and_utc())
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

struct Columns {
    headers: StringRecord,
    feed: &'static str,
}

impl Columns {
    fn index(&self, name: &str) -> std::result::Result<usize, CatalogError> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or_else(|| CatalogError::malformed(format!("{} header", self.feed), format!("missing column '{}'", name)))
    }

    fn optional(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name))
    }
}

fn required<'r>(record: &'r StringRecord, index: usize, feed: &str, name: &str) -> std::result::Result<&'r str, CatalogError> {
    match record.get(index).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(CatalogError::malformed(
            format!("{} line {}", feed, line_of(record)),
            format!("missing {}", name),
        )),
    }
}

/// Manifest rows: `path,creation_ts,primary_node,size_bytes,category`.
/// Any malformed row fails the whole feed.
pub fn parse_manifest(text: &str) -> Result<Vec<FileRecord>> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(text.as_bytes());
    let columns = Columns {
        headers: reader.headers()?.clone(),
        feed: "manifest",
    };
    let path = columns.index("path")?;
    let created = columns.index("creation_ts")?;
    let primary = columns.index("primary_node")?;
    let size = columns.index("size_bytes")?;
    let category_col = columns.index("category")?;

    let mut files = Vec::new();
    for record in reader.records() {
        let record = record?;
        let at = || format!("manifest line {}", line_of(&record));

        let file_id = required(&record, path, "manifest", "path")?;
        let created_at = parse_timestamp(required(&record, created, "manifest", "creation_ts")?)
            .ok_or_else(|| CatalogError::malformed(at(), "unparsable creation_ts"))?;
        let primary_node = required(&record, primary, "manifest", "primary_node")?;
        let size_bytes: u64 = required(&record, size, "manifest", "size_bytes")?
            .parse()
            .map_err(|_| CatalogError::malformed(at(), "size_bytes is not a non-negative integer"))?;
        let category: Category = required(&record, category_col, "manifest", "category")?
            .parse()
            .map_err(|err: CatalogError| CatalogError::malformed(at(), err.to_string()))?;

        let file = FileRecord::new(file_id, size_bytes, created_at, primary_node, category);
        file.validate()
            .map_err(|err| CatalogError::malformed(at(), err.to_string()))?;
        files.push(file);
    }
    Ok(files)
}

/// Access log rows, no header: `ts_iso,path,op,client_node,pid`. Rows that
/// cannot be parsed are skipped and counted; the log is an external
/// append-only stream.
pub fn parse_access_log(bytes: &[u8]) -> EventBatch {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut batch = EventBatch::default();
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                debug!("Skipping unreadable access log row: {}", err);
                batch.malformed += 1;
                continue;
            }
        };
        match parse_event(&record) {
            Some(event) => batch.events.push(event),
            None => {
                debug!("Skipping malformed access log line {}", line_of(&record));
                batch.malformed += 1;
            }
        }
    }

    if batch.malformed > 0 {
        warn!("Skipped {} malformed access log rows", batch.malformed);
    }
    batch
}

fn parse_event(record: &StringRecord) -> Option<AccessEvent> {
    let field = |i: usize| record.get(i).map(str::trim).filter(|v| !v.is_empty());
    let timestamp = parse_timestamp(field(0)?)?;
    let file_id = field(1)?;
    let operation: Operation = field(2)?.parse().ok()?;
    let client = field(3)?;
    Some(AccessEvent::new(file_id, client, timestamp, operation))
}

/// Node rows: `node_id,capacity_bytes,used_bytes,rack`; the rack column and
/// its values are optional.
pub fn parse_nodes(text: &str) -> Result<Vec<NodeState>> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(text.as_bytes());
    let columns = Columns {
        headers: reader.headers()?.clone(),
        feed: "nodes",
    };
    let id = columns.index("node_id")?;
    let capacity = columns.index("capacity_bytes")?;
    let used = columns.index("used_bytes")?;
    let rack_col = columns.optional("rack");

    let mut nodes = Vec::new();
    for record in reader.records() {
        let record = record?;
        let at = || format!("nodes line {}", line_of(&record));

        let node_id = required(&record, id, "nodes", "node_id")?;
        let capacity_bytes: u64 = required(&record, capacity, "nodes", "capacity_bytes")?
            .parse()
            .map_err(|_| CatalogError::malformed(at(), "capacity_bytes is not a non-negative integer"))?;
        let used_bytes: u64 = required(&record, used, "nodes", "used_bytes")?
            .parse()
            .map_err(|_| CatalogError::malformed(at(), "used_bytes is not a non-negative integer"))?;

        let mut node = NodeState::new(node_id, capacity_bytes, used_bytes);
        if let Some(rack) = rack_col.and_then(|i| record.get(i)).map(str::trim).filter(|r| !r.is_empty()) {
            node = node.with_rack(rack);
        }
        node.validate()?;
        nodes.push(node);
    }
    Ok(nodes)
}
