use catalog::{AccessEvent, FileId, FileRecord, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::aggregate::{aggregate_partitioned, FileAggregate};
use crate::normalize::NormalizationStats;
use crate::{ExtractorConfig, FeatureError, Result};

/// Named feature dimensions, in the fixed order every vector uses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    AccessFrequency,
    ClientSpread,
    Recency,
    WriteRatio,
    Locality,
    Concurrency,
    Age,
    Size,
}

impl Dimension {
    pub const ALL: [Dimension; 8] = [
        Dimension::AccessFrequency,
        Dimension::ClientSpread,
        Dimension::Recency,
        Dimension::WriteRatio,
        Dimension::Locality,
        Dimension::Concurrency,
        Dimension::Age,
        Dimension::Size,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Dimension::AccessFrequency => "access_frequency",
            Dimension::ClientSpread => "client_spread",
            Dimension::Recency => "recency",
            Dimension::WriteRatio => "write_ratio",
            Dimension::Locality => "locality",
            Dimension::Concurrency => "concurrency",
            Dimension::Age => "age",
            Dimension::Size => "size",
        }
    }

    /// Dimensions that take the floor value for files nobody touched.
    pub fn is_frequency_derived(&self) -> bool {
        !matches!(self, Dimension::Age | Dimension::Size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub file_id: FileId,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub dimensions: Vec<Dimension>,
    /// Sorted by file id.
    pub vectors: Vec<FeatureVector>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension_index(&self, dimension: Dimension) -> Option<usize> {
        self.dimensions.iter().position(|d| *d == dimension)
    }

    /// Binary search on the file id order, with a linear scan for sets
    /// built out of order by hand.
    pub fn get(&self, file_id: &str) -> Option<&FeatureVector> {
        match self.vectors.binary_search_by(|v| v.file_id.as_str().cmp(file_id)) {
            Ok(i) => Some(&self.vectors[i]),
            Err(_) => self.vectors.iter().find(|v| v.file_id == file_id),
        }
    }

    pub fn value(&self, file_id: &str, dimension: Dimension) -> Option<f64> {
        let d = self.dimension_index(dimension)?;
        self.get(file_id).map(|v| v.values[d])
    }
}

/// Who accessed a file during the window, used by placement to favour
/// frequent accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessProfile {
    pub accesses: u64,
    pub by_client: BTreeMap<NodeId, u64>,
}

impl AccessProfile {
    pub fn share(&self, node: &NodeId) -> f64 {
        if self.accesses == 0 {
            return 0.0;
        }
        self.by_client.get(node).copied().unwrap_or(0) as f64 / self.accesses as f64
    }
}

#[derive(Debug, Clone)]
pub struct FeatureReport {
    pub features: FeatureSet,
    /// Same layout as `features`, before normalization.
    pub raw: FeatureSet,
    pub profiles: BTreeMap<FileId, AccessProfile>,
    pub stats: NormalizationStats,
    pub observation_end: DateTime<Utc>,
    pub dropped_events: u64,
}

pub struct FeatureExtractor {
    config: ExtractorConfig,
}

impl FeatureExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Produces exactly one vector per file record, zero-access files included.
    pub fn extract(&self, files: &[FileRecord], events: &[AccessEvent]) -> Result<FeatureReport> {
        if files.is_empty() {
            return Err(FeatureError::EmptyFileSet);
        }

        let mut records: BTreeMap<FileId, &FileRecord> = BTreeMap::new();
        for record in files {
            record.validate()?;
            if records.insert(record.file_id.clone(), record).is_some() {
                return Err(FeatureError::MalformedRecord {
                    record: record.file_id.clone(),
                    reason: "duplicate file id".to_string(),
                });
            }
        }
        let primaries: BTreeMap<FileId, NodeId> = records
            .iter()
            .map(|(id, record)| (id.clone(), record.primary_node.clone()))
            .collect();

        let observation_end = observation_end(&records, events);
        info!(
            "Extracting features for {} files from {} events (window ends {})",
            records.len(),
            events.len(),
            observation_end
        );

        let aggregation = aggregate_partitioned(
            events,
            &primaries,
            observation_end,
            self.config.recency_half_life_secs,
            self.config.aggregation_workers,
        )?;

        if aggregation.unknown_references > 0 {
            warn!(
                "Dropped {} access events referencing unknown files",
                aggregation.unknown_references
            );
        }

        let total_clients = aggregation.clients.len();
        let raw_vectors: Vec<FeatureVector> = records
            .iter()
            .map(|(file_id, record)| FeatureVector {
                file_id: file_id.clone(),
                values: raw_row(
                    record,
                    aggregation.files.get(file_id),
                    total_clients,
                    observation_end,
                ),
            })
            .collect();

        let dimensions = Dimension::ALL.to_vec();
        let stats = NormalizationStats::from_rows(
            dimensions.len(),
            raw_vectors.iter().map(|v| v.values.as_slice()),
        );

        let vectors: Vec<FeatureVector> = raw_vectors
            .iter()
            .map(|raw| FeatureVector {
                file_id: raw.file_id.clone(),
                values: stats.normalize(&raw.values),
            })
            .collect();
        debug_assert!(vectors.iter().all(|v| v.values.iter().all(|x| x.is_finite())));

        let profiles = records
            .keys()
            .map(|file_id| {
                let profile = aggregation
                    .files
                    .get(file_id)
                    .map(|agg| AccessProfile {
                        accesses: agg.accesses,
                        by_client: agg.by_client.clone(),
                    })
                    .unwrap_or_default();
                (file_id.clone(), profile)
            })
            .collect();

        info!(
            "Feature extraction complete: {} vectors, {} distinct clients",
            vectors.len(),
            total_clients
        );

        Ok(FeatureReport {
            features: FeatureSet {
                dimensions: dimensions.clone(),
                vectors,
            },
            raw: FeatureSet {
                dimensions,
                vectors: raw_vectors,
            },
            profiles,
            stats,
            observation_end,
            dropped_events: aggregation.unknown_references,
        })
    }
}

/// Latest event touching a known file, or the newest creation time when the
/// window is empty.
fn observation_end(records: &BTreeMap<FileId, &FileRecord>, events: &[AccessEvent]) -> DateTime<Utc> {
    events
        .iter()
        .filter(|event| records.contains_key(&event.file_id))
        .map(|event| event.timestamp)
        .max()
        .or_else(|| records.values().map(|record| record.created_at).max())
        .unwrap_or_default()
}

fn raw_row(
    record: &FileRecord,
    aggregate: Option<&FileAggregate>,
    total_clients: usize,
    observation_end: DateTime<Utc>,
) -> Vec<f64> {
    let age_secs = (observation_end - record.created_at).num_milliseconds().max(0) as f64 / 1000.0;
    let size = (record.size_bytes as f64).ln_1p();

    let Some(agg) = aggregate.filter(|agg| agg.accesses > 0) else {
        return vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, age_secs, size];
    };

    let accesses = agg.accesses as f64;
    let client_spread = if total_clients > 0 {
        agg.by_client.len() as f64 / total_clients as f64
    } else {
        0.0
    };

    vec![
        accesses,
        client_spread,
        agg.recency,
        agg.writes as f64 / accesses,
        agg.local_accesses as f64 / accesses,
        agg.peak_concurrency() as f64,
        age_secs,
        size,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::{Category, Operation};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(ExtractorConfig {
            recency_half_life_secs: 60.0,
            aggregation_workers: 3,
        })
        .unwrap()
    }

    fn file(id: &str) -> FileRecord {
        FileRecord::new(id, 4096, t0() - Duration::days(2), "dn1", Category::Moderate)
    }

    #[test]
    fn test_zero_access_file_gets_floor_features() {
        let files = vec![file("/a"), file("/b")];
        let events: Vec<_> = (0..10)
            .map(|i| AccessEvent::new("/a", "dn2", t0() + Duration::seconds(i), Operation::Write))
            .collect();

        let report = extractor().extract(&files, &events).unwrap();
        assert_eq!(report.features.len(), 2);

        let quiet = report.features.get("/b").unwrap();
        for (d, dimension) in report.features.dimensions.iter().enumerate() {
            if dimension.is_frequency_derived() {
                assert_eq!(quiet.values[d], 0.0, "{} should be floored", dimension.name());
            }
        }
        assert_eq!(report.profiles["/b"].accesses, 0);
        assert_eq!(report.dropped_events, 0);
    }

    #[test]
    fn test_unknown_references_are_dropped_and_counted() {
        let files = vec![file("/a")];
        let events = vec![
            AccessEvent::new("/a", "dn1", t0(), Operation::Read),
            AccessEvent::new("/ghost", "dn1", t0(), Operation::Read),
            AccessEvent::new("/ghost", "dn3", t0(), Operation::Write),
        ];
        let report = extractor().extract(&files, &events).unwrap();
        assert_eq!(report.dropped_events, 2);
        assert_eq!(report.raw.value("/a", Dimension::AccessFrequency), Some(1.0));
        // Ghost clients do not count towards the system-wide client set.
        assert_eq!(report.raw.value("/a", Dimension::ClientSpread), Some(1.0));
    }

    #[test]
    fn test_malformed_and_duplicate_records_fail() {
        let mut broken = file("/a");
        broken.size_bytes = 0;
        assert!(matches!(
            extractor().extract(&[broken], &[]),
            Err(FeatureError::MalformedRecord { .. })
        ));
        assert!(matches!(
            extractor().extract(&[file("/a"), file("/a")], &[]),
            Err(FeatureError::MalformedRecord { .. })
        ));
        assert!(matches!(extractor().extract(&[], &[]), Err(FeatureError::EmptyFileSet)));
    }

    #[test]
    fn test_raw_dimensions() {
        let files = vec![file("/a"), file("/b")];
        let events = vec![
            AccessEvent::new("/a", "dn1", t0(), Operation::Read),
            AccessEvent::new("/a", "dn2", t0(), Operation::Write),
            AccessEvent::new("/a", "dn2", t0() + Duration::seconds(5), Operation::Read),
            AccessEvent::new("/a", "dn3", t0() + Duration::seconds(60), Operation::Read),
            AccessEvent::new("/b", "dn4", t0() + Duration::seconds(60), Operation::Read),
        ];
        let report = extractor().extract(&files, &events).unwrap();
        let raw = &report.raw;

        assert_eq!(raw.value("/a", Dimension::AccessFrequency), Some(4.0));
        assert_eq!(raw.value("/a", Dimension::ClientSpread), Some(0.75));
        assert_eq!(raw.value("/a", Dimension::WriteRatio), Some(0.25));
        assert_eq!(raw.value("/a", Dimension::Locality), Some(0.25));
        assert_eq!(raw.value("/a", Dimension::Concurrency), Some(2.0));
        assert_eq!(report.observation_end, t0() + Duration::seconds(60));

        let recency = raw.value("/a", Dimension::Recency).unwrap();
        let expected = 0.5 + 0.5 + 2f64.powf(-55.0 / 60.0) + 1.0;
        assert!((recency - expected).abs() < 1e-9);

        assert_eq!(report.profiles["/a"].share(&NodeId::new("dn2")), 0.5);
        assert_eq!(report.features.value("/a", Dimension::AccessFrequency), Some(1.0));
        assert_eq!(report.features.value("/b", Dimension::AccessFrequency), Some(0.0));
    }

    #[test]
    fn test_worker_count_only_affects_rounding() {
        let files: Vec<_> = (0..6).map(|i| file(&format!("/f{}", i))).collect();
        let events: Vec<_> = (0..300)
            .map(|i| {
                AccessEvent::new(
                    format!("/f{}", (i * 7) % 5),
                    format!("dn{}", i % 4),
                    t0() + Duration::milliseconds(i as i64 * 733),
                    if i % 3 == 0 { Operation::Write } else { Operation::Read },
                )
            })
            .collect();

        let single = FeatureExtractor::new(ExtractorConfig {
            recency_half_life_secs: 60.0,
            aggregation_workers: 1,
        })
        .unwrap()
        .extract(&files, &events)
        .unwrap();
        let many = FeatureExtractor::new(ExtractorConfig {
            recency_half_life_secs: 60.0,
            aggregation_workers: 7,
        })
        .unwrap()
        .extract(&files, &events)
        .unwrap();

        for (a, b) in single.features.vectors.iter().zip(&many.features.vectors) {
            assert_eq!(a.file_id, b.file_id);
            for (x, y) in a.values.iter().zip(&b.values) {
                assert!((x - y).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(FeatureExtractor::new(ExtractorConfig {
            recency_half_life_secs: 0.0,
            aggregation_workers: 1,
        })
        .is_err());
        assert!(FeatureExtractor::new(ExtractorConfig {
            recency_half_life_secs: 10.0,
            aggregation_workers: 0,
        })
        .is_err());
    }

    #[test]
    fn test_lookup_in_unsorted_set() {
        let set = FeatureSet {
            dimensions: vec![Dimension::AccessFrequency],
            vectors: ["/c", "/a", "/b"]
                .iter()
                .enumerate()
                .map(|(i, id)| FeatureVector {
                    file_id: id.to_string(),
                    values: vec![i as f64],
                })
                .collect(),
        };
        assert_eq!(set.value("/c", Dimension::AccessFrequency), Some(0.0));
        assert_eq!(set.value("/a", Dimension::AccessFrequency), Some(1.0));
        assert_eq!(set.value("/b", Dimension::AccessFrequency), Some(2.0));
        assert!(set.get("/d").is_none());
    }
}
