use catalog::{FileId, FileRecord, NodeState};
use clustering::{ClusterId, Clustering};
use features::{AccessProfile, FeatureSet};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::ledger::UsageLedger;
use crate::policy::{tier_policies, TierPolicy};
use crate::{PlacementError, PlacementOutcome, PlannerConfig, ReplicaPlan, Result, UnsatisfiedFile};

const PROXIMITY_WEIGHT: f64 = 0.4;
const LOCALITY_WEIGHT: f64 = 0.4;
const CAPACITY_WEIGHT: f64 = 0.2;
const SAME_RACK_PROXIMITY: f64 = 0.5;
/// Smallest variance drop that counts as a strict improvement.
const IMPROVEMENT_EPSILON: f64 = 1e-12;

pub struct PlanningInput<'a> {
    pub clustering: &'a Clustering,
    pub features: &'a FeatureSet,
    pub files: &'a [FileRecord],
    pub profiles: &'a BTreeMap<FileId, AccessProfile>,
    pub nodes: &'a [NodeState],
}

struct Job<'a> {
    record: &'a FileRecord,
    profile: Option<&'a AccessProfile>,
    cluster: ClusterId,
    policy: ClusterId,
    /// Nearest other cluster and its distance gap, for boundary files only.
    neighbor: Option<(ClusterId, f64)>,
    targets: Option<Vec<usize>>,
}

pub struct ReplicationPlanner {
    config: PlannerConfig,
}

impl ReplicationPlanner {
    pub fn new(config: PlannerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn plan(&self, input: &PlanningInput<'_>) -> Result<PlacementOutcome> {
        if input.clustering.is_empty() {
            return Err(PlacementError::EmptyPartition);
        }
        let mut ledger = UsageLedger::new(input.nodes)?;

        let policies = tier_policies(input.clustering, self.config.min_replicas, self.config.max_replicas);

        let mut jobs = Vec::with_capacity(input.files.len());
        for record in input.files {
            let cluster = input
                .clustering
                .cluster_of(&record.file_id)
                .ok_or_else(|| PlacementError::UnassignedFile(record.file_id.clone()))?;
            jobs.push(Job {
                record,
                profile: input.profiles.get(&record.file_id),
                cluster,
                policy: cluster,
                neighbor: self.boundary_neighbor(input, record, cluster),
                targets: None,
            });
        }

        // Largest commitments first: replica count, then size, then id.
        jobs.sort_by(|a, b| {
            policies[b.policy]
                .replicas
                .cmp(&policies[a.policy].replicas)
                .then(b.record.size_bytes.cmp(&a.record.size_bytes))
                .then(a.record.file_id.cmp(&b.record.file_id))
        });

        info!(
            "Planning {} files across {} nodes ({} boundary candidates)",
            jobs.len(),
            ledger.len(),
            jobs.iter().filter(|j| j.neighbor.is_some()).count()
        );

        let imbalance_before = ledger.imbalance();

        for job in jobs.iter_mut() {
            let count = policies[job.policy].replicas;
            let ranked = rank_nodes(&ledger, job.record, job.profile);
            if ranked.len() >= count {
                let targets: Vec<usize> = ranked.iter().take(count).map(|(i, _)| *i).collect();
                ledger.reserve(&targets, job.record.size_bytes);
                job.targets = Some(targets);
            }
        }

        let mut refinement_moves = self.refine(&mut jobs, &mut ledger, &policies);
        refinement_moves += self.retry_unplaced(&mut jobs, &mut ledger, &policies);

        let mut plans = Vec::new();
        let mut unsatisfied = Vec::new();
        for job in &jobs {
            match &job.targets {
                Some(targets) => plans.push(ReplicaPlan {
                    file_id: job.record.file_id.clone(),
                    replica_count: targets.len(),
                    target_nodes: targets.iter().map(|i| ledger.node(*i).node_id.clone()).collect(),
                    cluster_id: job.cluster,
                    policy_cluster: job.policy,
                    size_bytes: job.record.size_bytes,
                }),
                None => {
                    let required = policies[job.policy].replicas;
                    let feasible = rank_nodes(&ledger, job.record, job.profile).len();
                    warn!(
                        "Capacity exceeded for {}: {} replicas of {} bytes requested, {} nodes can hold it",
                        job.record.file_id, required, job.record.size_bytes, feasible
                    );
                    unsatisfied.push(UnsatisfiedFile {
                        file_id: job.record.file_id.clone(),
                        required_replicas: required,
                        feasible_nodes: feasible,
                        size_bytes: job.record.size_bytes,
                    });
                }
            }
        }
        plans.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        unsatisfied.sort_by(|a, b| a.file_id.cmp(&b.file_id));

        let imbalance_after = ledger.imbalance();
        info!(
            "Planned {} files ({} unsatisfied, {} refinement moves), imbalance {:.6} -> {:.6}",
            plans.len(),
            unsatisfied.len(),
            refinement_moves,
            imbalance_before,
            imbalance_after
        );

        Ok(PlacementOutcome {
            plans,
            unsatisfied,
            policies,
            nodes: ledger.projections(),
            refinement_moves,
            imbalance_before,
            imbalance_after,
        })
    }

    /// A file sits on a boundary when its nearest other centroid is within
    /// `boundary_epsilon` of the distance to its own centroid.
    fn boundary_neighbor(
        &self,
        input: &PlanningInput<'_>,
        record: &FileRecord,
        cluster: ClusterId,
    ) -> Option<(ClusterId, f64)> {
        let vector = input.features.get(&record.file_id)?;
        let ranked = input.clustering.ranked_centroids(&vector.values);
        let own = ranked.iter().find(|(id, _)| *id == cluster)?.1;
        let (other, distance) = ranked.iter().find(|(id, _)| *id != cluster)?;
        let gap = distance - own;
        (gap <= self.config.boundary_epsilon).then_some((*other, gap))
    }

    /// Bounded local search over boundary files: switch a file to the
    /// neighbouring cluster's policy when that costs no more replicas and
    /// strictly lowers the load variance.
    fn refine(&self, jobs: &mut [Job<'_>], ledger: &mut UsageLedger, policies: &[TierPolicy]) -> usize {
        let mut candidates: Vec<usize> = (0..jobs.len()).filter(|&i| jobs[i].neighbor.is_some()).collect();
        candidates.sort_by(|&a, &b| {
            let gap = |i: usize| jobs[i].neighbor.map(|(_, gap)| gap).unwrap_or(f64::INFINITY);
            gap(a)
                .total_cmp(&gap(b))
                .then(jobs[a].record.file_id.cmp(&jobs[b].record.file_id))
        });
        if candidates.is_empty() {
            return 0;
        }

        let mut total = 0;
        for pass in 0..self.config.refinement_passes {
            let mut moves = 0;
            for &i in &candidates {
                let job = &mut jobs[i];
                let (Some(current), Some((neighbor, _))) = (job.targets.clone(), job.neighbor) else {
                    continue;
                };
                let alternative = if job.policy == job.cluster { neighbor } else { job.cluster };
                let replicas = policies[alternative].replicas;
                if replicas > policies[job.policy].replicas {
                    continue;
                }

                let size = job.record.size_bytes;
                let before = ledger.imbalance();
                ledger.release(&current, size);

                let ranked = rank_nodes(ledger, job.record, job.profile);
                if ranked.len() >= replicas {
                    let targets: Vec<usize> = ranked.iter().take(replicas).map(|(i, _)| *i).collect();
                    ledger.reserve(&targets, size);
                    let after = ledger.imbalance();
                    if after + IMPROVEMENT_EPSILON < before {
                        debug!(
                            "Moved {} from cluster {} policy to cluster {} ({} replicas), imbalance {:.6} -> {:.6}",
                            job.record.file_id, job.policy, alternative, replicas, before, after
                        );
                        job.policy = alternative;
                        job.targets = Some(targets);
                        moves += 1;
                        continue;
                    }
                    ledger.release(&targets, size);
                }
                ledger.reserve(&current, size);
            }

            total += moves;
            debug!("Refinement pass {}: {} moves", pass + 1, moves);
            if moves == 0 {
                break;
            }
        }
        total
    }

    /// Second chance for files the greedy pass could not place: their own
    /// policy first, then a cheaper neighbouring policy for boundary files.
    fn retry_unplaced(&self, jobs: &mut [Job<'_>], ledger: &mut UsageLedger, policies: &[TierPolicy]) -> usize {
        let mut moved = 0;
        for job in jobs.iter_mut().filter(|job| job.targets.is_none()) {
            let mut attempts = vec![job.policy];
            if let Some((neighbor, _)) = job.neighbor {
                if policies[neighbor].replicas < policies[job.policy].replicas {
                    attempts.push(neighbor);
                }
            }

            for policy in attempts {
                let count = policies[policy].replicas;
                let ranked = rank_nodes(ledger, job.record, job.profile);
                if ranked.len() < count {
                    continue;
                }
                let targets: Vec<usize> = ranked.iter().take(count).map(|(i, _)| *i).collect();
                ledger.reserve(&targets, job.record.size_bytes);
                if policy != job.policy {
                    debug!("Placed {} under cluster {} policy after retry", job.record.file_id, policy);
                    moved += 1;
                }
                job.policy = policy;
                job.targets = Some(targets);
                break;
            }
        }
        moved
    }
}

/// Feasible nodes for one replica of `record`, best first. Ties go to the
/// lower node id because the ledger is sorted by id and the sort is stable.
fn rank_nodes(ledger: &UsageLedger, record: &FileRecord, profile: Option<&AccessProfile>) -> Vec<(usize, f64)> {
    let primary_rack = ledger
        .index_of(&record.primary_node)
        .and_then(|i| ledger.node(i).rack.clone());

    let mut ranked: Vec<(usize, f64)> = (0..ledger.len())
        .filter(|&i| ledger.fits(i, record.size_bytes))
        .map(|i| {
            let node = ledger.node(i);
            let proximity = if node.node_id == record.primary_node {
                1.0
            } else if primary_rack.is_some() && node.rack == primary_rack {
                SAME_RACK_PROXIMITY
            } else {
                0.0
            };
            let locality = profile.map(|p| p.share(&node.node_id)).unwrap_or(0.0);
            let free = ledger.free_fraction_after(i, record.size_bytes);
            let score = PROXIMITY_WEIGHT * proximity + LOCALITY_WEIGHT * locality + CAPACITY_WEIGHT * free;
            (i, score)
        })
        .collect();

    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::{Category, NodeId};
    use chrono::{TimeZone, Utc};
    use clustering::Cluster;
    use features::{Dimension, FeatureVector};
    use std::collections::BTreeSet;

    fn record(id: &str, size: u64, primary: &str) -> FileRecord {
        FileRecord::new(
            id,
            size,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            primary,
            Category::Moderate,
        )
    }

    fn config(min: usize, max: usize) -> PlannerConfig {
        PlannerConfig {
            min_replicas: min,
            max_replicas: max,
            boundary_epsilon: 0.01,
            refinement_passes: 4,
        }
    }

    /// Two clusters: cluster 0 quiet at the origin, cluster 1 busy at (1, 1).
    fn fixture(points: &[(&str, [f64; 2], ClusterId)]) -> (FeatureSet, Clustering) {
        let features = FeatureSet {
            dimensions: vec![Dimension::AccessFrequency, Dimension::ClientSpread],
            vectors: {
                let mut v: Vec<_> = points
                    .iter()
                    .map(|(id, values, _)| FeatureVector {
                        file_id: id.to_string(),
                        values: values.to_vec(),
                    })
                    .collect();
                v.sort_by(|a, b| a.file_id.cmp(&b.file_id));
                v
            },
        };
        let mut members = vec![BTreeSet::new(), BTreeSet::new()];
        let mut assignments = BTreeMap::new();
        for (id, _, cluster) in points {
            members[*cluster].insert(id.to_string());
            assignments.insert(id.to_string(), *cluster);
        }
        let clustering = Clustering {
            dimensions: features.dimensions.clone(),
            clusters: vec![
                Cluster {
                    id: 0,
                    centroid: vec![0.0, 0.0],
                    members: members[0].clone(),
                },
                Cluster {
                    id: 1,
                    centroid: vec![1.0, 1.0],
                    members: members[1].clone(),
                },
            ],
            assignments,
            iterations: 1,
            converged: true,
            reseeds: 0,
        };
        (features, clustering)
    }

    #[test]
    fn test_full_primary_is_skipped() {
        let (features, clustering) = fixture(&[("/busy", [1.0, 1.0], 1), ("/quiet", [0.0, 0.0], 0)]);
        let files = vec![record("/busy", 10, "dn1"), record("/quiet", 10, "dn1")];
        let nodes = vec![
            NodeState::new("dn1", 100, 100),
            NodeState::new("dn2", 100, 0),
            NodeState::new("dn3", 100, 50),
        ];
        let profiles = BTreeMap::new();

        let outcome = ReplicationPlanner::new(config(1, 2))
            .unwrap()
            .plan(&PlanningInput {
                clustering: &clustering,
                features: &features,
                files: &files,
                profiles: &profiles,
                nodes: &nodes,
            })
            .unwrap();

        assert!(outcome.unsatisfied.is_empty());
        for plan in &outcome.plans {
            assert!(!plan.target_nodes.contains(&NodeId::new("dn1")));
        }
        let busy = outcome.plans.iter().find(|p| p.file_id == "/busy").unwrap();
        assert_eq!(busy.replica_count, 2);
        assert_eq!(busy.target_nodes, vec![NodeId::new("dn2"), NodeId::new("dn3")]);
        let quiet = outcome.plans.iter().find(|p| p.file_id == "/quiet").unwrap();
        assert_eq!(quiet.replica_count, 1);
    }

    #[test]
    fn test_frequent_accessor_is_preferred() {
        let (features, clustering) = fixture(&[("/f", [1.0, 1.0], 1), ("/g", [0.0, 0.0], 0)]);
        let files = vec![record("/f", 10, "dn1"), record("/g", 10, "dn1")];
        let nodes = vec![
            NodeState::new("dn1", 1000, 0),
            NodeState::new("dn2", 1000, 0),
            NodeState::new("dn3", 1000, 0),
        ];
        let mut profile = AccessProfile::default();
        profile.accesses = 10;
        profile.by_client.insert(NodeId::new("dn3"), 9);
        profile.by_client.insert(NodeId::new("dn2"), 1);
        let profiles: BTreeMap<FileId, AccessProfile> = [("/f".to_string(), profile)].into_iter().collect();

        let outcome = ReplicationPlanner::new(config(1, 2))
            .unwrap()
            .plan(&PlanningInput {
                clustering: &clustering,
                features: &features,
                files: &files,
                profiles: &profiles,
                nodes: &nodes,
            })
            .unwrap();

        let plan = outcome.plans.iter().find(|p| p.file_id == "/f").unwrap();
        assert_eq!(plan.target_nodes, vec![NodeId::new("dn1"), NodeId::new("dn3")]);
    }

    #[test]
    fn test_same_rack_beats_remote_node() {
        let (features, clustering) = fixture(&[("/f", [1.0, 1.0], 1), ("/g", [0.0, 0.0], 0)]);
        let files = vec![record("/f", 10, "dn1"), record("/g", 10, "dn1")];
        let nodes = vec![
            NodeState::new("dn1", 1000, 0).with_rack("r1"),
            NodeState::new("dn2", 1000, 0).with_rack("r2"),
            NodeState::new("dn3", 1000, 0).with_rack("r1"),
        ];
        let profiles = BTreeMap::new();

        let outcome = ReplicationPlanner::new(config(1, 2))
            .unwrap()
            .plan(&PlanningInput {
                clustering: &clustering,
                features: &features,
                files: &files,
                profiles: &profiles,
                nodes: &nodes,
            })
            .unwrap();

        let plan = outcome.plans.iter().find(|p| p.file_id == "/f").unwrap();
        assert_eq!(plan.target_nodes, vec![NodeId::new("dn1"), NodeId::new("dn3")]);
    }

    #[test]
    fn test_no_room_is_reported_per_file() {
        let (features, clustering) = fixture(&[("/big", [1.0, 1.0], 1), ("/small", [0.0, 0.0], 0)]);
        let files = vec![record("/big", 500, "dn1"), record("/small", 10, "dn1")];
        let nodes = vec![NodeState::new("dn1", 100, 0), NodeState::new("dn2", 100, 0)];
        let profiles = BTreeMap::new();

        let outcome = ReplicationPlanner::new(config(1, 2))
            .unwrap()
            .plan(&PlanningInput {
                clustering: &clustering,
                features: &features,
                files: &files,
                profiles: &profiles,
                nodes: &nodes,
            })
            .unwrap();

        assert_eq!(outcome.plans.len(), 1);
        assert_eq!(outcome.plans[0].file_id, "/small");
        assert_eq!(outcome.unsatisfied.len(), 1);
        assert_eq!(outcome.unsatisfied[0].file_id, "/big");
        assert_eq!(outcome.unsatisfied[0].feasible_nodes, 0);
        for node in &outcome.nodes {
            assert!(node.projected_bytes <= node.capacity_bytes);
        }
    }

    #[test]
    fn test_boundary_file_moves_to_cheaper_policy_when_it_balances_load() {
        let (features, clustering) = fixture(&[("/edge", [0.5, 0.5], 1)]);
        let files = vec![record("/edge", 10, "dn2")];
        let nodes = vec![NodeState::new("dn1", 100, 80), NodeState::new("dn2", 100, 0)];
        let profiles = BTreeMap::new();

        let outcome = ReplicationPlanner::new(config(1, 2))
            .unwrap()
            .plan(&PlanningInput {
                clustering: &clustering,
                features: &features,
                files: &files,
                profiles: &profiles,
                nodes: &nodes,
            })
            .unwrap();

        assert_eq!(outcome.refinement_moves, 1);
        let plan = &outcome.plans[0];
        assert_eq!(plan.cluster_id, 1);
        assert_eq!(plan.policy_cluster, 0);
        assert_eq!(plan.replica_count, 1);
        assert_eq!(plan.target_nodes, vec![NodeId::new("dn2")]);
    }

    #[test]
    fn test_interior_files_are_not_refined() {
        let (features, clustering) = fixture(&[("/core", [0.9, 0.9], 1)]);
        let files = vec![record("/core", 10, "dn2")];
        let nodes = vec![NodeState::new("dn1", 100, 80), NodeState::new("dn2", 100, 0)];
        let profiles = BTreeMap::new();

        let outcome = ReplicationPlanner::new(config(1, 2))
            .unwrap()
            .plan(&PlanningInput {
                clustering: &clustering,
                features: &features,
                files: &files,
                profiles: &profiles,
                nodes: &nodes,
            })
            .unwrap();

        assert_eq!(outcome.refinement_moves, 0);
        assert_eq!(outcome.plans[0].replica_count, 2);
    }

    #[test]
    fn test_structural_errors_and_short_node_list() {
        let (features, clustering) = fixture(&[("/f", [1.0, 1.0], 1)]);
        let files = vec![record("/f", 10, "dn1")];
        let profiles = BTreeMap::new();
        let nodes = vec![NodeState::new("dn1", 100, 0)];

        let planner = ReplicationPlanner::new(config(1, 2)).unwrap();
        let outcome = planner
            .plan(&PlanningInput {
                clustering: &clustering,
                features: &features,
                files: &files,
                profiles: &profiles,
                nodes: &nodes,
            })
            .unwrap();
        assert!(outcome.plans.is_empty());
        assert_eq!(outcome.unsatisfied.len(), 1);
        assert_eq!(outcome.unsatisfied[0].required_replicas, 2);
        assert_eq!(outcome.unsatisfied[0].feasible_nodes, 1);

        let orphan = vec![record("/orphan", 10, "dn1")];
        let nodes = vec![NodeState::new("dn1", 100, 0), NodeState::new("dn2", 100, 0)];
        assert!(matches!(
            planner.plan(&PlanningInput {
                clustering: &clustering,
                features: &features,
                files: &orphan,
                profiles: &profiles,
                nodes: &nodes,
            }),
            Err(PlacementError::UnassignedFile(_))
        ));

        assert!(ReplicationPlanner::new(config(3, 2)).is_err());
        assert!(ReplicationPlanner::new(config(0, 2)).is_err());
    }
}
