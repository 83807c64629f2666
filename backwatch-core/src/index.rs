//! Record buckets keyed by [`CorrelationKey`].
//!
//! Built once per evaluation in a single pass over the normalized records,
//! so per-guest lookups cost one hash probe per candidate key.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::keys::{CorrelationKey, EndpointSuffix, OwnerClass, Topology};
use crate::models::{BackupRecord, TaskRecord};
use crate::raw::NormalizedRecords;

/// A bucket entry: the record plus, for archive snapshots, how its owner
/// token was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub record: BackupRecord,
    pub owner: Option<OwnerClass>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub snapshot_buckets: usize,
    pub task_buckets: usize,
    pub unknown_owner_records: usize,
    pub heuristic_owner_records: usize,
}

/// Lookup seam between the matcher and wherever buckets live.
pub trait BucketSource {
    fn snapshot_bucket(&self, key: &CorrelationKey) -> Arc<[Candidate]>;
    fn task_bucket(&self, key: &CorrelationKey) -> Arc<[TaskRecord]>;
}

#[derive(Debug, Default)]
pub struct RecordIndex {
    snapshots_by_key: HashMap<CorrelationKey, Vec<Candidate>>,
    tasks_by_key: HashMap<CorrelationKey, Vec<TaskRecord>>,
    stats: IndexStats,
}

impl RecordIndex {
    pub fn build(records: &NormalizedRecords, topology: &Topology) -> Self {
        let mut index = RecordIndex::default();

        for record in &records.archive {
            let class = topology.classify_owner(record.owner.as_deref());
            match class.suffix {
                EndpointSuffix::Unknown => index.stats.unknown_owner_records += 1,
                _ if class.is_heuristic() => index.stats.heuristic_owner_records += 1,
                _ => {}
            }
            let key = CorrelationKey::archive(record.guest_id, record.guest_kind, class.suffix.clone());
            index
                .snapshots_by_key
                .entry(key)
                .or_default()
                .push(Candidate { record: record.clone(), owner: Some(class) });
        }

        for record in records.hypervisor.iter().chain(&records.snapshots) {
            for key in CorrelationKey::located(
                record.guest_id,
                Some(record.guest_kind),
                record.endpoint_id.as_deref(),
                record.node.as_deref(),
                topology,
            ) {
                index
                    .snapshots_by_key
                    .entry(key)
                    .or_default()
                    .push(Candidate { record: record.clone(), owner: None });
            }
        }

        for task in &records.tasks {
            for key in CorrelationKey::located(
                task.guest_id,
                task.guest_kind,
                task.guest_endpoint_id.as_deref(),
                task.guest_node.as_deref(),
                topology,
            ) {
                index.tasks_by_key.entry(key).or_default().push(task.clone());
            }
        }

        index.stats.snapshot_buckets = index.snapshots_by_key.len();
        index.stats.task_buckets = index.tasks_by_key.len();
        debug!(
            snapshot_buckets = index.stats.snapshot_buckets,
            task_buckets = index.stats.task_buckets,
            unknown_owner = index.stats.unknown_owner_records,
            "record index built"
        );
        index
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    pub fn snapshots(&self, key: &CorrelationKey) -> &[Candidate] {
        self.snapshots_by_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tasks(&self, key: &CorrelationKey) -> &[TaskRecord] {
        self.tasks_by_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl BucketSource for RecordIndex {
    fn snapshot_bucket(&self, key: &CorrelationKey) -> Arc<[Candidate]> {
        Arc::from(self.snapshots(key))
    }

    fn task_bucket(&self, key: &CorrelationKey) -> Arc<[TaskRecord]> {
        Arc::from(self.tasks(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::{Guest, GuestKind, SourceKind, TaskStatus};

    fn archive(id: u32, owner: Option<&str>, ts: i64) -> BackupRecord {
        BackupRecord {
            id: format!("pbs/store/root/vm/{id}/{ts}"),
            source: SourceKind::Archive,
            guest_id: id,
            guest_kind: GuestKind::Vm,
            timestamp: ts,
            namespace: "root".into(),
            datastore_or_storage: "store".into(),
            owner: owner.map(Into::into),
            comment: None,
            volume_id: None,
            archive_instance_index: Some(0),
            node: None,
            endpoint_id: None,
            size: None,
            protected: false,
            verified: false,
        }
    }

    fn topology() -> Topology {
        let guests = vec![
            Guest {
                id: 100,
                kind: GuestKind::Vm,
                node: Some("nodeA".into()),
                cluster_endpoint_id: Some("main".into()),
                cluster_display_name: None,
                name: "web".into(),
            },
            Guest {
                id: 100,
                kind: GuestKind::Vm,
                node: Some("nodeB".into()),
                cluster_endpoint_id: Some("main".into()),
                cluster_display_name: None,
                name: "db".into(),
            },
        ];
        Topology::build(&guests, &EngineConfig::default())
    }

    #[test]
    fn test_archive_records_bucket_by_owner_suffix() {
        let topo = topology();
        let records = NormalizedRecords {
            archive: vec![
                archive(100, Some("u!nodea"), 1),
                archive(100, Some("u!nodeb"), 2),
                archive(100, None, 3),
                archive(100, Some("u!offsite"), 4),
            ],
            ..Default::default()
        };
        let index = RecordIndex::build(&records, &topo);

        let node_a = CorrelationKey::archive(100, GuestKind::Vm, EndpointSuffix::PrimaryNode("nodea".into()));
        assert_eq!(index.snapshots(&node_a).len(), 1);
        assert_eq!(index.snapshots(&node_a)[0].record.timestamp, 1);

        let unknown = CorrelationKey::archive(100, GuestKind::Vm, EndpointSuffix::Unknown);
        assert_eq!(index.snapshots(&unknown).len(), 1);

        let generic = CorrelationKey::archive(100, GuestKind::Vm, EndpointSuffix::GenericPrimary);
        assert_eq!(index.snapshots(&generic).len(), 1);

        let stats = index.stats();
        assert_eq!(stats.unknown_owner_records, 1);
        assert_eq!(stats.heuristic_owner_records, 1);
    }

    #[test]
    fn test_tasks_land_in_node_and_endpoint_buckets() {
        let topo = topology();
        let records = NormalizedRecords {
            tasks: vec![TaskRecord {
                id: "t1".into(),
                source: SourceKind::Hypervisor,
                guest_id: 100,
                guest_kind: None,
                guest_node: Some("nodeA".into()),
                guest_endpoint_id: None,
                start_time: 5,
                status: TaskStatus::Ok,
                archive_instance_index: None,
            }],
            ..Default::default()
        };
        let index = RecordIndex::build(&records, &topo);

        assert_eq!(index.tasks(&CorrelationKey::node(100, None, "main", "nodea")).len(), 1);
        assert_eq!(index.tasks(&CorrelationKey::endpoint(100, None, "main")).len(), 1);
        assert!(index.tasks(&CorrelationKey::node(100, Some(GuestKind::Vm), "main", "nodea")).is_empty());
        assert_eq!(index.stats().task_buckets, 2);
    }

    #[test]
    fn test_bucket_source_returns_empty_for_missing_key() {
        let index = RecordIndex::default();
        assert!(index.snapshot_bucket(&CorrelationKey::unscoped(1, None)).is_empty());
        assert!(index.task_bucket(&CorrelationKey::unscoped(1, None)).is_empty());
    }
}
