//! Raw input shapes handed over by the transport collaborator, and their
//! normalization into [`BackupRecord`]s and [`TaskRecord`]s.
//!
//! Field names follow what the archive service and the hypervisor API
//! return (`backup-id`, `ctime`, `volid`...). A malformed record is dropped
//! with a warning and reported in [`NormalizedRecords::dropped`]; it never
//! aborts the pass.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

use crate::error::{RecordError, RecordSource};
use crate::keys::path_kind_hint;
use crate::models::{BackupRecord, Guest, GuestKind, SourceKind, TaskRecord, TaskStatus};
use crate::namespace::{normalize_namespace, select_instances, InstanceFilter, NamespaceSelection};

/// Everything the collaborator knows at one refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSnapshot {
    /// `None` until the inventory has been fetched at least once.
    #[serde(default)]
    pub guests: Option<Vec<Guest>>,
    #[serde(default)]
    pub archive_instances: Vec<ArchiveInstance>,
    #[serde(default)]
    pub hypervisor: HypervisorBackups,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveInstance {
    pub name: String,
    #[serde(default)]
    pub datastores: Vec<Datastore>,
    #[serde(default)]
    pub tasks_by_kind: BTreeMap<TaskKind, Vec<TaskRaw>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Datastore {
    pub name: String,
    #[serde(default)]
    pub snapshots: Vec<SnapshotRaw>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Backup,
    Verify,
    Prune,
    GarbageCollection,
    Sync,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub state: String,
}

/// Archive snapshot as listed per datastore/namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SnapshotRaw {
    #[serde(default)]
    pub backup_type: Option<String>,
    #[serde(default)]
    pub backup_id: Option<String>,
    #[serde(default)]
    pub backup_time: Option<i64>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default, alias = "ns")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub verification: Option<Verification>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HypervisorBackups {
    #[serde(default)]
    pub storage_backups: Vec<StorageBackupRaw>,
    #[serde(default)]
    pub guest_snapshots: Vec<GuestSnapshotRaw>,
    #[serde(default)]
    pub tasks: Vec<TaskRaw>,
}

/// Backup file found in a hypervisor storage content listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageBackupRaw {
    #[serde(default)]
    pub volid: Option<String>,
    #[serde(default)]
    pub vmid: Option<u32>,
    #[serde(default)]
    pub ctime: Option<i64>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub storage: Option<String>,
    #[serde(default, rename = "type", alias = "subtype")]
    pub guest_type: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub protected: bool,
    /// Stored on archive-backed storage mounted into the hypervisor.
    #[serde(default)]
    pub archive_backed: bool,
}

/// Guest-level point-in-time snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GuestSnapshotRaw {
    #[serde(default)]
    pub vmid: Option<u32>,
    #[serde(default, rename = "type")]
    pub guest_type: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub snaptime: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(u64),
    Text(String),
}

impl RawId {
    fn as_guest_id(&self) -> Option<u32> {
        match self {
            RawId::Number(n) => u32::try_from(*n).ok(),
            RawId::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskRaw {
    #[serde(default)]
    pub upid: Option<String>,
    #[serde(default, rename = "type")]
    pub task_type: Option<String>,
    #[serde(default, alias = "vmid")]
    pub id: Option<RawId>,
    #[serde(default, alias = "worker_id")]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub guest_type: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub starttime: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Records narrowed to the active namespace/instance selection.
#[derive(Debug, Clone, Default)]
pub struct NormalizedRecords {
    pub archive: Vec<BackupRecord>,
    pub hypervisor: Vec<BackupRecord>,
    pub snapshots: Vec<BackupRecord>,
    pub tasks: Vec<TaskRecord>,
    pub dropped: Vec<RecordError>,
}

impl NormalizedRecords {
    pub fn record_count(&self) -> usize {
        self.archive.len() + self.hypervisor.len() + self.snapshots.len()
    }

    fn drop_record(&mut self, err: RecordError) {
        warn!(error = %err, "dropping malformed record");
        self.dropped.push(err);
    }
}

/// Turns the raw snapshot into records, keeping only the archive instances
/// and namespaces picked by the selection.
pub fn normalize(
    inputs: &InputSnapshot,
    selection: &NamespaceSelection,
    instance_filter: InstanceFilter,
) -> NormalizedRecords {
    let mut out = NormalizedRecords::default();
    let mut seen = HashSet::new();

    for (idx, instance) in select_instances(&inputs.archive_instances, selection, instance_filter) {
        for datastore in &instance.datastores {
            for snap in &datastore.snapshots {
                if !selection.matches_namespace(snap.namespace.as_deref()) {
                    continue;
                }
                match archive_record(idx, instance, datastore, snap) {
                    Ok(Some(record)) => {
                        if seen.insert(record.id.clone()) {
                            out.archive.push(record);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => out.drop_record(e),
                }
            }
        }

        for (kind, tasks) in &instance.tasks_by_kind {
            if *kind != TaskKind::Backup {
                continue;
            }
            for task in tasks {
                match task_record(task, SourceKind::Archive, RecordSource::ArchiveTask, Some(idx)) {
                    Ok(Some(record)) => out.tasks.push(record),
                    Ok(None) => {}
                    Err(e) => out.drop_record(e),
                }
            }
        }
    }

    // The archive listing is authoritative for archive-backed storage.
    let archive_connected = !inputs.archive_instances.is_empty();
    // volume ids are only unique inside one cluster
    let mut seen_volids: HashSet<(String, String)> = HashSet::new();
    for raw in &inputs.hypervisor.storage_backups {
        if raw.archive_backed && archive_connected {
            debug!(volid = ?raw.volid, "skipping archive-backed storage backup");
            continue;
        }
        match storage_record(raw) {
            Ok(Some(record)) => {
                let scope = record.endpoint_id.clone().unwrap_or_default();
                if seen_volids.insert((scope, record.dedup_key().to_string())) {
                    out.hypervisor.push(record);
                }
            }
            Ok(None) => {}
            Err(e) => out.drop_record(e),
        }
    }

    for raw in &inputs.hypervisor.guest_snapshots {
        match guest_snapshot_record(raw) {
            Ok(Some(record)) => out.snapshots.push(record),
            Ok(None) => {}
            Err(e) => out.drop_record(e),
        }
    }

    for raw in &inputs.hypervisor.tasks {
        let is_backup_task = raw
            .task_type
            .as_deref()
            .map_or(true, |t| t.eq_ignore_ascii_case("vzdump") || t.eq_ignore_ascii_case("backup"));
        if !is_backup_task {
            continue;
        }
        match task_record(raw, SourceKind::Hypervisor, RecordSource::HypervisorTask, None) {
            Ok(Some(record)) => out.tasks.push(record),
            Ok(None) => {}
            Err(e) => out.drop_record(e),
        }
    }

    out
}

fn archive_record(
    idx: usize,
    instance: &ArchiveInstance,
    datastore: &Datastore,
    snap: &SnapshotRaw,
) -> Result<Option<BackupRecord>, RecordError> {
    let label = format!(
        "{}/{}/{}",
        instance.name,
        datastore.name,
        snap.backup_id.as_deref().unwrap_or("?")
    );
    let missing = |field| RecordError::MissingField {
        origin: RecordSource::ArchiveSnapshot,
        record: label.clone(),
        field,
    };

    let backup_type = snap.backup_type.as_deref().ok_or_else(|| missing("backup-type"))?;
    if backup_type.eq_ignore_ascii_case("host") {
        return Ok(None);
    }
    let kind = GuestKind::from_tag(backup_type).ok_or_else(|| RecordError::Unparseable {
        origin: RecordSource::ArchiveSnapshot,
        record: label.clone(),
        field: "backup-type",
        value: backup_type.to_string(),
    })?;
    let raw_id = snap.backup_id.as_deref().ok_or_else(|| missing("backup-id"))?;
    let guest_id: u32 = raw_id.trim().parse().map_err(|_| RecordError::Unparseable {
        origin: RecordSource::ArchiveSnapshot,
        record: label.clone(),
        field: "backup-id",
        value: raw_id.to_string(),
    })?;
    let timestamp = snap.backup_time.ok_or_else(|| missing("backup-time"))?;
    let namespace = normalize_namespace(snap.namespace.as_deref());

    Ok(Some(BackupRecord {
        id: format!(
            "{}/{}/{}/{}/{}/{}",
            instance.name,
            datastore.name,
            namespace,
            kind.as_str(),
            guest_id,
            timestamp
        ),
        source: SourceKind::Archive,
        guest_id,
        guest_kind: kind,
        timestamp,
        namespace,
        datastore_or_storage: datastore.name.clone(),
        owner: snap.owner.clone().filter(|o| !o.trim().is_empty()),
        comment: snap.comment.clone().filter(|c| !c.trim().is_empty()),
        volume_id: None,
        archive_instance_index: Some(idx),
        node: None,
        endpoint_id: None,
        size: snap.size,
        protected: snap.protected,
        verified: snap.verification.as_ref().is_some_and(|v| v.state == "ok"),
    }))
}

fn storage_record(raw: &StorageBackupRaw) -> Result<Option<BackupRecord>, RecordError> {
    if matches!(raw.content.as_deref(), Some("vztmpl") | Some("iso")) {
        return Ok(None);
    }
    let label = raw.volid.clone().unwrap_or_else(|| "?".into());
    let missing = |field| RecordError::MissingField {
        origin: RecordSource::StorageBackup,
        record: label.clone(),
        field,
    };

    let volid = raw.volid.as_deref().ok_or_else(|| missing("volid"))?;
    let vmid = raw.vmid.ok_or_else(|| missing("vmid"))?;
    let ctime = raw.ctime.ok_or_else(|| missing("ctime"))?;
    if vmid == 0 {
        // host backup, no guest to attribute it to
        return Ok(None);
    }

    let kind = raw
        .guest_type
        .as_deref()
        .and_then(GuestKind::from_tag)
        .or_else(|| path_kind_hint(volid))
        .or_else(|| match raw.format.as_deref() {
            Some(f) if f.contains("pbs-vm") => Some(GuestKind::Vm),
            Some(f) if f.contains("pbs-ct") => Some(GuestKind::Container),
            _ => None,
        })
        .ok_or_else(|| RecordError::Unparseable {
            origin: RecordSource::StorageBackup,
            record: label.clone(),
            field: "type",
            value: raw.guest_type.clone().unwrap_or_default(),
        })?;

    Ok(Some(BackupRecord {
        id: volid.to_string(),
        source: SourceKind::Hypervisor,
        guest_id: vmid,
        guest_kind: kind,
        timestamp: ctime,
        namespace: normalize_namespace(None),
        datastore_or_storage: raw.storage.clone().unwrap_or_else(|| storage_from_volid(volid)),
        owner: None,
        comment: raw.notes.clone().filter(|n| !n.trim().is_empty()),
        volume_id: Some(volid.to_string()),
        archive_instance_index: None,
        node: raw.node.clone(),
        endpoint_id: raw.endpoint.clone(),
        size: raw.size,
        protected: raw.protected,
        verified: false,
    }))
}

fn storage_from_volid(volid: &str) -> String {
    volid.split_once(':').map(|(s, _)| s.to_string()).unwrap_or_default()
}

fn guest_snapshot_record(raw: &GuestSnapshotRaw) -> Result<Option<BackupRecord>, RecordError> {
    if raw.name.as_deref() == Some("current") {
        return Ok(None);
    }
    let label = format!(
        "{}/{}",
        raw.vmid.map(|v| v.to_string()).unwrap_or_else(|| "?".into()),
        raw.name.as_deref().unwrap_or("?")
    );
    let missing = |field| RecordError::MissingField {
        origin: RecordSource::GuestSnapshot,
        record: label.clone(),
        field,
    };

    let vmid = raw.vmid.ok_or_else(|| missing("vmid"))?;
    let name = raw.name.as_deref().ok_or_else(|| missing("name"))?;
    let snaptime = raw.snaptime.ok_or_else(|| missing("snaptime"))?;
    let kind_tag = raw.guest_type.as_deref().ok_or_else(|| missing("type"))?;
    let kind = GuestKind::from_tag(kind_tag).ok_or_else(|| RecordError::Unparseable {
        origin: RecordSource::GuestSnapshot,
        record: label.clone(),
        field: "type",
        value: kind_tag.to_string(),
    })?;

    Ok(Some(BackupRecord {
        id: format!(
            "{}/{}/{}/{}/{}",
            raw.endpoint.as_deref().unwrap_or("-"),
            raw.node.as_deref().unwrap_or("-"),
            kind.as_str(),
            vmid,
            name
        ),
        source: SourceKind::Snapshot,
        guest_id: vmid,
        guest_kind: kind,
        timestamp: snaptime,
        namespace: normalize_namespace(None),
        datastore_or_storage: String::new(),
        owner: None,
        comment: raw.description.clone().filter(|d| !d.trim().is_empty()),
        volume_id: None,
        archive_instance_index: None,
        node: raw.node.clone(),
        endpoint_id: raw.endpoint.clone(),
        size: None,
        protected: false,
        verified: false,
    }))
}

/// Extracts `(kind, id)` from worker ids such as `store1:vm/100` or
/// `store1:ns/prod:ct/101`.
pub fn parse_worker_id(worker_id: &str) -> Option<(GuestKind, u32)> {
    let tokens: Vec<&str> = worker_id.split([':', '/']).collect();
    tokens.windows(2).find_map(|pair| {
        let kind = GuestKind::from_tag(pair[0])?;
        let id = pair[1].parse().ok()?;
        Some((kind, id))
    })
}

fn task_record(
    raw: &TaskRaw,
    source: SourceKind,
    origin: RecordSource,
    instance: Option<usize>,
) -> Result<Option<TaskRecord>, RecordError> {
    let label = raw
        .upid
        .clone()
        .or_else(|| raw.worker_id.clone())
        .unwrap_or_else(|| "?".into());
    let missing = |field| RecordError::MissingField { origin, record: label.clone(), field };

    let from_worker = raw.worker_id.as_deref().and_then(parse_worker_id);
    let guest_id = raw
        .id
        .as_ref()
        .and_then(RawId::as_guest_id)
        .or(from_worker.map(|(_, id)| id))
        .ok_or_else(|| missing("id"))?;
    if guest_id == 0 {
        return Ok(None);
    }
    let start_time = raw.starttime.ok_or_else(|| missing("starttime"))?;
    let guest_kind = raw
        .guest_type
        .as_deref()
        .and_then(GuestKind::from_tag)
        .or(from_worker.map(|(kind, _)| kind));

    let id = raw.upid.clone().unwrap_or_else(|| {
        format!(
            "{}:{}:{}:{}",
            raw.endpoint.as_deref().unwrap_or("-"),
            raw.node.as_deref().unwrap_or("-"),
            guest_id,
            start_time
        )
    });

    Ok(Some(TaskRecord {
        id,
        source,
        guest_id,
        guest_kind,
        guest_node: raw.node.clone(),
        guest_endpoint_id: raw.endpoint.clone(),
        start_time,
        status: TaskStatus::from_raw(raw.status.as_deref()),
        archive_instance_index: instance,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(volid: &str, vmid: u32, ctime: Option<i64>) -> StorageBackupRaw {
        StorageBackupRaw {
            volid: Some(volid.into()),
            vmid: Some(vmid),
            ctime,
            node: Some("pve1".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_storage_backup_missing_ctime_is_dropped() {
        let inputs = InputSnapshot {
            hypervisor: HypervisorBackups {
                storage_backups: vec![
                    storage("local:backup/vzdump-qemu-100-2024_01_01.vma.zst", 100, None),
                    storage("local:backup/vzdump-lxc-101-2024_01_01.tar.zst", 101, Some(1_700_000_000)),
                ],
                ..Default::default()
            },
            ..Default::default()
        };

        let out = normalize(&inputs, &NamespaceSelection::all(), InstanceFilter::All);
        assert_eq!(out.hypervisor.len(), 1);
        assert_eq!(out.hypervisor[0].guest_kind, GuestKind::Container);
        assert_eq!(out.hypervisor[0].datastore_or_storage, "local");
        assert_eq!(out.dropped.len(), 1);
        assert!(matches!(
            &out.dropped[0],
            RecordError::MissingField { field: "ctime", .. }
        ));
    }

    #[test]
    fn test_storage_backup_skips_templates_and_host_backups() {
        let mut template = storage("local:vztmpl/debian.tar.zst", 100, Some(1));
        template.content = Some("vztmpl".into());
        let host = storage("local:backup/host.pxar", 0, Some(1));
        let inputs = InputSnapshot {
            hypervisor: HypervisorBackups { storage_backups: vec![template, host], ..Default::default() },
            ..Default::default()
        };

        let out = normalize(&inputs, &NamespaceSelection::all(), InstanceFilter::All);
        assert!(out.hypervisor.is_empty());
        assert!(out.dropped.is_empty());
    }

    #[test]
    fn test_volid_dedupe_is_per_endpoint() {
        let volid = "local:backup/vzdump-qemu-100-2024_03_09-01_00_00.vma.zst";
        let on = |endpoint: &str| StorageBackupRaw { endpoint: Some(endpoint.into()), ..storage(volid, 100, Some(5)) };
        let inputs = InputSnapshot {
            hypervisor: HypervisorBackups {
                storage_backups: vec![on("main"), on("edge"), on("main")],
                ..Default::default()
            },
            ..Default::default()
        };

        let out = normalize(&inputs, &NamespaceSelection::all(), InstanceFilter::All);
        let endpoints: Vec<_> = out.hypervisor.iter().map(|r| r.endpoint_id.as_deref()).collect();
        assert_eq!(endpoints, vec![Some("main"), Some("edge")]);
    }

    #[test]
    fn test_archive_backed_storage_skipped_when_archive_connected() {
        let mut backed = storage("pbs-store:backup/vm/100/2024-01-01T00:00:00Z", 100, Some(5));
        backed.archive_backed = true;
        let mut inputs = InputSnapshot {
            hypervisor: HypervisorBackups { storage_backups: vec![backed], ..Default::default() },
            ..Default::default()
        };

        let out = normalize(&inputs, &NamespaceSelection::all(), InstanceFilter::All);
        assert_eq!(out.hypervisor.len(), 1);

        inputs.archive_instances.push(ArchiveInstance { name: "pbs".into(), ..Default::default() });
        let out = normalize(&inputs, &NamespaceSelection::all(), InstanceFilter::All);
        assert!(out.hypervisor.is_empty());
    }

    #[test]
    fn test_archive_snapshot_parsing_and_namespace_filter() {
        let snapshot: SnapshotRaw = serde_json::from_value(serde_json::json!({
            "backup-type": "vm",
            "backup-id": "100",
            "backup-time": 1_700_000_000,
            "owner": "sync@pbs!nodea",
            "ns": "",
            "verification": {"state": "ok"}
        }))
        .unwrap();
        let broken = SnapshotRaw {
            backup_type: Some("vm".into()),
            backup_id: Some("web".into()),
            backup_time: Some(1),
            ..Default::default()
        };
        let inputs = InputSnapshot {
            archive_instances: vec![ArchiveInstance {
                name: "pbs".into(),
                datastores: vec![Datastore { name: "store1".into(), snapshots: vec![snapshot, broken] }],
                ..Default::default()
            }],
            ..Default::default()
        };

        let root = normalize(&inputs, &NamespaceSelection::parse("root").unwrap(), InstanceFilter::All);
        assert_eq!(root.archive.len(), 1);
        assert_eq!(root.archive[0].namespace, "root");
        assert!(root.archive[0].verified);
        assert_eq!(root.archive[0].archive_instance_index, Some(0));
        assert_eq!(root.dropped.len(), 1);

        let prod = normalize(&inputs, &NamespaceSelection::parse("prod").unwrap(), InstanceFilter::All);
        assert!(prod.archive.is_empty());
    }

    #[test]
    fn test_task_parsing() {
        assert_eq!(parse_worker_id("store1:vm/100"), Some((GuestKind::Vm, 100)));
        assert_eq!(parse_worker_id("store1:ns/prod:ct/101"), Some((GuestKind::Container, 101)));
        assert_eq!(parse_worker_id("store1"), None);

        let mut tasks_by_kind = BTreeMap::new();
        tasks_by_kind.insert(
            TaskKind::Backup,
            vec![TaskRaw {
                worker_id: Some("store1:vm/100".into()),
                starttime: Some(10),
                status: Some("OK".into()),
                ..Default::default()
            }],
        );
        tasks_by_kind.insert(
            TaskKind::Verify,
            vec![TaskRaw { worker_id: Some("store1:vm/100".into()), starttime: Some(11), ..Default::default() }],
        );

        let inputs = InputSnapshot {
            archive_instances: vec![ArchiveInstance { name: "pbs".into(), tasks_by_kind, ..Default::default() }],
            hypervisor: HypervisorBackups {
                tasks: vec![
                    TaskRaw {
                        task_type: Some("vzdump".into()),
                        id: Some(RawId::Text("200".into())),
                        node: Some("pve1".into()),
                        starttime: Some(20),
                        status: Some("ERROR: disk full".into()),
                        ..Default::default()
                    },
                    TaskRaw {
                        task_type: Some("qmstart".into()),
                        id: Some(RawId::Number(200)),
                        starttime: Some(21),
                        ..Default::default()
                    },
                    TaskRaw { task_type: Some("vzdump".into()), id: Some(RawId::Number(201)), ..Default::default() },
                ],
                ..Default::default()
            },
            ..Default::default()
        };

        let out = normalize(&inputs, &NamespaceSelection::all(), InstanceFilter::All);
        assert_eq!(out.tasks.len(), 2);
        assert_eq!(out.tasks[0].guest_kind, Some(GuestKind::Vm));
        assert!(out.tasks[0].is_success());
        assert_eq!(out.tasks[1].guest_kind, None);
        assert!(out.tasks[1].is_failure());
        assert_eq!(out.dropped.len(), 1);
    }
}
