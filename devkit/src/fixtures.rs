/*!
Constructeurs de fixtures pour les tests de corrélation

Produit des entrées brutes au format des collaborateurs:
- invités (VM / conteneurs) avec nœud et endpoint
- snapshots d'archive avec owner, namespace et commentaire
- sauvegardes de stockage hyperviseur, snapshots d'invité, tâches
*/

use backwatch_core::models::{Guest, GuestKind};
use backwatch_core::raw::{
    ArchiveInstance, Datastore, GuestSnapshotRaw, InputSnapshot, RawId, SnapshotRaw, StorageBackupRaw, TaskKind,
    TaskRaw,
};
use serde_json::Value;

/// Builder d'invité, VM sur l'endpoint primaire par défaut
pub struct GuestBuilder {
    inner: Guest,
}

pub fn guest(id: u32, node: &str) -> GuestBuilder {
    GuestBuilder {
        inner: Guest {
            id,
            kind: GuestKind::Vm,
            node: Some(node.to_string()),
            cluster_endpoint_id: Some("main".to_string()),
            cluster_display_name: Some("main".to_string()),
            name: format!("{node}-{id}"),
        },
    }
}

impl GuestBuilder {
    pub fn container(mut self) -> Self {
        self.inner.kind = GuestKind::Container;
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.inner.name = name.to_string();
        self
    }

    /// Place l'invité sur un autre cluster
    pub fn on_endpoint(mut self, endpoint_id: &str, display_name: &str) -> Self {
        self.inner.cluster_endpoint_id = Some(endpoint_id.to_string());
        self.inner.cluster_display_name = Some(display_name.to_string());
        self
    }

    pub fn build(self) -> Guest {
        self.inner
    }
}

pub struct SnapshotBuilder {
    inner: SnapshotRaw,
}

/// Snapshot d'archive VM, namespace racine, sans owner
pub fn archive_snapshot(id: u32, backup_time: i64) -> SnapshotBuilder {
    SnapshotBuilder {
        inner: SnapshotRaw {
            backup_type: Some("vm".into()),
            backup_id: Some(id.to_string()),
            backup_time: Some(backup_time),
            ..Default::default()
        },
    }
}

impl SnapshotBuilder {
    pub fn owner(mut self, owner: &str) -> Self {
        self.inner.owner = Some(owner.to_string());
        self
    }

    pub fn namespace(mut self, ns: &str) -> Self {
        self.inner.namespace = Some(ns.to_string());
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.inner.comment = Some(comment.to_string());
        self
    }

    pub fn container(mut self) -> Self {
        self.inner.backup_type = Some("ct".into());
        self
    }

    pub fn build(self) -> SnapshotRaw {
        self.inner
    }
}

pub struct StorageBuilder {
    inner: StorageBackupRaw,
}

pub fn storage_backup(volid: &str, vmid: u32, node: &str, ctime: i64) -> StorageBuilder {
    StorageBuilder {
        inner: StorageBackupRaw {
            volid: Some(volid.to_string()),
            vmid: Some(vmid),
            ctime: Some(ctime),
            node: Some(node.to_string()),
            content: Some("backup".into()),
            ..Default::default()
        },
    }
}

impl StorageBuilder {
    pub fn without_ctime(mut self) -> Self {
        self.inner.ctime = None;
        self
    }

    pub fn endpoint(mut self, endpoint: &str) -> Self {
        self.inner.endpoint = Some(endpoint.to_string());
        self
    }

    pub fn archive_backed(mut self) -> Self {
        self.inner.archive_backed = true;
        self
    }

    pub fn build(self) -> StorageBackupRaw {
        self.inner
    }
}

pub fn guest_snapshot(vmid: u32, node: &str, name: &str, snaptime: i64) -> GuestSnapshotRaw {
    GuestSnapshotRaw {
        vmid: Some(vmid),
        guest_type: Some("qemu".into()),
        node: Some(node.to_string()),
        endpoint: None,
        name: Some(name.to_string()),
        snaptime: Some(snaptime),
        description: None,
    }
}

/// Tâche vzdump hyperviseur. `status = None` → tâche en cours
pub fn hypervisor_task(vmid: u32, node: &str, starttime: i64, status: Option<&str>) -> TaskRaw {
    TaskRaw {
        upid: Some(format!("UPID:{node}:{vmid}:{starttime}:vzdump")),
        task_type: Some("vzdump".into()),
        id: Some(RawId::Number(u64::from(vmid))),
        node: Some(node.to_string()),
        starttime: Some(starttime),
        status: status.map(str::to_string),
        ..Default::default()
    }
}

pub fn archive_task(worker_id: &str, starttime: i64, status: Option<&str>) -> TaskRaw {
    TaskRaw {
        upid: Some(format!("UPID:archive:{worker_id}:{starttime}")),
        task_type: Some("backup".into()),
        worker_id: Some(worker_id.to_string()),
        starttime: Some(starttime),
        status: status.map(str::to_string),
        ..Default::default()
    }
}

/// Assemble un `InputSnapshot` complet
#[derive(Default)]
pub struct InputBuilder {
    inner: InputSnapshot,
}

impl InputBuilder {
    pub fn new() -> Self {
        Self { inner: InputSnapshot { guests: Some(Vec::new()), ..Default::default() } }
    }

    /// Inventaire jamais reçu
    pub fn without_inventory(mut self) -> Self {
        self.inner.guests = None;
        self
    }

    pub fn guest(mut self, guest: GuestBuilder) -> Self {
        self.inner.guests.get_or_insert_with(Vec::new).push(guest.build());
        self
    }

    pub fn archive_instance(mut self, name: &str) -> Self {
        self.inner.archive_instances.push(ArchiveInstance { name: name.to_string(), ..Default::default() });
        self
    }

    /// Ajoute un snapshot au datastore (créé au besoin) de l'instance `idx`
    pub fn snapshot(mut self, idx: usize, datastore: &str, snapshot: SnapshotBuilder) -> Self {
        while self.inner.archive_instances.len() <= idx {
            let name = format!("pbs-{}", self.inner.archive_instances.len());
            self = self.archive_instance(&name);
        }
        let instance = &mut self.inner.archive_instances[idx];
        match instance.datastores.iter_mut().find(|d| d.name == datastore) {
            Some(ds) => ds.snapshots.push(snapshot.build()),
            None => instance.datastores.push(Datastore {
                name: datastore.to_string(),
                snapshots: vec![snapshot.build()],
            }),
        }
        self
    }

    pub fn archive_task(mut self, idx: usize, task: TaskRaw) -> Self {
        while self.inner.archive_instances.len() <= idx {
            let name = format!("pbs-{}", self.inner.archive_instances.len());
            self = self.archive_instance(&name);
        }
        self.inner.archive_instances[idx]
            .tasks_by_kind
            .entry(TaskKind::Backup)
            .or_default()
            .push(task);
        self
    }

    pub fn storage_backup(mut self, backup: StorageBuilder) -> Self {
        self.inner.hypervisor.storage_backups.push(backup.build());
        self
    }

    pub fn guest_snapshot(mut self, snapshot: GuestSnapshotRaw) -> Self {
        self.inner.hypervisor.guest_snapshots.push(snapshot);
        self
    }

    pub fn task(mut self, task: TaskRaw) -> Self {
        self.inner.hypervisor.tasks.push(task);
        self
    }

    pub fn build(self) -> InputSnapshot {
        self.inner
    }

    /// Forme JSON telle qu'écrite par le collaborateur de transport
    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.inner).unwrap_or(Value::Null)
    }
}
