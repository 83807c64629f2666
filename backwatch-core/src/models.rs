//! Data model shared by every stage of the pipeline.
//!
//! Input entities ([`Guest`], [`BackupRecord`], [`TaskRecord`]) are immutable
//! once built. The output entity, [`GuestBackupStatus`], is created fresh on
//! every evaluation and always replaced wholesale.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::Date;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// Virtual machine or container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GuestKind {
    #[serde(rename = "vm", alias = "qemu")]
    Vm,
    #[serde(rename = "container", alias = "lxc", alias = "ct")]
    Container,
}

impl GuestKind {
    /// Parses the type tags used by both collaborators (`vm`, `qemu`, `ct`, `lxc`...).
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "vm" | "qemu" => Some(GuestKind::Vm),
            "ct" | "lxc" | "container" => Some(GuestKind::Container),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GuestKind::Vm => "vm",
            GuestKind::Container => "ct",
        }
    }
}

/// Where a backup record or activity came from.
///
/// `Snapshot` is a guest-level point-in-time snapshot taken by the hypervisor;
/// it is not a backup file but is reported alongside backups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Archive,
    Hypervisor,
    Snapshot,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Archive, SourceKind::Hypervisor, SourceKind::Snapshot];

    fn bit(self) -> u8 {
        match self {
            SourceKind::Archive => 1,
            SourceKind::Hypervisor => 2,
            SourceKind::Snapshot => 4,
        }
    }
}

/// Set of [`SourceKind`]s, serialized as a list in canonical order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "Vec<SourceKind>")]
pub struct SourceSet(u8);

impl SourceSet {
    pub fn insert(&mut self, kind: SourceKind) {
        self.0 |= kind.bit();
    }

    pub fn contains(&self, kind: SourceKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: SourceSet) -> SourceSet {
        SourceSet(self.0 | other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = SourceKind> + '_ {
        SourceKind::ALL.into_iter().filter(|k| self.contains(*k))
    }
}

impl From<SourceSet> for Vec<SourceKind> {
    fn from(set: SourceSet) -> Self {
        set.iter().collect()
    }
}

impl FromIterator<SourceKind> for SourceSet {
    fn from_iter<I: IntoIterator<Item = SourceKind>>(iter: I) -> Self {
        let mut set = SourceSet::default();
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

/// A managed guest as supplied by the inventory collaborator.
///
/// `id` alone is not an identity: the same numeric id is routinely reused on
/// other clusters and standalone nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guest {
    pub id: u32,
    #[serde(rename = "type", alias = "kind")]
    pub kind: GuestKind,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub cluster_endpoint_id: Option<String>,
    #[serde(default)]
    pub cluster_display_name: Option<String>,
    #[serde(default)]
    pub name: String,
}

/// Effective identity of a guest: numeric id scoped by endpoint and node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GuestIdentity {
    pub endpoint: String,
    pub node: Option<String>,
    pub kind: GuestKind,
    pub id: u32,
}

impl fmt::Display for GuestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.endpoint,
            self.node.as_deref().unwrap_or("-"),
            self.kind.as_str(),
            self.id
        )
    }
}

/// Unified view over archive snapshots, hypervisor storage backups and guest
/// snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    /// Stable identity of the record within its source.
    pub id: String,
    pub source: SourceKind,
    pub guest_id: u32,
    pub guest_kind: GuestKind,
    pub timestamp: i64,
    /// Canonical namespace (`root` for the root namespace). Archive only.
    pub namespace: String,
    pub datastore_or_storage: String,
    /// Raw owner field (`user@realm!token`). Archive only.
    pub owner: Option<String>,
    pub comment: Option<String>,
    /// Hypervisor volume id, used for de-duplication.
    pub volume_id: Option<String>,
    pub archive_instance_index: Option<usize>,
    pub node: Option<String>,
    pub endpoint_id: Option<String>,
    pub size: Option<u64>,
    pub protected: bool,
    pub verified: bool,
}

impl BackupRecord {
    /// Key used to collapse the same physical backup seen through two buckets.
    pub fn dedup_key(&self) -> &str {
        self.volume_id.as_deref().unwrap_or(&self.id)
    }
}

/// Outcome of a backup task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum TaskStatus {
    Ok,
    Failed(String),
    /// No final status yet: neither success nor failure.
    Running,
}

impl TaskStatus {
    pub fn from_raw(status: Option<&str>) -> Self {
        match status.map(str::trim) {
            None | Some("") => TaskStatus::Running,
            Some(s) if s.eq_ignore_ascii_case("running") => TaskStatus::Running,
            Some("OK") => TaskStatus::Ok,
            Some(other) => TaskStatus::Failed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub source: SourceKind,
    pub guest_id: u32,
    /// Hypervisor tasks do not always say whether the guest is a VM or a container.
    pub guest_kind: Option<GuestKind>,
    pub guest_node: Option<String>,
    pub guest_endpoint_id: Option<String>,
    pub start_time: i64,
    pub status: TaskStatus,
    pub archive_instance_index: Option<usize>,
}

impl TaskRecord {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, TaskStatus::Failed(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, TaskStatus::Ok)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Ok,
    Stale,
    Old,
    Failed,
    None,
}

impl HealthState {
    /// Severity order used for sorting: healthy first.
    pub fn rank(&self) -> u8 {
        match self {
            HealthState::Ok => 0,
            HealthState::Stale => 1,
            HealthState::Old => 2,
            HealthState::Failed => 3,
            HealthState::None => 4,
        }
    }
}

/// One calendar day of the sparkline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineDay {
    #[serde(with = "iso_date")]
    pub date: Date,
    pub source_kinds_present: SourceSet,
    pub has_failure: bool,
}

/// Matched records of one guest on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyActivity {
    #[serde(with = "iso_date")]
    pub date: Date,
    pub source_kinds_present: SourceSet,
    pub record_count: usize,
    pub archive_count: usize,
    pub hypervisor_count: usize,
    pub snapshot_count: usize,
}

impl DailyActivity {
    pub fn count_for(&self, kind: SourceKind) -> usize {
        match kind {
            SourceKind::Archive => self.archive_count,
            SourceKind::Hypervisor => self.hypervisor_count,
            SourceKind::Snapshot => self.snapshot_count,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PerSourceTimes {
    pub archive: Option<i64>,
    pub hypervisor: Option<i64>,
    pub snapshot: Option<i64>,
}

impl PerSourceTimes {
    pub fn get(&self, kind: SourceKind) -> Option<i64> {
        match kind {
            SourceKind::Archive => self.archive,
            SourceKind::Hypervisor => self.hypervisor,
            SourceKind::Snapshot => self.snapshot,
        }
    }
}

/// Consolidated backup health of one guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestBackupStatus {
    pub identity: String,
    pub id: u32,
    pub kind: GuestKind,
    pub name: String,
    pub node: Option<String>,
    pub endpoint_id: String,
    pub cluster_display_name: Option<String>,
    pub latest_backup_time: Option<i64>,
    pub per_source_latest_times: PerSourceTimes,
    pub most_recent_source_kind: Option<SourceKind>,
    pub archive_backup_count: usize,
    pub archive_backup_count_ambiguous: bool,
    pub hypervisor_backup_count: usize,
    pub snapshot_count: usize,
    pub total_backups: usize,
    pub health_state: HealthState,
    pub latest_task_time: Option<i64>,
    pub latest_task_status: Option<TaskStatus>,
    pub seven_day_timeline: Vec<TimelineDay>,
    pub recent_failure_count: usize,
    pub last_failure_time: Option<i64>,
    pub namespace: Option<String>,
    pub daily_activity: Vec<DailyActivity>,
}

impl GuestBackupStatus {
    /// Node name, or endpoint id for guests without a node. Used as the
    /// second half of the `(id, node-or-endpoint)` uniqueness pair.
    pub fn location(&self) -> &str {
        self.node.as_deref().unwrap_or(&self.endpoint_id)
    }

    pub fn count_for(&self, kind: SourceKind) -> usize {
        match kind {
            SourceKind::Archive => self.archive_backup_count,
            SourceKind::Hypervisor => self.hypervisor_backup_count,
            SourceKind::Snapshot => self.snapshot_count,
        }
    }
}
