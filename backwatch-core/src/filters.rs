//! Table filters and sorting over evaluated guest statuses.
//!
//! The selected date is carried here so it takes part in the cache key, but
//! it never hides a row: it only scopes the date summary.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use time::Date;

use crate::error::FilterError;
use crate::models::{GuestBackupStatus, GuestKind, HealthState, SourceKind};
use crate::namespace::{InstanceFilter, NamespaceSelection};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GuestKindFilter {
    #[default]
    All,
    Vm,
    Container,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HealthBucket {
    #[default]
    All,
    Ok,
    Stale,
    /// `old` or `failed`.
    Warning,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackupKindFilter {
    #[default]
    All,
    Archive,
    Hypervisor,
    Snapshot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    Name,
    Id,
    Node,
    Kind,
    LastBackup,
    Health,
    ArchiveCount,
    HypervisorCount,
    SnapshotCount,
    TotalBackups,
    Failures,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActiveFilters {
    /// `all`, a namespace name, or `<instanceIndex>:<namespace>`.
    pub namespace: String,
    /// `all` or an archive instance index.
    pub archive_instance: String,
    pub guest_kind: GuestKindFilter,
    pub health_bucket: HealthBucket,
    pub backup_kind_present: BackupKindFilter,
    pub failures_only: bool,
    pub search_text: String,
    pub sort_field: SortField,
    pub sort_direction: SortDirection,
    /// `YYYY-MM-DD`.
    pub selected_date: Option<String>,
}

impl Default for ActiveFilters {
    fn default() -> Self {
        Self {
            namespace: "all".into(),
            archive_instance: "all".into(),
            guest_kind: GuestKindFilter::All,
            health_bucket: HealthBucket::All,
            backup_kind_present: BackupKindFilter::All,
            failures_only: false,
            search_text: String::new(),
            sort_field: SortField::Name,
            sort_direction: SortDirection::Asc,
            selected_date: None,
        }
    }
}

impl ActiveFilters {
    pub fn selection(&self) -> NamespaceSelection {
        NamespaceSelection::from_expression(&self.namespace)
    }

    pub fn instance_filter(&self) -> InstanceFilter {
        InstanceFilter::from_expression(&self.archive_instance)
    }

    pub fn date(&self) -> Result<Option<Date>, FilterError> {
        self.selected_date
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(parse_date)
            .transpose()
    }
}

pub fn parse_date(raw: &str) -> Result<Date, FilterError> {
    let format = time::macros::format_description!("[year]-[month]-[day]");
    Date::parse(raw.trim(), format).map_err(|_| FilterError::InvalidDate(raw.to_string()))
}

fn search_terms(text: &str) -> Vec<String> {
    text.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Whether a status passes every table predicate.
pub fn matches(status: &GuestBackupStatus, filters: &ActiveFilters, selection: &NamespaceSelection) -> bool {
    // Archive records are already narrowed to the selection, so any count
    // means the guest has a snapshot in scope.
    if !selection.is_all() && status.archive_backup_count == 0 {
        return false;
    }

    if filters.failures_only && status.recent_failure_count == 0 {
        return false;
    }

    let bucket_ok = match filters.health_bucket {
        HealthBucket::All => true,
        HealthBucket::Ok => status.health_state == HealthState::Ok,
        HealthBucket::Stale => status.health_state == HealthState::Stale,
        HealthBucket::Warning => matches!(status.health_state, HealthState::Old | HealthState::Failed),
        HealthBucket::None => status.health_state == HealthState::None,
    };
    if !bucket_ok {
        return false;
    }

    let kind_ok = match filters.guest_kind {
        GuestKindFilter::All => true,
        GuestKindFilter::Vm => status.kind == GuestKind::Vm,
        GuestKindFilter::Container => status.kind == GuestKind::Container,
    };
    if !kind_ok {
        return false;
    }

    let present_ok = match filters.backup_kind_present {
        BackupKindFilter::All => true,
        BackupKindFilter::Archive => status.count_for(SourceKind::Archive) > 0,
        BackupKindFilter::Hypervisor => status.count_for(SourceKind::Hypervisor) > 0,
        BackupKindFilter::Snapshot => status.count_for(SourceKind::Snapshot) > 0,
    };
    if !present_ok {
        return false;
    }

    let terms = search_terms(&filters.search_text);
    if terms.is_empty() {
        return true;
    }
    let name = status.name.to_lowercase();
    let node = status.node.as_deref().unwrap_or("").to_lowercase();
    let id = status.id.to_string();
    terms
        .iter()
        .any(|t| name.contains(t.as_str()) || node.contains(t.as_str()) || id.contains(t.as_str()))
}

fn compare(a: &GuestBackupStatus, b: &GuestBackupStatus, field: SortField) -> Ordering {
    match field {
        SortField::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortField::Id => a.id.cmp(&b.id),
        SortField::Node => a.location().to_lowercase().cmp(&b.location().to_lowercase()),
        SortField::Kind => a.kind.cmp(&b.kind),
        SortField::LastBackup => a.latest_backup_time.cmp(&b.latest_backup_time),
        SortField::Health => a.health_state.rank().cmp(&b.health_state.rank()),
        SortField::ArchiveCount => a.archive_backup_count.cmp(&b.archive_backup_count),
        SortField::HypervisorCount => a.hypervisor_backup_count.cmp(&b.hypervisor_backup_count),
        SortField::SnapshotCount => a.snapshot_count.cmp(&b.snapshot_count),
        SortField::TotalBackups => a.total_backups.cmp(&b.total_backups),
        SortField::Failures => a.recent_failure_count.cmp(&b.recent_failure_count),
    }
}

/// Stable sort; equal rows keep their input order in both directions.
pub fn sort(rows: &mut [GuestBackupStatus], field: SortField, direction: SortDirection) {
    rows.sort_by(|a, b| {
        let ord = compare(a, b, field);
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

/// Filters then sorts. The input slice is left untouched.
pub fn apply(statuses: &[GuestBackupStatus], filters: &ActiveFilters) -> Vec<GuestBackupStatus> {
    let selection = filters.selection();
    let mut rows: Vec<GuestBackupStatus> = statuses
        .iter()
        .filter(|s| matches(s, filters, &selection))
        .cloned()
        .collect();
    sort(&mut rows, filters.sort_field, filters.sort_direction);
    rows
}
