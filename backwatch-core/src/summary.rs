//! Date-scoped drill-down over evaluated statuses.

use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use time::Date;

use crate::models::{DailyActivity, GuestBackupStatus, SourceKind};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// One guest's per-day buckets in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestDays {
    pub identity: String,
    pub id: u32,
    pub name: String,
    pub location: String,
    pub days: Vec<DailyActivity>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PerSourceGuestCount {
    pub archive: usize,
    pub hypervisor: usize,
    pub snapshot: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryAggregate {
    /// Unique guest identities (endpoint, node, kind, id) with at least one
    /// record in scope. Same id on same-named nodes of two clusters counts twice.
    pub total_guests: usize,
    pub total_backups: usize,
    pub per_source_kind_guest_count: PerSourceGuestCount,
    pub unique_date_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateScopedSummary {
    /// `None` means every date, grouped per guest.
    #[serde(with = "iso_date::option")]
    pub date: Option<Date>,
    pub guests: Vec<GuestDays>,
    pub aggregate: SummaryAggregate,
}

pub fn summarize(statuses: &[GuestBackupStatus], date: Option<Date>) -> DateScopedSummary {
    let mut guests = Vec::new();
    let mut seen_guests: HashSet<&str> = HashSet::new();
    let mut per_kind: [HashSet<&str>; 3] = Default::default();
    let mut dates = BTreeSet::new();
    let mut total_backups = 0;

    for status in statuses {
        let days: Vec<DailyActivity> = status
            .daily_activity
            .iter()
            .filter(|d| date.map_or(true, |target| d.date == target))
            .cloned()
            .collect();
        if days.is_empty() {
            continue;
        }

        let identity = status.identity.as_str();
        seen_guests.insert(identity);
        for (slot, kind) in per_kind.iter_mut().zip(SourceKind::ALL) {
            if days.iter().any(|d| d.count_for(kind) > 0) {
                slot.insert(identity);
            }
        }
        for day in &days {
            total_backups += day.record_count;
            dates.insert(day.date);
        }

        guests.push(GuestDays {
            identity: status.identity.clone(),
            id: status.id,
            name: status.name.clone(),
            location: status.location().to_string(),
            days,
        });
    }

    let [archive, hypervisor, snapshot] = per_kind;
    DateScopedSummary {
        date,
        guests,
        aggregate: SummaryAggregate {
            total_guests: seen_guests.len(),
            total_backups,
            per_source_kind_guest_count: PerSourceGuestCount {
                archive: archive.len(),
                hypervisor: hypervisor.len(),
                snapshot: snapshot.len(),
            },
            unique_date_count: dates.len(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GuestKind, HealthState, PerSourceTimes, SourceSet};
    use time::macros::date;

    fn day(date: Date, archive: usize, hypervisor: usize) -> DailyActivity {
        let mut kinds = SourceSet::default();
        if archive > 0 {
            kinds.insert(SourceKind::Archive);
        }
        if hypervisor > 0 {
            kinds.insert(SourceKind::Hypervisor);
        }
        DailyActivity {
            date,
            source_kinds_present: kinds,
            record_count: archive + hypervisor,
            archive_count: archive,
            hypervisor_count: hypervisor,
            snapshot_count: 0,
        }
    }

    fn status(id: u32, node: &str, days: Vec<DailyActivity>) -> GuestBackupStatus {
        status_on("main", id, node, days)
    }

    fn status_on(endpoint: &str, id: u32, node: &str, days: Vec<DailyActivity>) -> GuestBackupStatus {
        GuestBackupStatus {
            identity: format!("{endpoint}/{node}/vm/{id}"),
            id,
            kind: GuestKind::Vm,
            name: format!("guest-{id}"),
            node: Some(node.into()),
            endpoint_id: endpoint.into(),
            cluster_display_name: None,
            latest_backup_time: None,
            per_source_latest_times: PerSourceTimes::default(),
            most_recent_source_kind: None,
            archive_backup_count: 0,
            archive_backup_count_ambiguous: false,
            hypervisor_backup_count: 0,
            snapshot_count: 0,
            total_backups: 0,
            health_state: HealthState::None,
            latest_task_time: None,
            latest_task_status: None,
            seven_day_timeline: Vec::new(),
            recent_failure_count: 0,
            last_failure_time: None,
            namespace: None,
            daily_activity: days,
        }
    }

    #[test]
    fn test_single_date_scope() {
        let statuses = vec![
            status(100, "pve1", vec![day(date!(2024 - 03 - 09), 3, 0), day(date!(2024 - 03 - 10), 1, 1)]),
            status(101, "pve1", vec![day(date!(2024 - 03 - 08), 0, 2)]),
        ];
        let summary = summarize(&statuses, Some(date!(2024 - 03 - 09)));
        assert_eq!(summary.guests.len(), 1);
        assert_eq!(summary.aggregate.total_guests, 1);
        assert_eq!(summary.aggregate.total_backups, 3);
        assert_eq!(summary.aggregate.per_source_kind_guest_count.archive, 1);
        assert_eq!(summary.aggregate.per_source_kind_guest_count.hypervisor, 0);
        assert_eq!(summary.aggregate.unique_date_count, 1);
    }

    #[test]
    fn test_all_dates_counts_unique_guests() {
        let statuses = vec![
            status(100, "pve1", vec![day(date!(2024 - 03 - 09), 3, 0), day(date!(2024 - 03 - 10), 1, 1)]),
            status(100, "pve2", vec![day(date!(2024 - 03 - 10), 0, 1)]),
            status(102, "pve1", Vec::new()),
        ];
        let summary = summarize(&statuses, None);
        let agg = summary.aggregate;
        assert_eq!(agg.total_guests, 2);
        assert_eq!(agg.total_backups, 6);
        assert_eq!(agg.per_source_kind_guest_count.archive, 1);
        assert_eq!(agg.per_source_kind_guest_count.hypervisor, 2);
        assert_eq!(agg.unique_date_count, 2);
    }

    #[test]
    fn test_same_node_name_on_two_clusters_counts_twice() {
        let statuses = vec![
            status_on("main", 100, "pve1", vec![day(date!(2024 - 03 - 09), 1, 0)]),
            status_on("edge", 100, "pve1", vec![day(date!(2024 - 03 - 09), 0, 1)]),
        ];
        let agg = summarize(&statuses, Some(date!(2024 - 03 - 09))).aggregate;
        assert_eq!(agg.total_guests, 2);
        assert_eq!(agg.per_source_kind_guest_count.archive, 1);
        assert_eq!(agg.per_source_kind_guest_count.hypervisor, 1);
    }

    #[test]
    fn test_summary_serializes_date() {
        let summary = summarize(&[], Some(date!(2024 - 03 - 09)));
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["date"], "2024-03-09");
        assert_eq!(json["aggregate"]["totalGuests"], 0);
        assert!(serde_json::to_value(summarize(&[], None)).unwrap()["date"].is_null());
    }
}
