//! Health classification of one guest from its matched records.

use std::collections::BTreeMap;
use time::{Date, Duration, OffsetDateTime, UtcOffset};

use crate::config::EngineConfig;
use crate::matcher::GuestMatch;
use crate::models::{
    DailyActivity, Guest, GuestBackupStatus, GuestIdentity, HealthState, PerSourceTimes, SourceKind, SourceSet,
    TimelineDay,
};

const DAY_SECS: i64 = 86_400;

/// Age thresholds are inclusive: exactly `ok_max_age_days` old is still ok.
pub fn classify_age(timestamp: i64, now: i64, config: &EngineConfig) -> HealthState {
    let age = now.saturating_sub(timestamp);
    if age <= config.ok_max_age_days * DAY_SECS {
        HealthState::Ok
    } else if age <= config.stale_max_age_days * DAY_SECS {
        HealthState::Stale
    } else {
        HealthState::Old
    }
}

/// Calendar day of a unix timestamp at the given offset.
pub fn local_date(timestamp: i64, offset: UtcOffset) -> Option<Date> {
    OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()
        .map(|t| t.to_offset(offset).date())
}

pub fn evaluate(
    guest: &Guest,
    identity: &GuestIdentity,
    matched: &GuestMatch,
    now: OffsetDateTime,
    config: &EngineConfig,
) -> GuestBackupStatus {
    let now_ts = now.unix_timestamp();
    let offset = config.utc_offset();

    let latest_of = |kind| matched.records(kind).iter().map(|r| r.timestamp).max();
    let per_source = PerSourceTimes {
        archive: latest_of(SourceKind::Archive),
        hypervisor: latest_of(SourceKind::Hypervisor),
        snapshot: latest_of(SourceKind::Snapshot),
    };

    // Ties keep the earlier kind in canonical order.
    let mut most_recent: Option<(SourceKind, i64)> = None;
    for kind in SourceKind::ALL {
        if let Some(ts) = per_source.get(kind) {
            if most_recent.map_or(true, |(_, best)| ts > best) {
                most_recent = Some((kind, ts));
            }
        }
    }
    let latest_backup_time = most_recent.map(|(_, ts)| ts);

    let latest_task = matched.tasks.iter().max_by_key(|t| t.start_time);

    let health_state = match (latest_backup_time, latest_task) {
        (Some(ts), _) => classify_age(ts, now_ts, config),
        (None, Some(task)) if task.is_success() => classify_age(task.start_time, now_ts, config),
        (None, Some(task)) if task.is_failure() => HealthState::Failed,
        _ => HealthState::None,
    };

    let window_start = now_ts - config.failure_window_days * DAY_SECS;
    let recent_failures: Vec<i64> = matched
        .tasks
        .iter()
        .filter(|t| t.is_failure() && t.start_time >= window_start)
        .map(|t| t.start_time)
        .collect();
    let (recent_failure_count, last_failure_time) = if recent_failures.is_empty() && health_state == HealthState::Failed {
        (1, latest_backup_time)
    } else {
        (recent_failures.len(), recent_failures.iter().copied().max())
    };

    let namespace = matched
        .archive
        .iter()
        .max_by_key(|r| r.timestamp)
        .map(|r| r.namespace.clone());

    let archive_backup_count = matched.archive.len();
    let hypervisor_backup_count = matched.hypervisor.len();
    let snapshot_count = matched.snapshots.len();

    GuestBackupStatus {
        identity: identity.to_string(),
        id: guest.id,
        kind: guest.kind,
        name: guest.name.clone(),
        node: guest.node.clone(),
        endpoint_id: identity.endpoint.clone(),
        cluster_display_name: guest.cluster_display_name.clone(),
        latest_backup_time,
        per_source_latest_times: per_source,
        most_recent_source_kind: most_recent.map(|(kind, _)| kind),
        archive_backup_count,
        archive_backup_count_ambiguous: matched.archive_ambiguous,
        hypervisor_backup_count,
        snapshot_count,
        total_backups: archive_backup_count + hypervisor_backup_count + snapshot_count,
        health_state,
        latest_task_time: latest_task.map(|t| t.start_time),
        latest_task_status: latest_task.map(|t| t.status.clone()),
        seven_day_timeline: timeline(matched, now, offset, config.timeline_days),
        recent_failure_count,
        last_failure_time,
        namespace,
        daily_activity: daily_activity(matched, offset),
    }
}

/// Last `days` calendar days ending today, oldest first.
fn timeline(matched: &GuestMatch, now: OffsetDateTime, offset: UtcOffset, days: u32) -> Vec<TimelineDay> {
    let today = now.to_offset(offset).date();
    let mut out: Vec<TimelineDay> = (0..days)
        .rev()
        .filter_map(|back| today.checked_sub(Duration::days(i64::from(back))))
        .map(|date| TimelineDay { date, source_kinds_present: SourceSet::default(), has_failure: false })
        .collect();

    for record in matched.all_records() {
        if let Some(day) = day_slot(&mut out, record.timestamp, offset) {
            day.source_kinds_present.insert(record.source);
        }
    }
    for task in &matched.tasks {
        if let Some(day) = day_slot(&mut out, task.start_time, offset) {
            if task.is_failure() {
                day.has_failure = true;
            } else if task.is_success() {
                day.source_kinds_present.insert(task.source);
            }
        }
    }
    out
}

fn day_slot(days: &mut [TimelineDay], timestamp: i64, offset: UtcOffset) -> Option<&mut TimelineDay> {
    let date = local_date(timestamp, offset)?;
    days.iter_mut().find(|d| d.date == date)
}

fn daily_activity(matched: &GuestMatch, offset: UtcOffset) -> Vec<DailyActivity> {
    let mut by_day: BTreeMap<Date, DailyActivity> = BTreeMap::new();
    for record in matched.all_records() {
        let Some(date) = local_date(record.timestamp, offset) else {
            continue;
        };
        let day = by_day.entry(date).or_insert_with(|| DailyActivity {
            date,
            source_kinds_present: SourceSet::default(),
            record_count: 0,
            archive_count: 0,
            hypervisor_count: 0,
            snapshot_count: 0,
        });
        day.source_kinds_present.insert(record.source);
        day.record_count += 1;
        match record.source {
            SourceKind::Archive => day.archive_count += 1,
            SourceKind::Hypervisor => day.hypervisor_count += 1,
            SourceKind::Snapshot => day.snapshot_count += 1,
        }
    }
    by_day.into_values().collect()
}
