//! Per-guest record attribution.
//!
//! Owner evidence attributes archive snapshots; node and endpoint fields
//! attribute located records. Path type tags and comments only ever reject
//! a candidate that owner evidence did not confirm.

use serde::Serialize;
use std::collections::HashSet;

use crate::index::BucketSource;
use crate::keys::{path_kind_hint, CorrelationKey, EndpointSuffix, Topology};
use crate::models::{BackupRecord, Guest, GuestIdentity, SourceKind, TaskRecord};

/// Everything attributed to one guest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestMatch {
    pub archive: Vec<BackupRecord>,
    pub hypervisor: Vec<BackupRecord>,
    pub snapshots: Vec<BackupRecord>,
    pub tasks: Vec<TaskRecord>,
    /// Archive attribution relied on a heuristic or the unknown-owner bucket.
    pub archive_ambiguous: bool,
    pub stats: MatchStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStats {
    pub rejected_by_type_tag: usize,
    pub rejected_by_comment: usize,
    pub unknown_owner_included: usize,
}

impl MatchStats {
    pub fn merge(&mut self, other: MatchStats) {
        self.rejected_by_type_tag += other.rejected_by_type_tag;
        self.rejected_by_comment += other.rejected_by_comment;
        self.unknown_owner_included += other.unknown_owner_included;
    }
}

impl GuestMatch {
    pub fn records(&self, kind: SourceKind) -> &[BackupRecord] {
        match kind {
            SourceKind::Archive => &self.archive,
            SourceKind::Hypervisor => &self.hypervisor,
            SourceKind::Snapshot => &self.snapshots,
        }
    }

    pub fn all_records(&self) -> impl Iterator<Item = &BackupRecord> {
        self.archive.iter().chain(&self.hypervisor).chain(&self.snapshots)
    }
}

pub fn match_guest(guest: &Guest, topology: &Topology, buckets: &dyn BucketSource) -> GuestMatch {
    let identity = topology.identity_of(guest);
    let mut out = GuestMatch::default();
    let mut seen = HashSet::new();

    let generic_is_shared = topology.has_primary_sibling(&identity);
    for suffix in topology.guest_suffixes(&identity) {
        let key = CorrelationKey::archive(guest.id, guest.kind, suffix.clone());
        for candidate in buckets.snapshot_bucket(&key).iter() {
            let confirmed = candidate.owner.as_ref().is_some_and(|c| c.is_confirmed());
            if !confirmed && comment_names_sibling(candidate.record.comment.as_deref(), guest, &identity, topology) {
                out.stats.rejected_by_comment += 1;
                continue;
            }
            if !seen.insert(candidate.record.dedup_key().to_string()) {
                continue;
            }
            let heuristic = candidate.owner.as_ref().is_some_and(|c| c.is_heuristic());
            if heuristic || (suffix == EndpointSuffix::GenericPrimary && generic_is_shared) {
                out.archive_ambiguous = true;
            }
            out.archive.push(candidate.record.clone());
        }
    }

    // Unknown owners are only ever attributed to the sole claimant of an id.
    if topology.is_sole_claimant(&identity) {
        let key = CorrelationKey::archive(guest.id, guest.kind, EndpointSuffix::Unknown);
        for candidate in buckets.snapshot_bucket(&key).iter() {
            if seen.insert(candidate.record.dedup_key().to_string()) {
                out.archive_ambiguous = true;
                out.stats.unknown_owner_included += 1;
                out.archive.push(candidate.record.clone());
            }
        }
    }

    for key in located_keys(guest, &identity, topology, true) {
        for candidate in buckets.snapshot_bucket(&key).iter() {
            let record = &candidate.record;
            if !seen.insert(record.dedup_key().to_string()) {
                continue;
            }
            if contradicts_kind(record, guest) {
                out.stats.rejected_by_type_tag += 1;
                continue;
            }
            match record.source {
                SourceKind::Snapshot => out.snapshots.push(record.clone()),
                _ => out.hypervisor.push(record.clone()),
            }
        }
    }

    let mut seen_tasks = HashSet::new();
    for key in located_keys(guest, &identity, topology, false) {
        for task in buckets.task_bucket(&key).iter() {
            if seen_tasks.insert(task.id.clone()) {
                out.tasks.push(task.clone());
            }
        }
    }

    for records in [&mut out.archive, &mut out.hypervisor, &mut out.snapshots] {
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    }
    out.tasks.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
    out
}

/// Located-record buckets this guest may read. The endpoint bucket is
/// only read when no sibling shares `(id, kind)` on the endpoint, the
/// unscoped bucket only by the sole claimant of the id. Tasks also read
/// the kind-less variants.
fn located_keys(guest: &Guest, identity: &GuestIdentity, topology: &Topology, typed_only: bool) -> Vec<CorrelationKey> {
    let mut kinds = vec![Some(guest.kind)];
    if !typed_only {
        kinds.push(None);
    }
    let unique_on_endpoint = topology.is_unique_on_endpoint(identity);
    let sole = topology.is_sole_claimant(identity);

    let mut keys = Vec::new();
    for kind in kinds {
        if let Some(node) = &identity.node {
            keys.push(CorrelationKey::node(guest.id, kind, &identity.endpoint, node));
        }
        if unique_on_endpoint {
            keys.push(CorrelationKey::endpoint(guest.id, kind, &identity.endpoint));
        }
        if sole {
            keys.push(CorrelationKey::unscoped(guest.id, kind));
        }
    }
    keys
}

fn contradicts_kind(record: &BackupRecord, guest: &Guest) -> bool {
    record
        .volume_id
        .as_deref()
        .and_then(path_kind_hint)
        .is_some_and(|hint| hint != guest.kind)
}

/// The comment names another guest sharing this id and not this one.
fn comment_names_sibling(comment: Option<&str>, guest: &Guest, identity: &GuestIdentity, topology: &Topology) -> bool {
    let Some(comment) = comment.map(str::to_lowercase) else {
        return false;
    };
    let own = guest.name.trim().to_lowercase();
    if !own.is_empty() && comment.contains(&own) {
        return false;
    }
    topology.claimants(guest.id).iter().any(|c| {
        let name = c.name.trim().to_lowercase();
        c.identity != *identity && name.len() > 1 && comment.contains(&name)
    })
}
