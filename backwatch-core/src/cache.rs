//! Two-tier caching: content fingerprints for the coarse result, and TTL
//! maps for fine-grained per-guest / per-bucket entries.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;
use xxhash_rust::xxh3::Xxh3;

use crate::filters::ActiveFilters;
use crate::models::TaskStatus;
use crate::namespace::{InstanceFilter, NamespaceSelection};
use crate::raw::{InputSnapshot, TaskRaw};

struct Entry<V> {
    value: V,
    created_at: Instant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub name: &'static str,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// String-keyed map whose entries expire `ttl` after insertion.
///
/// Reads use `try_lock`: a contended read counts as a miss and the caller
/// recomputes, it never waits on a writer or on the sweeper.
pub struct TtlCache<V> {
    name: &'static str,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let Some(mut entries) = self.entries.try_lock() else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        let fresh = match entries.get(key) {
            Some(entry) if now.saturating_duration_since(entry.created_at) <= self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };
        let counter = if fresh.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        fresh
    }

    pub fn insert(&self, key: String, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn insert_at(&self, key: String, value: V, now: Instant) {
        self.entries.lock().insert(key, Entry { value, created_at: now });
    }

    pub fn get_or_insert_with(&self, key: &str, compute: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = compute();
        self.insert(key.to_string(), value.clone());
        value
    }

    /// Removes expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| now.saturating_duration_since(e.created_at) <= self.ttl);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(cache = self.name, removed, remaining = entries.len(), "cache sweep");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name,
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

fn write_str(hasher: &mut Xxh3, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn write_u64(hasher: &mut Xxh3, n: u64) {
    hasher.update(&n.to_le_bytes());
}

#[derive(Default)]
struct TaskTally {
    total: u64,
    finished: u64,
    failed: u64,
    max_start: Option<i64>,
}

impl TaskTally {
    fn add(&mut self, task: &TaskRaw) {
        self.total += 1;
        match TaskStatus::from_raw(task.status.as_deref()) {
            TaskStatus::Running => {}
            TaskStatus::Ok => self.finished += 1,
            TaskStatus::Failed(_) => {
                self.finished += 1;
                self.failed += 1;
            }
        }
        self.max_start = self.max_start.max(task.starttime);
    }
}

/// Content hash of the inputs as seen through the namespace/instance
/// selection. Counts, first/last guest samples and the newest timestamp;
/// cheap enough to compute on every `recompute` call.
pub fn data_fingerprint(inputs: &InputSnapshot, selection: &NamespaceSelection, instance: InstanceFilter) -> u64 {
    let mut hasher = Xxh3::new();

    let guests = inputs.guests.as_deref().unwrap_or(&[]);
    write_u64(&mut hasher, guests.len() as u64);
    for guest in [guests.first(), guests.last()].into_iter().flatten() {
        write_u64(&mut hasher, u64::from(guest.id));
        write_str(&mut hasher, guest.node.as_deref().unwrap_or(""));
        write_str(&mut hasher, guest.cluster_endpoint_id.as_deref().unwrap_or(""));
    }

    let mut max_ts: Option<i64> = None;
    let mut tasks = TaskTally::default();

    write_u64(&mut hasher, inputs.archive_instances.len() as u64);
    for archive in &inputs.archive_instances {
        write_str(&mut hasher, &archive.name);
        write_u64(&mut hasher, archive.datastores.len() as u64);
        for datastore in &archive.datastores {
            write_str(&mut hasher, &datastore.name);
            write_u64(&mut hasher, datastore.snapshots.len() as u64);
            for snap in &datastore.snapshots {
                max_ts = max_ts.max(snap.backup_time);
            }
        }
        for (kind, list) in &archive.tasks_by_kind {
            write_str(&mut hasher, &format!("{kind:?}"));
            write_u64(&mut hasher, list.len() as u64);
            list.iter().for_each(|t| tasks.add(t));
        }
    }

    let hv = &inputs.hypervisor;
    write_u64(&mut hasher, hv.storage_backups.len() as u64);
    write_u64(&mut hasher, hv.guest_snapshots.len() as u64);
    write_u64(&mut hasher, hv.tasks.len() as u64);
    for backup in &hv.storage_backups {
        max_ts = max_ts.max(backup.ctime);
    }
    for snap in &hv.guest_snapshots {
        max_ts = max_ts.max(snap.snaptime);
    }
    hv.tasks.iter().for_each(|t| tasks.add(t));

    write_u64(&mut hasher, tasks.total);
    write_u64(&mut hasher, tasks.finished);
    write_u64(&mut hasher, tasks.failed);
    write_str(&mut hasher, &format!("{max_ts:?}/{:?}", tasks.max_start));

    match selection.target_instance_index {
        Some(idx) => write_u64(&mut hasher, idx as u64),
        None => write_u64(&mut hasher, u64::MAX),
    }
    write_str(&mut hasher, selection.target_namespace.as_deref().unwrap_or("*"));
    match instance {
        InstanceFilter::All => write_u64(&mut hasher, u64::MAX),
        InstanceFilter::Only(idx) => write_u64(&mut hasher, idx as u64),
    }

    hasher.digest()
}

/// Key of the coarse result: data fingerprint plus every table filter and
/// the selected date.
pub fn coarse_key(fingerprint: u64, filters: &ActiveFilters) -> u64 {
    let mut hasher = Xxh3::new();
    write_u64(&mut hasher, fingerprint);
    let encoded = serde_json::to_vec(filters).unwrap_or_default();
    hasher.update(&encoded);
    hasher.digest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Guest, GuestKind};
    use crate::raw::{HypervisorBackups, StorageBackupRaw};

    #[test]
    fn test_entries_expire_after_ttl() {
        let cache = TtlCache::new("test", Duration::from_secs(30));
        let t0 = Instant::now();
        cache.insert_at("a".into(), 1, t0);

        assert_eq!(cache.get_at("a", t0 + Duration::from_secs(30)), Some(1));
        assert_eq!(cache.get_at("a", t0 + Duration::from_secs(31)), None);
        // lazily evicted on read
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache = TtlCache::new("test", Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert_at("old".into(), "x", t0);
        cache.insert_at("new".into(), "y", t0 + Duration::from_secs(8));

        assert_eq!(cache.sweep_at(t0 + Duration::from_secs(12)), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at("new", t0 + Duration::from_secs(12)), Some("y"));
    }

    #[test]
    fn test_contended_read_is_a_miss() {
        let cache = TtlCache::new("test", Duration::from_secs(10));
        cache.insert("k".into(), 7);
        let guard = cache.entries.lock();
        assert_eq!(cache.get("k"), None);
        drop(guard);
        assert_eq!(cache.get("k"), Some(7));
    }

    #[test]
    fn test_get_or_insert_with_computes_once() {
        let cache = TtlCache::new("test", Duration::from_secs(10));
        let mut calls = 0;
        for _ in 0..3 {
            let v = cache.get_or_insert_with("k", || {
                calls += 1;
                42
            });
            assert_eq!(v, 42);
        }
        assert_eq!(calls, 1);
    }

    fn inputs(ctime: i64) -> InputSnapshot {
        InputSnapshot {
            guests: Some(vec![Guest {
                id: 100,
                kind: GuestKind::Vm,
                node: Some("pve1".into()),
                cluster_endpoint_id: None,
                cluster_display_name: None,
                name: "web".into(),
            }]),
            hypervisor: HypervisorBackups {
                storage_backups: vec![StorageBackupRaw {
                    volid: Some("local:backup/vzdump-qemu-100.vma".into()),
                    vmid: Some(100),
                    ctime: Some(ctime),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_fingerprint_tracks_content_and_selection() {
        let all = NamespaceSelection::all();
        let a = data_fingerprint(&inputs(10), &all, InstanceFilter::All);
        assert_eq!(a, data_fingerprint(&inputs(10), &all, InstanceFilter::All));
        assert_ne!(a, data_fingerprint(&inputs(11), &all, InstanceFilter::All));
        assert_ne!(a, data_fingerprint(&inputs(10), &all, InstanceFilter::Only(0)));

        let prod = NamespaceSelection::parse("prod").unwrap();
        assert_ne!(a, data_fingerprint(&inputs(10), &prod, InstanceFilter::All));
    }

    #[test]
    fn test_coarse_key_changes_with_any_filter() {
        let base = ActiveFilters::default();
        let key = coarse_key(1, &base);
        assert_eq!(key, coarse_key(1, &base.clone()));
        assert_ne!(key, coarse_key(2, &base));

        let search = ActiveFilters { search_text: "web".into(), ..base.clone() };
        assert_ne!(key, coarse_key(1, &search));

        let dated = ActiveFilters { selected_date: Some("2024-03-10".into()), ..base };
        assert_ne!(key, coarse_key(1, &dated));
    }
}
