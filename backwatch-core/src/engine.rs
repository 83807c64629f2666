//! `CorrelationEngine`: owns the inputs, the caches and the last evaluation.
//!
//! One instance per monitored environment, shared behind an `Arc`. Each
//! filter set keeps its own published [`Evaluation`] for the current data, so
//! table and calendar reads with different filters do not evict each other.
//! `recompute` builds a new one only when its content key is unknown.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{coarse_key, data_fingerprint, CacheStats, TtlCache};
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::filters::{self, ActiveFilters};
use crate::health;
use crate::index::{BucketSource, Candidate, IndexStats, RecordIndex};
use crate::keys::{CorrelationKey, Topology};
use crate::matcher::{match_guest, MatchStats};
use crate::models::{GuestBackupStatus, TaskRecord};
use crate::raw::{normalize, InputSnapshot};
use crate::summary::{summarize, DateScopedSummary};

/// Record-level problems and attribution decisions of one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub dropped_records: usize,
    pub dropped: Vec<String>,
    /// Guests whose archive count is flagged ambiguous.
    pub ambiguous_archive_guests: usize,
    /// Unknown-owner archive records included for a sole claimant.
    pub ambiguous_archive_records: usize,
    pub rejected_matches: usize,
    pub unknown_owner_records: usize,
    pub heuristic_owner_records: usize,
    pub index: IndexStats,
    pub invalid_date: Option<String>,
}

impl Diagnostics {
    fn absorb(&mut self, entry: &GuestEvaluation) {
        if entry.status.archive_backup_count_ambiguous {
            self.ambiguous_archive_guests += 1;
        }
        self.ambiguous_archive_records += entry.stats.unknown_owner_included;
        self.rejected_matches += entry.stats.rejected_by_comment + entry.stats.rejected_by_type_tag;
    }
}

/// One published result of the pipeline.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub fingerprint: String,
    pub cache_key: String,
    pub generated_at: OffsetDateTime,
    /// Every guest, inventory order.
    pub statuses: Vec<GuestBackupStatus>,
    /// Filtered and sorted for the table.
    pub rows: Vec<GuestBackupStatus>,
    pub summary: DateScopedSummary,
    pub diagnostics: Diagnostics,
    pub filters: ActiveFilters,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub recomputations: u64,
    pub coarse_hits: u64,
    pub guest_evaluations: u64,
    pub last_sweep_removed: u64,
    pub has_result: bool,
    pub caches: Vec<CacheStats>,
}

#[derive(Debug)]
struct GuestEvaluation {
    status: GuestBackupStatus,
    stats: MatchStats,
}

/// Published results kept per filter set, all for the same data.
const MAX_VIEWS: usize = 8;

struct CoarseEntry {
    key: u64,
    fingerprint: u64,
    evaluation: Arc<Evaluation>,
}

pub struct CorrelationEngine {
    config: EngineConfig,
    inputs: RwLock<Option<Arc<InputSnapshot>>>,
    filters: RwLock<ActiveFilters>,
    /// Most recently used first.
    coarse: RwLock<Vec<CoarseEntry>>,
    guest_statuses: TtlCache<Arc<GuestEvaluation>>,
    snapshot_buckets: TtlCache<Arc<[Candidate]>>,
    task_buckets: TtlCache<Arc<[TaskRecord]>>,
    recomputations: AtomicU64,
    coarse_hits: AtomicU64,
    guest_evaluations: AtomicU64,
    last_sweep_removed: AtomicU64,
}

/// Bucket lookups through the engine's TTL caches, falling back to the
/// freshly built index.
struct CachedBuckets<'a> {
    engine: &'a CorrelationEngine,
    index: &'a RecordIndex,
    prefix: String,
}

impl BucketSource for CachedBuckets<'_> {
    fn snapshot_bucket(&self, key: &CorrelationKey) -> Arc<[Candidate]> {
        self.engine
            .snapshot_buckets
            .get_or_insert_with(&format!("{}|{key}", self.prefix), || self.index.snapshot_bucket(key))
    }

    fn task_bucket(&self, key: &CorrelationKey) -> Arc<[TaskRecord]> {
        self.engine
            .task_buckets
            .get_or_insert_with(&format!("{}|{key}", self.prefix), || self.index.task_bucket(key))
    }
}

impl CorrelationEngine {
    pub fn new(config: EngineConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let ttl = config.cache_ttl();
        Ok(Self {
            config,
            inputs: RwLock::new(None),
            filters: RwLock::new(ActiveFilters::default()),
            coarse: RwLock::new(Vec::new()),
            guest_statuses: TtlCache::new("guest-statuses", ttl),
            snapshot_buckets: TtlCache::new("snapshot-buckets", ttl),
            task_buckets: TtlCache::new("task-buckets", ttl),
            recomputations: AtomicU64::new(0),
            coarse_hits: AtomicU64::new(0),
            guest_evaluations: AtomicU64::new(0),
            last_sweep_removed: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replaces the input snapshot. Takes effect at the next `recompute`.
    pub fn ingest(&self, inputs: InputSnapshot) {
        *self.inputs.write() = Some(Arc::new(inputs));
    }

    pub fn inputs(&self) -> Option<Arc<InputSnapshot>> {
        self.inputs.read().clone()
    }

    pub fn set_filters(&self, filters: ActiveFilters) {
        *self.filters.write() = filters;
    }

    pub fn filters(&self) -> ActiveFilters {
        self.filters.read().clone()
    }

    pub fn recompute(&self, force: bool) -> Result<Arc<Evaluation>, CoreError> {
        self.recompute_at(OffsetDateTime::now_utc(), force)
    }

    pub fn recompute_at(&self, now: OffsetDateTime, force: bool) -> Result<Arc<Evaluation>, CoreError> {
        let filters = self.filters();
        self.evaluate(&filters, now, force)
    }

    /// Evaluates with ad-hoc filters without changing the engine's own.
    pub fn view(&self, filters: &ActiveFilters) -> Result<Arc<Evaluation>, CoreError> {
        self.view_at(filters, OffsetDateTime::now_utc())
    }

    pub fn view_at(&self, filters: &ActiveFilters, now: OffsetDateTime) -> Result<Arc<Evaluation>, CoreError> {
        self.evaluate(filters, now, false)
    }

    /// The most recently produced or reused evaluation.
    pub fn latest(&self) -> Option<Arc<Evaluation>> {
        self.coarse.read().first().map(|c| Arc::clone(&c.evaluation))
    }

    /// Drops the coarse result and every fine-grained entry.
    pub fn invalidate(&self) {
        self.coarse.write().clear();
        self.guest_statuses.clear();
        self.snapshot_buckets.clear();
        self.task_buckets.clear();
    }

    fn evaluate(&self, filters: &ActiveFilters, now: OffsetDateTime, force: bool) -> Result<Arc<Evaluation>, CoreError> {
        let inputs = self
            .inputs()
            .filter(|i| i.guests.as_ref().is_some_and(|g| !g.is_empty()))
            .ok_or(CoreError::NoData)?;

        let selection = filters.selection();
        let instance = filters.instance_filter();
        let fingerprint = data_fingerprint(&inputs, &selection, instance);
        let key = coarse_key(fingerprint, filters);

        if force {
            self.invalidate();
        } else if let Some(hit) = self.reuse(key) {
            self.coarse_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        let pass = self.recomputations.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(pass, fingerprint = format!("{fingerprint:016x}"), force, "recomputing backup statuses");

        let guests = inputs.guests.as_deref().unwrap_or_default();
        let mut records = normalize(&inputs, &selection, instance);
        let dropped = std::mem::take(&mut records.dropped);
        let topology = Topology::build(guests, &self.config);
        let index = RecordIndex::build(&records, &topology);
        let index_stats = index.stats();

        let mut diagnostics = Diagnostics {
            dropped_records: dropped.len(),
            dropped: dropped.iter().map(ToString::to_string).collect(),
            unknown_owner_records: index_stats.unknown_owner_records,
            heuristic_owner_records: index_stats.heuristic_owner_records,
            index: index_stats,
            ..Diagnostics::default()
        };

        let prefix = format!("{fingerprint:016x}");
        let buckets = CachedBuckets { engine: self, index: &index, prefix: prefix.clone() };
        let statuses: Vec<GuestBackupStatus> = guests
            .iter()
            .map(|guest| {
                let identity = topology.identity_of(guest);
                let entry = self.guest_statuses.get_or_insert_with(
                    &format!("{prefix}|{identity}|{}", guest.name),
                    || {
                        self.guest_evaluations.fetch_add(1, Ordering::Relaxed);
                        let matched = match_guest(guest, &topology, &buckets);
                        Arc::new(GuestEvaluation {
                            status: health::evaluate(guest, &identity, &matched, now, &self.config),
                            stats: matched.stats,
                        })
                    },
                );
                diagnostics.absorb(&entry);
                entry.status.clone()
            })
            .collect();

        let date = match filters.date() {
            Ok(date) => date,
            Err(e) => {
                warn!(error = %e, "ignoring selected date");
                diagnostics.invalid_date = filters.selected_date.clone();
                None
            }
        };

        if diagnostics.rejected_matches > 0 || diagnostics.ambiguous_archive_guests > 0 {
            warn!(
                rejected = diagnostics.rejected_matches,
                ambiguous_guests = diagnostics.ambiguous_archive_guests,
                unknown_owner = diagnostics.unknown_owner_records,
                "archive attribution needed tie-breaks"
            );
        }

        let evaluation = Arc::new(Evaluation {
            fingerprint: prefix,
            cache_key: format!("{key:016x}"),
            generated_at: now,
            rows: filters::apply(&statuses, filters),
            summary: summarize(&statuses, date),
            statuses,
            diagnostics,
            filters: filters.clone(),
        });

        info!(
            guests = evaluation.statuses.len(),
            rows = evaluation.rows.len(),
            records = records.record_count(),
            dropped = evaluation.diagnostics.dropped_records,
            "backup statuses evaluated"
        );

        self.publish(CoarseEntry { key, fingerprint, evaluation: Arc::clone(&evaluation) });
        Ok(evaluation)
    }

    fn reuse(&self, key: u64) -> Option<Arc<Evaluation>> {
        let mut coarse = self.coarse.write();
        let pos = coarse.iter().position(|c| c.key == key)?;
        let entry = coarse.remove(pos);
        let evaluation = Arc::clone(&entry.evaluation);
        coarse.insert(0, entry);
        Some(evaluation)
    }

    /// Results computed from other data are dropped; the rest stay bounded.
    fn publish(&self, entry: CoarseEntry) {
        let mut coarse = self.coarse.write();
        coarse.retain(|c| c.fingerprint == entry.fingerprint && c.key != entry.key);
        coarse.insert(0, entry);
        coarse.truncate(MAX_VIEWS);
    }

    /// Evicts expired fine-grained entries.
    pub fn sweep(&self) -> usize {
        let removed = self.guest_statuses.sweep() + self.snapshot_buckets.sweep() + self.task_buckets.sweep();
        self.last_sweep_removed.store(removed as u64, Ordering::Relaxed);
        debug!(removed, "fine-grained caches swept");
        removed
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            recomputations: self.recomputations.load(Ordering::Relaxed),
            coarse_hits: self.coarse_hits.load(Ordering::Relaxed),
            guest_evaluations: self.guest_evaluations.load(Ordering::Relaxed),
            last_sweep_removed: self.last_sweep_removed.load(Ordering::Relaxed),
            has_result: !self.coarse.read().is_empty(),
            caches: vec![
                self.guest_statuses.stats(),
                self.snapshot_buckets.stats(),
                self.task_buckets.stats(),
            ],
        }
    }

    /// Periodic sweep of the fine-grained caches on the tokio runtime.
    pub fn spawn_cache_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = self.config.sweep_interval();
        info!(every_secs = period.as_secs(), "starting cache sweeper");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // first tick fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                engine.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Guest, GuestKind};
    use crate::raw::{ArchiveInstance, Datastore, SnapshotRaw};
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-03-10 12:00 UTC);

    fn engine() -> CorrelationEngine {
        CorrelationEngine::new(EngineConfig { utc_offset_minutes: Some(0), ..EngineConfig::default() }).unwrap()
    }

    fn inputs() -> InputSnapshot {
        let guest = |node: &str, name: &str| Guest {
            id: 100,
            kind: GuestKind::Vm,
            node: Some(node.into()),
            cluster_endpoint_id: Some("main".into()),
            cluster_display_name: None,
            name: name.into(),
        };
        InputSnapshot {
            guests: Some(vec![guest("nodeA", "web"), guest("nodeB", "db")]),
            archive_instances: vec![ArchiveInstance {
                name: "pbs".into(),
                datastores: vec![Datastore {
                    name: "store".into(),
                    snapshots: vec![SnapshotRaw {
                        backup_type: Some("vm".into()),
                        backup_id: Some("100".into()),
                        backup_time: Some(NOW.unix_timestamp() - 3600),
                        owner: Some("u!nodea".into()),
                        ..Default::default()
                    }],
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_no_inventory_is_no_data() {
        let engine = engine();
        assert!(matches!(engine.recompute_at(NOW, false), Err(CoreError::NoData)));

        engine.ingest(InputSnapshot { guests: Some(Vec::new()), ..Default::default() });
        assert!(matches!(engine.recompute_at(NOW, false), Err(CoreError::NoData)));
        assert!(engine.latest().is_none());
    }

    #[test]
    fn test_coarse_cache_reuses_result_until_filters_change() {
        let engine = engine();
        engine.ingest(inputs());

        let first = engine.recompute_at(NOW, false).unwrap();
        let second = engine.recompute_at(NOW, false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.stats().recomputations, 1);
        assert_eq!(engine.stats().coarse_hits, 1);

        engine.set_filters(ActiveFilters { search_text: "web".into(), ..Default::default() });
        let filtered = engine.recompute_at(NOW, false).unwrap();
        assert_eq!(engine.stats().recomputations, 2);
        assert_eq!(filtered.rows.len(), 1);
        // per-guest results came from the fine caches
        assert_eq!(engine.stats().guest_evaluations, 2);
    }

    #[test]
    fn test_force_clears_every_tier() {
        let engine = engine();
        engine.ingest(inputs());
        engine.recompute_at(NOW, false).unwrap();
        engine.recompute_at(NOW, true).unwrap();

        let stats = engine.stats();
        assert_eq!(stats.recomputations, 2);
        assert_eq!(stats.guest_evaluations, 4);
    }

    #[test]
    fn test_statuses_attribute_by_owner_node() {
        let engine = engine();
        engine.ingest(inputs());
        let eval = engine.recompute_at(NOW, false).unwrap();

        assert_eq!(eval.statuses[0].archive_backup_count, 1);
        assert_eq!(eval.statuses[1].archive_backup_count, 0);
        assert_eq!(eval.statuses[0].namespace.as_deref(), Some("root"));
        assert_eq!(eval.diagnostics.rejected_matches, 0);
    }

    #[test]
    fn test_invalid_date_is_recorded_not_fatal() {
        let engine = engine();
        engine.ingest(inputs());
        engine.set_filters(ActiveFilters { selected_date: Some("yesterday".into()), ..Default::default() });
        let eval = engine.recompute_at(NOW, false).unwrap();
        assert_eq!(eval.diagnostics.invalid_date.as_deref(), Some("yesterday"));
        assert_eq!(eval.summary.date, None);
    }

    #[test]
    fn test_view_does_not_touch_engine_filters() {
        let engine = engine();
        engine.ingest(inputs());
        let view = engine
            .view_at(&ActiveFilters { search_text: "db".into(), ..Default::default() }, NOW)
            .unwrap();
        assert_eq!(view.rows.len(), 1);
        assert_eq!(engine.filters(), ActiveFilters::default());
    }

    #[test]
    fn test_interleaved_views_share_cached_results() {
        let engine = engine();
        engine.ingest(inputs());
        let search = ActiveFilters { search_text: "web".into(), ..Default::default() };

        for _ in 0..3 {
            assert_eq!(engine.view_at(&search, NOW).unwrap().rows.len(), 1);
            assert_eq!(engine.recompute_at(NOW, false).unwrap().rows.len(), 2);
        }
        let stats = engine.stats();
        assert_eq!(stats.recomputations, 2);
        assert_eq!(stats.coarse_hits, 4);

        // new data drops the results of the old data
        let mut changed = inputs();
        changed.guests.get_or_insert_with(Vec::new).truncate(1);
        engine.ingest(changed);
        assert_eq!(engine.view_at(&search, NOW).unwrap().statuses.len(), 1);
        assert_eq!(engine.stats().recomputations, 3);
        assert_eq!(engine.latest().unwrap().filters, search);
    }

    #[tokio::test]
    async fn test_sweeper_evicts_expired_entries() {
        let engine = Arc::new(
            CorrelationEngine::new(EngineConfig {
                cache_ttl_secs: 1,
                sweep_interval_secs: 1,
                utc_offset_minutes: Some(0),
                ..EngineConfig::default()
            })
            .unwrap(),
        );
        engine.ingest(inputs());
        engine.recompute_at(NOW, false).unwrap();
        assert!(engine.stats().caches.iter().any(|c| c.entries > 0));

        // TTLs run on the wall clock; let them lapse before the sweeper ticks
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let handle = engine.spawn_cache_sweeper();
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        handle.abort();

        assert!(engine.stats().caches.iter().all(|c| c.entries == 0));
        assert!(engine.stats().last_sweep_removed > 0);
    }
}
