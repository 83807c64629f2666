/**
 * HEALTH KERNEL - État de fonctionnement du service Backwatch
 *
 * Suit l'uptime, les rafraîchissements du fichier d'entrées et leurs erreurs.
 * Exposé via GET /system/health avec les stats du moteur de corrélation.
 */

use backwatch_core::{CorrelationEngine, EngineStats};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Serialize)]
pub struct InputCounts {
    pub guests: usize,
    pub archive_instances: usize,
    pub archive_snapshots: usize,
    pub storage_backups: usize,
    pub guest_snapshots: usize,
    pub hypervisor_tasks: usize,
}

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub memory_usage_mb: f32,
    pub refreshes: u64,
    pub refresh_errors: u64,
    pub last_refresh: Option<String>, // format RFC3339
    pub last_error: Option<String>,
    pub inputs: Option<InputCounts>,
    pub engine: EngineStats,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    refreshes: Arc<AtomicU64>,
    refresh_errors: Arc<AtomicU64>,
    last_refresh: Arc<Mutex<Option<OffsetDateTime>>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            refreshes: Arc::new(AtomicU64::new(0)),
            refresh_errors: Arc::new(AtomicU64::new(0)),
            last_refresh: Arc::new(Mutex::new(None)),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn mark_refreshed(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        *self.last_refresh.lock() = Some(OffsetDateTime::now_utc());
        *self.last_error.lock() = None;
    }

    pub fn mark_failed(&self, error: String) {
        self.refresh_errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(error);
    }

    pub fn get_health(&self, engine: &CorrelationEngine) -> KernelHealth {
        let inputs = engine.inputs().map(|i| InputCounts {
            guests: i.guests.as_ref().map_or(0, Vec::len),
            archive_instances: i.archive_instances.len(),
            archive_snapshots: i
                .archive_instances
                .iter()
                .flat_map(|inst| inst.datastores.iter())
                .map(|ds| ds.snapshots.len())
                .sum(),
            storage_backups: i.hypervisor.storage_backups.len(),
            guest_snapshots: i.hypervisor.guest_snapshots.len(),
            hypervisor_tasks: i.hypervisor.tasks.len(),
        });

        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            memory_usage_mb: get_memory_usage_mb(),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
            last_refresh: self.last_refresh.lock().map(|t| t.format(&Rfc3339).unwrap_or_default()),
            last_error: self.last_error.lock().clone(),
            inputs,
            engine: engine.stats(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return (kb as f32) / 1024.0; // KB -> MB
            }
        }
    }

    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use backwatch_core::EngineConfig;

    #[test]
    fn test_refresh_bookkeeping() {
        let engine = CorrelationEngine::new(EngineConfig::default()).unwrap();
        let tracker = HealthTracker::new();

        let health = tracker.get_health(&engine);
        assert!(health.last_refresh.is_none());
        assert!(health.inputs.is_none());

        tracker.mark_failed("boom".into());
        tracker.mark_refreshed();
        let health = tracker.get_health(&engine);
        assert_eq!(health.refreshes, 1);
        assert_eq!(health.refresh_errors, 1);
        assert!(health.last_refresh.is_some());
        assert!(health.last_error.is_none());
    }
}
