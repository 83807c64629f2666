/*!
Test Harness pour le moteur de corrélation

Facilite l'écriture de tests avec:
- Horloge d'évaluation figée (dates et seuils reproductibles)
- Logging tracing redirigé vers la sortie de test
- Assertions sur les statuts d'invités produits
*/

use anyhow::{Context, Result};
use backwatch_core::{CorrelationEngine, EngineConfig, EngineStats, Evaluation, GuestBackupStatus, InputSnapshot};
use std::sync::Arc;
use time::macros::datetime;
use time::OffsetDateTime;

pub const DAY: i64 = 86_400;

/// Instant d'évaluation par défaut des tests
pub const DEFAULT_NOW: OffsetDateTime = datetime!(2024-03-10 12:00 UTC);

/// Initialise tracing une seule fois, sortie capturée par le runner de test
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init()
        .ok();
}

/// Harness de test complet autour d'un `CorrelationEngine`
pub struct TestHarness {
    pub engine: Arc<CorrelationEngine>,
    pub now: OffsetDateTime,
}

impl TestHarness {
    /// Moteur par défaut, jours calendaires en UTC
    pub fn new() -> Self {
        Self::with_config(EngineConfig { utc_offset_minutes: Some(0), ..EngineConfig::default() })
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let engine = CorrelationEngine::new(config).unwrap_or_else(|e| panic!("invalid test config: {e}"));
        Self { engine: Arc::new(engine), now: DEFAULT_NOW }
    }

    pub fn at(mut self, now: OffsetDateTime) -> Self {
        self.now = now;
        self
    }

    pub fn now_ts(&self) -> i64 {
        self.now.unix_timestamp()
    }

    pub fn days_ago(&self, days: i64) -> i64 {
        self.now_ts() - days * DAY
    }

    pub fn load(&self, inputs: InputSnapshot) -> &Self {
        self.engine.ingest(inputs);
        self
    }

    pub fn evaluate(&self) -> Result<Arc<Evaluation>> {
        self.engine
            .recompute_at(self.now, false)
            .context("evaluation failed")
    }

    pub fn force(&self) -> Result<Arc<Evaluation>> {
        self.engine
            .recompute_at(self.now, true)
            .context("forced evaluation failed")
    }

    /// Statut de l'invité `(id, node)` dans la dernière évaluation
    pub fn status_of(&self, id: u32, node: &str) -> Result<GuestBackupStatus> {
        let eval = self.engine.latest().context("nothing evaluated yet")?;
        eval.statuses
            .iter()
            .find(|s| s.id == id && s.node.as_deref() == Some(node))
            .cloned()
            .with_context(|| format!("no status for guest {id} on {node}"))
    }

    /// Assert sur le nombre de sauvegardes d'archive attribuées
    pub fn assert_archive_count(&self, id: u32, node: &str, expected: usize) -> Result<()> {
        let status = self.status_of(id, node)?;
        if status.archive_backup_count != expected {
            anyhow::bail!(
                "guest {} on {}: expected {} archive backups, got {}",
                id,
                node,
                expected,
                status.archive_backup_count
            );
        }
        Ok(())
    }

    pub fn get_stats(&self) -> EngineStats {
        self.engine.stats()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
