/**
 * SOURCE D'ENTRÉES - Lecture du snapshot JSON écrit par le collaborateur
 *
 * Le transport (API hyperviseur / service d'archive) est hors du kernel :
 * il dépose un `InputSnapshot` JSON sur disque. Le kernel le relit
 * périodiquement et ne réingère que si le fichier a changé.
 */

use crate::health::HealthTracker;
use crate::state::{new_state, Shared};
use anyhow::{Context, Result};
use backwatch_core::{CorrelationEngine, InputSnapshot};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct InputSource {
    path: PathBuf,
    last_modified: Shared<Option<SystemTime>>,
}

impl InputSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), last_modified: new_state(None) }
    }

    pub async fn load(&self) -> Result<InputSnapshot> {
        let txt = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading inputs from {}", self.path.display()))?;
        serde_json::from_str(&txt).with_context(|| format!("parsing inputs from {}", self.path.display()))
    }

    /// Réingère si le fichier a changé (ou si `force`).
    /// Retourne `true` quand de nouvelles entrées ont été chargées.
    pub async fn reload(&self, engine: &CorrelationEngine, force: bool) -> Result<bool> {
        let modified = fs::metadata(&self.path)
            .await
            .and_then(|m| m.modified())
            .with_context(|| format!("stat {}", self.path.display()))?;

        if !force && *self.last_modified.lock() == Some(modified) {
            debug!(path = %self.path.display(), "inputs unchanged");
            return Ok(false);
        }

        let inputs = self.load().await?;
        engine.ingest(inputs);
        *self.last_modified.lock() = Some(modified);
        info!(path = %self.path.display(), "inputs reloaded");
        Ok(true)
    }

    /// Un tour de la boucle : reload puis recalcul. Le recalcul est forcé
    /// quand le fichier a changé pour que les âges repartent de maintenant.
    pub async fn refresh(&self, engine: &CorrelationEngine, force: bool) -> Result<bool> {
        let reloaded = self.reload(engine, force).await?;
        if let Err(e) = engine.recompute(reloaded) {
            warn!(error = %e, "recompute skipped");
        }
        Ok(reloaded)
    }
}

/// Boucle de rafraîchissement périodique
pub fn spawn_refresh_loop(
    source: InputSource,
    engine: Arc<CorrelationEngine>,
    health: HealthTracker,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match source.refresh(&engine, false).await {
                Ok(_) => health.mark_refreshed(),
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "input refresh failed");
                    health.mark_failed(format!("{e:#}"));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use backwatch_core::EngineConfig;
    use backwatch_devkit::{archive_snapshot, guest, InputBuilder};

    fn write_inputs(path: &std::path::Path, builder: &InputBuilder) {
        std::fs::write(path, serde_json::to_vec(&builder.to_json()).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_refresh_reloads_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inputs.json");
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        write_inputs(
            &path,
            &InputBuilder::new()
                .guest(guest(100, "pve1"))
                .snapshot(0, "store", archive_snapshot(100, now - 3600).owner("u!pve1")),
        );

        let engine = CorrelationEngine::new(EngineConfig::default()).unwrap();
        let source = InputSource::new(&path);

        assert!(source.refresh(&engine, false).await.unwrap());
        assert!(!source.refresh(&engine, false).await.unwrap());
        assert!(source.refresh(&engine, true).await.unwrap());

        let eval = engine.latest().unwrap();
        assert_eq!(eval.statuses.len(), 1);
        assert_eq!(eval.statuses[0].archive_backup_count, 1);
        assert_eq!(engine.stats().recomputations, 2);
    }

    #[tokio::test]
    async fn test_missing_or_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CorrelationEngine::new(EngineConfig::default()).unwrap();

        let missing = InputSource::new(dir.path().join("nope.json"));
        assert!(missing.refresh(&engine, false).await.is_err());

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let invalid = InputSource::new(&path);
        let err = invalid.refresh(&engine, false).await.unwrap_err();
        assert!(format!("{err:#}").contains("parsing inputs"));
        assert!(engine.inputs().is_none());
    }
}
