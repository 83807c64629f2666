/**
 * CONFIGURATION KERNEL - Chargement YAML de la config Backwatch
 *
 * Fichier désigné par BACKWATCH_CONFIG (défaut: backwatch.yaml).
 * Fichier absent ou vide → config par défaut. YAML invalide → log + défaut.
 */

use backwatch_core::{ActiveFilters, EngineConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub listen: String,
    /// Fichier JSON écrit par le collaborateur de transport
    pub inputs_path: PathBuf,
    pub refresh_interval_secs: u64,
    pub engine: EngineConfig,
    pub default_filters: ActiveFilters,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".into(),
            inputs_path: PathBuf::from("./data/inputs.json"),
            refresh_interval_secs: 30,
            engine: EngineConfig::default(),
            default_filters: ActiveFilters::default(),
        }
    }
}

impl KernelConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("BACKWATCH_CONFIG").unwrap_or_else(|_| "backwatch.yaml".into());
    load_config_from(Path::new(&path)).await
}

pub async fn load_config_from(path: &Path) -> KernelConfig {
    if !path.exists() {
        info!(path = %path.display(), "no config file, using defaults");
        return KernelConfig::default();
    }
    let txt = match fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config unreadable, using defaults");
            return KernelConfig::default();
        }
    };
    if txt.trim().is_empty() {
        return KernelConfig::default();
    }
    serde_yaml::from_str(&txt).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "invalid config, using defaults");
        KernelConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.yaml")).await;
        assert_eq!(cfg.listen, "0.0.0.0:8080");
        assert_eq!(cfg.refresh_interval_secs, 30);
        assert_eq!(cfg.inputs_path, PathBuf::from("./data/inputs.json"));
    }

    #[tokio::test]
    async fn test_partial_yaml_keeps_other_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "listen: 127.0.0.1:9000\nengine:\n  ok_max_age_days: 2\n  primary_nodes: [pve9]\ndefault_filters:\n  namespace: prod"
        )
        .unwrap();

        let cfg = load_config_from(file.path()).await;
        assert_eq!(cfg.listen, "127.0.0.1:9000");
        assert_eq!(cfg.engine.ok_max_age_days, 2);
        assert_eq!(cfg.engine.stale_max_age_days, 7);
        assert_eq!(cfg.engine.primary_nodes, vec!["pve9".to_string()]);
        assert_eq!(cfg.default_filters.namespace, "prod");
        assert_eq!(cfg.default_filters.archive_instance, "all");
    }

    #[tokio::test]
    async fn test_invalid_yaml_falls_back() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "listen: [unterminated").unwrap();
        let cfg = load_config_from(file.path()).await;
        assert_eq!(cfg.listen, "0.0.0.0:8080");
    }
}
