//! Engine configuration. Every field has a default so a partial YAML block
//! (or none at all) yields a working engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::UtcOffset;

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fine-grained cache entries older than this are ignored and evicted.
    pub cache_ttl_secs: u64,
    /// Interval of the background sweep over the fine-grained caches.
    pub sweep_interval_secs: u64,
    /// Newest backup at most this old → `ok`.
    pub ok_max_age_days: i64,
    /// Newest backup at most this old → `stale`, older → `old`.
    pub stale_max_age_days: i64,
    /// Window for `recentFailureCount`.
    pub failure_window_days: i64,
    /// Number of calendar days in the activity timeline.
    pub timeline_days: u32,
    /// Offset used for calendar-day boundaries. Absent: process local
    /// offset, UTC when that cannot be determined.
    pub utc_offset_minutes: Option<i32>,
    /// Endpoint id of the primary cluster. Absent: first endpoint id found
    /// in the guest inventory.
    pub primary_endpoint: Option<String>,
    /// Node names of the primary cluster that may not host any guest yet.
    pub primary_nodes: Vec<String>,
    /// Owner tokens that mark "primary cluster, node unknown".
    pub generic_owner_markers: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            sweep_interval_secs: 300,
            ok_max_age_days: 3,
            stale_max_age_days: 7,
            failure_window_days: 7,
            timeline_days: 7,
            utc_offset_minutes: None,
            primary_endpoint: None,
            primary_nodes: Vec::new(),
            generic_owner_markers: vec!["primary".into(), "backup".into()],
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.ok_max_age_days < 0 || self.ok_max_age_days > self.stale_max_age_days {
            return Err(CoreError::InvalidConfig(format!(
                "ok_max_age_days ({}) must be between 0 and stale_max_age_days ({})",
                self.ok_max_age_days, self.stale_max_age_days
            )));
        }
        if self.failure_window_days <= 0 || self.timeline_days == 0 {
            return Err(CoreError::InvalidConfig(
                "failure_window_days and timeline_days must be positive".into(),
            ));
        }
        if self.cache_ttl_secs == 0 {
            return Err(CoreError::InvalidConfig("cache_ttl_secs must be positive".into()));
        }
        if let Some(minutes) = self.utc_offset_minutes {
            if UtcOffset::from_whole_seconds(minutes.saturating_mul(60)).is_err() {
                return Err(CoreError::InvalidConfig(format!("utc_offset_minutes out of range: {minutes}")));
            }
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Offset for local-midnight day boundaries.
    pub fn utc_offset(&self) -> UtcOffset {
        match self.utc_offset_minutes {
            Some(minutes) => UtcOffset::from_whole_seconds(minutes.saturating_mul(60)).unwrap_or(UtcOffset::UTC),
            None => UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(30));
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: EngineConfig = serde_json::from_value(serde_json::json!({
            "cache_ttl_secs": 10,
            "primary_nodes": ["pve1"]
        }))
        .unwrap();
        assert_eq!(cfg.cache_ttl_secs, 10);
        assert_eq!(cfg.stale_max_age_days, 7);
        assert_eq!(cfg.generic_owner_markers, vec!["primary", "backup"]);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let cfg = EngineConfig { ok_max_age_days: 8, ..EngineConfig::default() };
        assert!(matches!(cfg.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_explicit_offset() {
        let cfg = EngineConfig { utc_offset_minutes: Some(120), ..EngineConfig::default() };
        assert_eq!(cfg.utc_offset().whole_hours(), 2);
    }
}
