/*!
# Backwatch Core - guest backup correlation engine

Builds one consolidated backup-health record per managed guest from two
loosely-structured sources:
- an archive service (datastores, namespaces, owner-tagged snapshots)
- per-cluster hypervisor storage backups, guest snapshots and tasks

Guest ids collide across clusters and nodes, so records are attributed
through composite correlation keys and owner-token evidence instead of the
bare id. Results are cached by content fingerprint, with TTL caches for
per-guest and per-bucket work.
*/

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod filters;
pub mod health;
pub mod index;
pub mod keys;
pub mod matcher;
pub mod models;
pub mod namespace;
pub mod raw;
pub mod summary;

pub use config::EngineConfig;
pub use engine::{CorrelationEngine, Diagnostics, EngineStats, Evaluation};
pub use error::{CoreError, FilterError, RecordError};
pub use filters::ActiveFilters;
pub use models::{BackupRecord, Guest, GuestBackupStatus, GuestKind, HealthState, SourceKind, TaskRecord, TaskStatus};
pub use raw::InputSnapshot;
pub use summary::DateScopedSummary;
