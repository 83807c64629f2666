//! Error taxonomy for the correlation engine.
//!
//! Only [`CoreError`] ever reaches a caller. Record-level and filter-level
//! problems are recovered where they happen and end up in the evaluation's
//! diagnostics or in a log line.

use serde::Serialize;

/// Errors surfaced by [`crate::engine::CorrelationEngine`].
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// No guest inventory has been supplied yet, or it is empty.
    #[error("no guest inventory available yet")]
    NoData,
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

/// Which collaborator a raw record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordSource {
    ArchiveSnapshot,
    ArchiveTask,
    StorageBackup,
    GuestSnapshot,
    HypervisorTask,
}

/// A single raw record that could not be turned into a usable record.
/// The record is dropped; evaluation of every other record continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RecordError {
    #[error("{origin:?} record {record} is missing required field `{field}`")]
    MissingField {
        origin: RecordSource,
        record: String,
        field: &'static str,
    },
    #[error("{origin:?} record {record} has unparseable `{field}`: {value}")]
    Unparseable {
        origin: RecordSource,
        record: String,
        field: &'static str,
        value: String,
    },
}

/// Malformed user filter input. Callers fall back to a permissive default.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("invalid namespace filter expression `{0}`")]
    InvalidNamespaceExpression(String),
    #[error("invalid archive instance filter `{0}`")]
    InvalidInstanceFilter(String),
    #[error("invalid date `{0}`, expected YYYY-MM-DD")]
    InvalidDate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_error_messages() {
        let err = RecordError::MissingField {
            origin: RecordSource::StorageBackup,
            record: "local:backup/vzdump-qemu-100.vma".into(),
            field: "ctime",
        };
        assert!(err.to_string().contains("missing required field `ctime`"));

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "missing-field");
        assert_eq!(json["origin"], "storage-backup");
    }
}
