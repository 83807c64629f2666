//! Namespace/instance selection.
//!
//! Every namespace comparison in the crate goes through
//! [`normalize_namespace`], so `""`, `/`, an absent value and `root` always
//! denote the same root namespace.

use serde::Serialize;
use tracing::warn;

use crate::error::FilterError;
use crate::raw::ArchiveInstance;

pub const ROOT_NAMESPACE: &str = "root";

/// Canonical form of a namespace path.
pub fn normalize_namespace(ns: Option<&str>) -> String {
    let trimmed = ns.map(|s| s.trim().trim_matches('/')).unwrap_or("");
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(ROOT_NAMESPACE) {
        ROOT_NAMESPACE.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn namespaces_equal(a: Option<&str>, b: Option<&str>) -> bool {
    normalize_namespace(a) == normalize_namespace(b)
}

fn is_valid_namespace(ns: &str) -> bool {
    ns.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '.'))
}

/// Resolved form of the namespace filter expression.
/// `None` fields mean "every instance" / "every namespace".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelection {
    pub target_instance_index: Option<usize>,
    pub target_namespace: Option<String>,
}

impl NamespaceSelection {
    pub fn all() -> Self {
        Self::default()
    }

    /// Parses `all`, a bare namespace name, or `<instanceIndex>:<namespace>`.
    pub fn parse(expr: &str) -> Result<Self, FilterError> {
        let expr = expr.trim();
        if expr.is_empty() || expr.eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }

        let (instance, ns) = match expr.split_once(':') {
            Some((idx, ns)) => {
                let idx = idx
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| FilterError::InvalidNamespaceExpression(expr.to_string()))?;
                (Some(idx), ns.trim())
            }
            None => (None, expr),
        };

        if ns.contains(':') || !is_valid_namespace(ns) {
            return Err(FilterError::InvalidNamespaceExpression(expr.to_string()));
        }

        let target_namespace = if instance.is_some() && ns.eq_ignore_ascii_case("all") {
            None
        } else {
            Some(normalize_namespace(Some(ns)))
        };

        Ok(Self { target_instance_index: instance, target_namespace })
    }

    /// Like [`parse`](Self::parse) but malformed input falls back to `all`.
    pub fn from_expression(expr: &str) -> Self {
        Self::parse(expr).unwrap_or_else(|e| {
            warn!(error = %e, "namespace filter rejected, falling back to all");
            Self::all()
        })
    }

    pub fn is_all(&self) -> bool {
        self.target_instance_index.is_none() && self.target_namespace.is_none()
    }

    pub fn matches_namespace(&self, ns: Option<&str>) -> bool {
        match &self.target_namespace {
            None => true,
            Some(target) => *target == normalize_namespace(ns),
        }
    }

    pub fn includes_instance(&self, index: usize) -> bool {
        self.target_instance_index.map_or(true, |target| target == index)
    }
}

/// Separately selectable single-instance filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum InstanceFilter {
    #[default]
    All,
    Only(usize),
}

impl InstanceFilter {
    pub fn parse(expr: &str) -> Result<Self, FilterError> {
        let expr = expr.trim();
        if expr.is_empty() || expr.eq_ignore_ascii_case("all") {
            return Ok(InstanceFilter::All);
        }
        expr.parse::<usize>()
            .map(InstanceFilter::Only)
            .map_err(|_| FilterError::InvalidInstanceFilter(expr.to_string()))
    }

    pub fn from_expression(expr: &str) -> Self {
        Self::parse(expr).unwrap_or_else(|e| {
            warn!(error = %e, "instance filter rejected, falling back to all");
            InstanceFilter::All
        })
    }

    pub fn includes(&self, index: usize) -> bool {
        match self {
            InstanceFilter::All => true,
            InstanceFilter::Only(target) => *target == index,
        }
    }
}

/// The archive instances to scan, with their index in the input sequence.
pub fn select_instances<'a>(
    instances: &'a [ArchiveInstance],
    selection: &NamespaceSelection,
    filter: InstanceFilter,
) -> Vec<(usize, &'a ArchiveInstance)> {
    instances
        .iter()
        .enumerate()
        .filter(|(idx, _)| selection.includes_instance(*idx) && filter.includes(*idx))
        .collect()
}
