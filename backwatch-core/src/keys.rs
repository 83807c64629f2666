//! Correlation keys and owner-token classification.
//!
//! Guest ids collide across clusters, standalone nodes and archive
//! namespaces. Archive snapshots carry an owner string (`user@realm!token`)
//! whose token names the node or cluster that produced the backup; that
//! token is the only evidence allowed to *attribute* a snapshot to a guest.
//! Everything else here (path type tags, comments) may only *reject*.
//!
//! All correlation keys are built by the constructors on [`CorrelationKey`]
//! and rendered by its `Display` impl; no other module formats key strings.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::config::EngineConfig;
use crate::models::{Guest, GuestIdentity, GuestKind};

/// Which endpoint an archive snapshot's owner token points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum EndpointSuffix {
    /// No usable owner token. Never attributed automatically.
    Unknown,
    /// Primary cluster, node not identified.
    GenericPrimary,
    /// A specific node of the primary cluster (lowercased).
    PrimaryNode(String),
    /// A secondary endpoint, by endpoint id.
    Endpoint(String),
}

impl fmt::Display for EndpointSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointSuffix::Unknown => f.write_str("unknown"),
            EndpointSuffix::GenericPrimary => f.write_str("primary"),
            EndpointSuffix::PrimaryNode(node) => write!(f, "node:{node}"),
            EndpointSuffix::Endpoint(id) => write!(f, "endpoint:{id}"),
        }
    }
}

/// Which rule produced the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OwnerEvidence {
    Absent,
    SecondaryCluster,
    GenericMarker,
    PrimaryNode,
    /// Token matched nothing known and was read as an archive-server name.
    ServerFallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OwnerClass {
    pub suffix: EndpointSuffix,
    pub evidence: OwnerEvidence,
}

impl OwnerClass {
    /// Token named a concrete node or cluster.
    pub fn is_confirmed(&self) -> bool {
        matches!(self.evidence, OwnerEvidence::SecondaryCluster | OwnerEvidence::PrimaryNode)
    }

    pub fn is_heuristic(&self) -> bool {
        self.evidence == OwnerEvidence::ServerFallback
    }
}

/// Token segment of an owner string: text after the last `!`, lowercased.
pub fn owner_token(owner: Option<&str>) -> Option<String> {
    let (_, token) = owner?.rsplit_once('!')?;
    let token = token.trim().to_ascii_lowercase();
    (!token.is_empty()).then_some(token)
}

/// Cluster segment of an endpoint display name: up to the first `/`, `(`
/// or whitespace, lowercased.
pub fn cluster_segment(display_name: &str) -> String {
    display_name
        .trim()
        .split(|c: char| c == '/' || c == '(' || c.is_whitespace())
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Guest type embedded in a path-like identifier such as a volume id
/// (`local:backup/vzdump-qemu-100-...`, `store:backup/ct/101/...`).
/// Contradictory or absent tags give `None`.
pub fn path_kind_hint(identifier: &str) -> Option<GuestKind> {
    let lower = identifier.to_ascii_lowercase();
    let vm = lower.contains("/vm/") || lower.contains("qemu");
    let ct = lower.contains("/ct/") || lower.contains("lxc");
    match (vm, ct) {
        (true, false) => Some(GuestKind::Vm),
        (false, true) => Some(GuestKind::Container),
        _ => None,
    }
}

/// A guest that could own records with a given numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claimant {
    pub identity: GuestIdentity,
    pub name: String,
    pub on_primary: bool,
}

/// Cluster layout derived from the guest inventory and configuration.
#[derive(Debug, Clone)]
pub struct Topology {
    primary_endpoint: String,
    primary_nodes: HashSet<String>,
    /// `(cluster segment, endpoint id)` in first-seen order.
    secondary: Vec<(String, String)>,
    markers: Vec<String>,
    claimants: HashMap<u32, Vec<Claimant>>,
}

impl Topology {
    pub fn build(guests: &[Guest], config: &EngineConfig) -> Self {
        let primary_endpoint = config
            .primary_endpoint
            .clone()
            .or_else(|| guests.iter().find_map(|g| g.cluster_endpoint_id.clone()))
            .unwrap_or_default();

        let mut topology = Topology {
            primary_endpoint,
            primary_nodes: config.primary_nodes.iter().map(|n| n.trim().to_ascii_lowercase()).collect(),
            secondary: Vec::new(),
            markers: config.generic_owner_markers.iter().map(|m| m.trim().to_ascii_lowercase()).collect(),
            claimants: HashMap::new(),
        };

        for guest in guests {
            let identity = topology.identity_of(guest);
            let on_primary = identity.endpoint == topology.primary_endpoint;
            if on_primary {
                if let Some(node) = &guest.node {
                    topology.primary_nodes.insert(node.to_ascii_lowercase());
                }
            } else if !topology.secondary.iter().any(|(_, id)| *id == identity.endpoint) {
                let segment = guest
                    .cluster_display_name
                    .as_deref()
                    .map(cluster_segment)
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| identity.endpoint.to_ascii_lowercase());
                topology.secondary.push((segment, identity.endpoint.clone()));
            }
            topology.claimants.entry(guest.id).or_default().push(Claimant {
                identity,
                name: guest.name.clone(),
                on_primary,
            });
        }

        topology
    }

    pub fn primary_endpoint(&self) -> &str {
        &self.primary_endpoint
    }

    /// Records and guests without an endpoint id belong to the primary one.
    pub fn resolve_endpoint(&self, endpoint: Option<&str>) -> String {
        endpoint
            .filter(|e| !e.is_empty())
            .unwrap_or(&self.primary_endpoint)
            .to_string()
    }

    pub fn identity_of(&self, guest: &Guest) -> GuestIdentity {
        GuestIdentity {
            endpoint: self.resolve_endpoint(guest.cluster_endpoint_id.as_deref()),
            node: guest.node.clone(),
            kind: guest.kind,
            id: guest.id,
        }
    }

    pub fn is_primary(&self, identity: &GuestIdentity) -> bool {
        identity.endpoint == self.primary_endpoint
    }

    /// Classifies an owner string. Rules apply in order; first match wins.
    pub fn classify_owner(&self, owner: Option<&str>) -> OwnerClass {
        let Some(token) = owner_token(owner) else {
            return OwnerClass { suffix: EndpointSuffix::Unknown, evidence: OwnerEvidence::Absent };
        };

        if let Some((_, endpoint)) = self.secondary.iter().find(|(segment, _)| *segment == token) {
            return OwnerClass {
                suffix: EndpointSuffix::Endpoint(endpoint.clone()),
                evidence: OwnerEvidence::SecondaryCluster,
            };
        }
        if self.markers.contains(&token) {
            return OwnerClass { suffix: EndpointSuffix::GenericPrimary, evidence: OwnerEvidence::GenericMarker };
        }
        if self.primary_nodes.contains(&token) {
            return OwnerClass { suffix: EndpointSuffix::PrimaryNode(token), evidence: OwnerEvidence::PrimaryNode };
        }
        OwnerClass { suffix: EndpointSuffix::GenericPrimary, evidence: OwnerEvidence::ServerFallback }
    }

    /// Suffixes that may legitimately match this guest, most specific first.
    pub fn guest_suffixes(&self, identity: &GuestIdentity) -> Vec<EndpointSuffix> {
        if self.is_primary(identity) {
            let mut suffixes = Vec::with_capacity(2);
            if let Some(node) = &identity.node {
                suffixes.push(EndpointSuffix::PrimaryNode(node.to_ascii_lowercase()));
            }
            suffixes.push(EndpointSuffix::GenericPrimary);
            suffixes
        } else {
            vec![EndpointSuffix::Endpoint(identity.endpoint.clone())]
        }
    }

    pub fn claimants(&self, id: u32) -> &[Claimant] {
        self.claimants.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// No other guest in the inventory uses this numeric id.
    pub fn is_sole_claimant(&self, identity: &GuestIdentity) -> bool {
        self.claimants(identity.id).iter().all(|c| c.identity == *identity)
    }

    /// No other guest on the same endpoint shares `(id, kind)`.
    pub fn is_unique_on_endpoint(&self, identity: &GuestIdentity) -> bool {
        !self.claimants(identity.id).iter().any(|c| {
            c.identity != *identity && c.identity.kind == identity.kind && c.identity.endpoint == identity.endpoint
        })
    }

    /// Another primary-cluster guest shares `(id, kind)`.
    pub fn has_primary_sibling(&self, identity: &GuestIdentity) -> bool {
        self.claimants(identity.id)
            .iter()
            .any(|c| c.on_primary && c.identity != *identity && c.identity.kind == identity.kind)
    }
}

/// Scope part of a [`CorrelationKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum KeyScope {
    /// Archive records, scoped by owner classification.
    Owner { suffix: EndpointSuffix },
    /// Located records, node-specific bucket.
    Node { endpoint: String, node: String },
    /// Located records, endpoint-generic bucket.
    Endpoint { endpoint: String },
    /// Located records that name neither node nor endpoint.
    Unscoped,
}

/// Composite key used to bucket records and look them up per guest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CorrelationKey {
    pub guest_id: u32,
    /// `None` for tasks that do not say whether the guest is a VM or a container.
    pub guest_kind: Option<GuestKind>,
    pub scope: KeyScope,
}

impl CorrelationKey {
    pub fn archive(guest_id: u32, kind: GuestKind, suffix: EndpointSuffix) -> Self {
        Self { guest_id, guest_kind: Some(kind), scope: KeyScope::Owner { suffix } }
    }

    pub fn node(guest_id: u32, kind: Option<GuestKind>, endpoint: &str, node: &str) -> Self {
        Self {
            guest_id,
            guest_kind: kind,
            scope: KeyScope::Node { endpoint: endpoint.to_string(), node: node.to_ascii_lowercase() },
        }
    }

    pub fn endpoint(guest_id: u32, kind: Option<GuestKind>, endpoint: &str) -> Self {
        Self { guest_id, guest_kind: kind, scope: KeyScope::Endpoint { endpoint: endpoint.to_string() } }
    }

    pub fn unscoped(guest_id: u32, kind: Option<GuestKind>) -> Self {
        Self { guest_id, guest_kind: kind, scope: KeyScope::Unscoped }
    }

    /// Buckets a located record (storage backup, guest snapshot, task) is
    /// filed under: node-specific plus endpoint-generic, or unscoped when
    /// the record names neither.
    pub fn located(
        guest_id: u32,
        kind: Option<GuestKind>,
        endpoint: Option<&str>,
        node: Option<&str>,
        topology: &Topology,
    ) -> Vec<CorrelationKey> {
        let node = node.filter(|n| !n.is_empty());
        let endpoint = endpoint.filter(|e| !e.is_empty());
        if node.is_none() && endpoint.is_none() {
            return vec![Self::unscoped(guest_id, kind)];
        }
        let endpoint = topology.resolve_endpoint(endpoint);
        let mut keys = Vec::with_capacity(2);
        if let Some(node) = node {
            keys.push(Self::node(guest_id, kind, &endpoint, node));
        }
        keys.push(Self::endpoint(guest_id, kind, &endpoint));
        keys
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.guest_kind.map(|k| k.as_str()).unwrap_or("any");
        write!(f, "{}-{}@", self.guest_id, kind)?;
        match &self.scope {
            KeyScope::Owner { suffix } => write!(f, "owner:{suffix}"),
            KeyScope::Node { endpoint, node } => write!(f, "node:{endpoint}/{node}"),
            KeyScope::Endpoint { endpoint } => write!(f, "endpoint:{endpoint}"),
            KeyScope::Unscoped => f.write_str("unscoped"),
        }
    }
}
