//! Routing table storage.
//!
//! # Responsibilities
//! - Decode and validate a routing document into an immutable [`RouteMap`]
//! - Hold the current map behind an `ArcSwap` for lock-free lookups
//! - Replace the whole map in a single pointer swap
//!
//! # Design Decisions
//! - A `RouteMap` is never mutated after construction; replacement builds a
//!   new one, so a reader holding a snapshot can never see a torn table
//! - Longest matching path prefix wins within a host

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::routing::matcher::{HostMatcher, Matcher, PathPrefixMatcher, RouteKey};

/// Network location of a routing target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Backend {
    pub address: String,
    pub port: u16,
}

impl Backend {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// `address:port`, suitable for a URI authority.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// One entry of the routing document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    pub backend: Backend,
}

/// Wire form of a full routing table, as served by the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDocument {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

/// Reasons a routing document is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("route {index} has an empty host")]
    EmptyHost { index: usize },

    #[error("route for host '{host}' has port 0")]
    ZeroPort { host: String },

    #[error("route for host '{host}' has an empty backend address")]
    EmptyAddress { host: String },

    #[error("path prefix '{prefix}' for host '{host}' must start with '/'")]
    BadPrefix { host: String, prefix: String },

    #[error("duplicate route for host '{host}' and prefix {prefix:?}")]
    Duplicate { host: String, prefix: Option<String> },
}

#[derive(Debug)]
struct PrefixRoute {
    path: PathPrefixMatcher,
    backend: Backend,
}

/// Compiled, immutable routing table.
#[derive(Debug, Default)]
pub struct RouteMap {
    version: u64,
    /// Host -> routes ordered by descending prefix specificity.
    hosts: HashMap<String, (HostMatcher, Vec<PrefixRoute>)>,
    len: usize,
}

impl RouteMap {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate a document and compile it. Either every entry is accepted or
    /// the whole document is rejected.
    pub fn from_document(doc: RoutingDocument) -> Result<Self, TableError> {
        let mut hosts: HashMap<String, (HostMatcher, Vec<PrefixRoute>)> = HashMap::new();
        let len = doc.routes.len();

        for (index, entry) in doc.routes.into_iter().enumerate() {
            if entry.host.trim().is_empty() {
                return Err(TableError::EmptyHost { index });
            }
            if entry.backend.port == 0 {
                return Err(TableError::ZeroPort { host: entry.host });
            }
            if entry.backend.address.trim().is_empty() {
                return Err(TableError::EmptyAddress { host: entry.host });
            }
            if let Some(prefix) = &entry.path_prefix {
                if !prefix.starts_with('/') {
                    return Err(TableError::BadPrefix {
                        host: entry.host.clone(),
                        prefix: prefix.clone(),
                    });
                }
            }

            let host = HostMatcher::new(&entry.host);
            let (_, routes) = hosts
                .entry(host.host().to_string())
                .or_insert_with(|| (host.clone(), Vec::new()));
            if routes.iter().any(|r| r.path.prefix() == entry.path_prefix.as_deref()) {
                return Err(TableError::Duplicate {
                    host: entry.host,
                    prefix: entry.path_prefix,
                });
            }
            routes.push(PrefixRoute {
                path: PathPrefixMatcher::new(entry.path_prefix),
                backend: entry.backend,
            });
        }

        for (_, routes) in hosts.values_mut() {
            routes.sort_by(|a, b| b.path.specificity().cmp(&a.path.specificity()));
        }

        Ok(Self {
            version: doc.version,
            hosts,
            len,
        })
    }

    /// Find the backend for a key.
    pub fn lookup(&self, key: &RouteKey) -> Option<&Backend> {
        let (host, routes) = self.hosts.get(&key.host)?;
        if !host.matches(key) {
            return None;
        }
        routes
            .iter()
            .find(|route| route.path.matches(key))
            .map(|route| &route.backend)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Back to wire form, ordered by host then prefix for stable output.
    pub fn to_document(&self) -> RoutingDocument {
        let mut routes: Vec<RouteEntry> = self
            .hosts
            .iter()
            .flat_map(|(host, (_, routes))| {
                routes.iter().map(move |r| RouteEntry {
                    host: host.clone(),
                    path_prefix: r.path.prefix().map(str::to_string),
                    backend: r.backend.clone(),
                })
            })
            .collect();
        routes.sort_by(|a, b| (&a.host, &a.path_prefix).cmp(&(&b.host, &b.path_prefix)));
        RoutingDocument {
            version: self.version,
            routes,
        }
    }
}

/// Shared routing table with atomic whole-table replacement.
#[derive(Debug)]
pub struct RoutingTable {
    current: ArcSwap<RouteMap>,
}

impl RoutingTable {
    /// A table with no routes.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RouteMap::empty()),
        }
    }

    /// Install `map` in one observable step.
    pub fn replace(&self, map: RouteMap) {
        let routes = map.len();
        let version = map.version();
        self.current.store(Arc::new(map));
        tracing::debug!(routes, version, "Routing table replaced");
    }

    /// Look up a key against the currently installed map.
    pub fn lookup(&self, key: &RouteKey) -> Option<Backend> {
        self.current.load().lookup(key).cloned()
    }

    /// The currently installed map. Multiple lookups against one snapshot
    /// always see the same table.
    pub fn snapshot(&self) -> Arc<RouteMap> {
        self.current.load_full()
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}
