//! Authoritative routing table held by the operator.
//!
//! One entry per declared application, keyed by `namespace/name`. The
//! registry is rendered into a [`RoutingDocument`] on every `GET /routing`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::routing::{RouteEntry, RoutingDocument};

#[derive(Debug, Default)]
pub struct RouteRegistry {
    routes: DashMap<String, RouteEntry>,
    version: AtomicU64,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(namespace: &str, name: &str) -> String {
        format!("{}/{}", namespace, name)
    }

    /// Insert or replace the route of one application. Bumps the version
    /// only when the entry actually changed.
    pub fn upsert(&self, namespace: &str, name: &str, route: RouteEntry) {
        let key = Self::key(namespace, name);
        let previous = self.routes.insert(key, route.clone());
        if previous.as_ref() != Some(&route) {
            self.version.fetch_add(1, Ordering::AcqRel);
            tracing::debug!(namespace, name, host = %route.host, "Route registered");
        }
    }

    pub fn remove(&self, namespace: &str, name: &str) {
        if self.routes.remove(&Self::key(namespace, name)).is_some() {
            self.version.fetch_add(1, Ordering::AcqRel);
            tracing::debug!(namespace, name, "Route removed");
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Render the registry. When two applications claim the same route
    /// key, the one with the lexically smaller `namespace/name` wins.
    pub fn document(&self) -> RoutingDocument {
        let mut entries: Vec<(String, RouteEntry)> = self
            .routes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut seen = HashSet::new();
        let mut routes = Vec::with_capacity(entries.len());
        for (owner, route) in entries {
            let route_key = (route.host.to_ascii_lowercase(), route.path_prefix.clone());
            if !seen.insert(route_key) {
                tracing::warn!(owner = %owner, host = %route.host, "Skipping route claimed by another application");
                continue;
            }
            routes.push(route);
        }

        RoutingDocument {
            version: self.version(),
            routes,
        }
    }
}
