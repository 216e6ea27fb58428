//! Route key extraction and matching.
//!
//! # Design Decisions
//! - Host matching is case-insensitive and ignores any `:port` suffix
//! - Path matching is case-sensitive prefix matching
//! - An absent path prefix matches every path of its host
//! - No regex, so lookups stay linear in the routes of one host

/// The part of a request the routing table is keyed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteKey {
    /// Lowercased host without port.
    pub host: String,
    /// Request path, as received.
    pub path: String,
}

impl RouteKey {
    pub fn new(host: impl AsRef<str>, path: impl Into<String>) -> Self {
        Self {
            host: normalize_host(host.as_ref()),
            path: path.into(),
        }
    }
}

/// Lowercase a host and strip a trailing port, keeping IPv6 brackets intact.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if host.starts_with('[') {
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        }
    };
    without_port.to_lowercase()
}

/// Trait for matching route keys against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the key matches this condition.
    fn matches(&self, key: &RouteKey) -> bool;
}

/// Matches the host of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// The host is normalized so matching is case-insensitive.
    pub fn new(host: impl AsRef<str>) -> Self {
        Self {
            expected_host: normalize_host(host.as_ref()),
        }
    }

    pub fn host(&self) -> &str {
        &self.expected_host
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, key: &RouteKey) -> bool {
        key.host == self.expected_host
    }
}

/// Matches the path prefix of a key. `None` matches everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixMatcher {
    prefix: Option<String>,
}

impl PathPrefixMatcher {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Length used to order candidates; longer prefixes are more specific.
    pub fn specificity(&self) -> usize {
        self.prefix.as_ref().map_or(0, |p| p.len())
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, key: &RouteKey) -> bool {
        match &self.prefix {
            Some(prefix) => key.path.starts_with(prefix.as_str()),
            None => true,
        }
    }
}
