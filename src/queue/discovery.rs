//! Replica discovery for the aggregator.
//!
//! Endpoints are re-derived on every cycle and never cached, so a replica
//! that went away is not queried again and a new one is picked up on the
//! next tick.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Endpoints;
use kube::{Api, Client};
use thiserror::Error;

/// One interceptor replica's admin address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendEndpoint {
    pub host: String,
    pub port: u16,
}

impl BackendEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`.
    pub fn parse(value: &str) -> Option<Self> {
        let (host, port) = value.rsplit_once(':')?;
        let port = port.parse().ok()?;
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port))
    }

    /// URL of `path` on this replica.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}:{}/{}", self.host, self.port, path.trim_start_matches('/'))
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("listing endpoints of {namespace}/{service} failed: {source}")]
    Kube {
        namespace: String,
        service: String,
        #[source]
        source: kube::Error,
    },
}

/// Source of the current replica set.
#[async_trait]
pub trait EndpointDiscovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<BackendEndpoint>, DiscoveryError>;
}

/// Fixed list of replicas, for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    endpoints: Vec<BackendEndpoint>,
}

impl StaticDiscovery {
    pub fn new(endpoints: Vec<BackendEndpoint>) -> Self {
        Self { endpoints }
    }

    /// Build from `host:port` strings, skipping (and logging) invalid ones.
    pub fn from_addresses(addresses: &[String]) -> Self {
        let endpoints = addresses
            .iter()
            .filter_map(|a| {
                let parsed = BackendEndpoint::parse(a);
                if parsed.is_none() {
                    tracing::warn!(address = %a, "Ignoring invalid static endpoint");
                }
                parsed
            })
            .collect();
        Self { endpoints }
    }
}

#[async_trait]
impl EndpointDiscovery for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<BackendEndpoint>, DiscoveryError> {
        Ok(self.endpoints.clone())
    }
}

/// Reads the ready addresses of a Service's `Endpoints` object.
pub struct KubeEndpointDiscovery {
    api: Api<Endpoints>,
    namespace: String,
    service: String,
    admin_port: u16,
}

impl KubeEndpointDiscovery {
    pub fn new(client: Client, namespace: &str, service: &str, admin_port: u16) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            service: service.to_string(),
            admin_port,
        }
    }
}

#[async_trait]
impl EndpointDiscovery for KubeEndpointDiscovery {
    async fn discover(&self) -> Result<Vec<BackendEndpoint>, DiscoveryError> {
        let endpoints = self
            .api
            .get_opt(&self.service)
            .await
            .map_err(|source| DiscoveryError::Kube {
                namespace: self.namespace.clone(),
                service: self.service.clone(),
                source,
            })?;

        let Some(endpoints) = endpoints else {
            tracing::debug!(service = %self.service, "Service has no Endpoints object yet");
            return Ok(Vec::new());
        };
        Ok(ready_addresses(&endpoints, self.admin_port))
    }
}

/// Ready (not `notReadyAddresses`) IPs of every subset, paired with `port`.
pub fn ready_addresses(endpoints: &Endpoints, port: u16) -> Vec<BackendEndpoint> {
    endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|subset| subset.addresses.iter().flatten())
        .map(|address| BackendEndpoint::new(address.ip.clone(), port))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointSubset};

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(BackendEndpoint::parse("10.0.0.1:9090"), Some(BackendEndpoint::new("10.0.0.1", 9090)));
        assert_eq!(BackendEndpoint::parse("nohost"), None);
        assert_eq!(BackendEndpoint::parse(":9090"), None);
        assert_eq!(BackendEndpoint::parse("h:notaport"), None);
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(BackendEndpoint::new("10.0.0.1", 9090).url("/queue"), "http://10.0.0.1:9090/queue");
    }

    #[test]
    fn test_ready_addresses_skip_not_ready() {
        let address = |ip: &str| EndpointAddress {
            ip: ip.to_string(),
            ..Default::default()
        };
        let endpoints = Endpoints {
            subsets: Some(vec![
                EndpointSubset {
                    addresses: Some(vec![address("10.0.0.1"), address("10.0.0.2")]),
                    not_ready_addresses: Some(vec![address("10.0.0.9")]),
                    ..Default::default()
                },
                EndpointSubset {
                    addresses: Some(vec![address("10.0.1.1")]),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };

        let found = ready_addresses(&endpoints, 9090);
        assert_eq!(
            found,
            vec![
                BackendEndpoint::new("10.0.0.1", 9090),
                BackendEndpoint::new("10.0.0.2", 9090),
                BackendEndpoint::new("10.0.1.1", 9090),
            ]
        );
    }

    #[test]
    fn test_no_subsets_means_no_endpoints() {
        assert!(ready_addresses(&Endpoints::default(), 9090).is_empty());
    }

    #[tokio::test]
    async fn test_static_discovery_skips_invalid() {
        let discovery = StaticDiscovery::from_addresses(&["127.0.0.1:1".into(), "bad".into()]);
        assert_eq!(discovery.discover().await.unwrap().len(), 1);
    }
}
