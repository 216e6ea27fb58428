//! Routing table synchronization from the control plane.
//!
//! # Responsibilities
//! - Fetch the authoritative routing document over HTTP
//! - Decode and validate it into a candidate [`RouteMap`]
//! - Install it with [`RoutingTable::replace`] only when every step succeeded

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::observability::metrics;
use crate::routing::table::{RouteMap, RoutingDocument, RoutingTable, TableError};

/// Why a sync attempt left the table untouched.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetching routing table from {url} failed: {source}")]
    Fetch {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("routing source {url} answered {status}")]
    Status { url: Url, status: reqwest::StatusCode },

    #[error("routing document is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("routing document rejected: {0}")]
    Invalid(#[from] TableError),
}

/// Pulls the routing table from the control plane's admin endpoint.
#[derive(Debug, Clone)]
pub struct RoutingSync {
    client: reqwest::Client,
    source: Url,
    table: Arc<RoutingTable>,
}

impl RoutingSync {
    pub fn new(source: Url, table: Arc<RoutingTable>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            source,
            table,
        })
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    pub fn source(&self) -> &Url {
        &self.source
    }

    /// Fetch, decode and install. Returns the number of installed routes.
    pub async fn sync(&self) -> Result<usize, SyncError> {
        let result = self.fetch().await.and_then(|doc| Ok(RouteMap::from_document(doc)?));
        match result {
            Ok(map) => {
                let routes = map.len();
                self.table.replace(map);
                metrics::record_routing_sync(true);
                tracing::info!(source = %self.source, routes, "Routing table refreshed");
                Ok(routes)
            }
            Err(e) => {
                metrics::record_routing_sync(false);
                tracing::warn!(source = %self.source, error = %e, "Routing refresh failed, keeping current table");
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> Result<RoutingDocument, SyncError> {
        let response = self
            .client
            .get(self.source.clone())
            .send()
            .await
            .map_err(|source| SyncError::Fetch {
                url: self.source.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                url: self.source.clone(),
                status,
            });
        }

        let body = response.bytes().await.map_err(|source| SyncError::Fetch {
            url: self.source.clone(),
            source,
        })?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::matcher::RouteKey;
    use crate::routing::table::{Backend, RouteEntry};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `body` with `status` to every connection.
    async fn serve(status: &'static str, body: String) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        Url::parse(&format!("http://{}/routing", addr)).unwrap()
    }

    fn seeded_table() -> Arc<RoutingTable> {
        let table = Arc::new(RoutingTable::new());
        table.replace(
            RouteMap::from_document(RoutingDocument {
                version: 1,
                routes: vec![RouteEntry {
                    host: "old".into(),
                    path_prefix: None,
                    backend: Backend::new("old-backend", 80),
                }],
            })
            .unwrap(),
        );
        table
    }

    fn assert_untouched(table: &RoutingTable) {
        assert_eq!(table.snapshot().version(), 1);
        assert!(table.lookup(&RouteKey::new("old", "/")).is_some());
    }

    #[tokio::test]
    async fn test_sync_installs_new_table() {
        let url = serve(
            "200 OK",
            r#"{"version":2,"routes":[{"host":"demo","backend":{"address":"demo.ns.svc.cluster.local","port":8080}}]}"#.into(),
        )
        .await;
        let table = seeded_table();
        let sync = RoutingSync::new(url, table.clone(), Duration::from_secs(2)).unwrap();

        assert_eq!(sync.sync().await.unwrap(), 1);
        assert!(table.lookup(&RouteKey::new("old", "/")).is_none());
        let backend = table.lookup(&RouteKey::new("demo", "/x")).unwrap();
        assert_eq!(backend.authority(), "demo.ns.svc.cluster.local:8080");
    }

    #[tokio::test]
    async fn test_malformed_json_keeps_table() {
        let url = serve("200 OK", "{not json".into()).await;
        let table = seeded_table();
        let sync = RoutingSync::new(url, table.clone(), Duration::from_secs(2)).unwrap();

        assert!(matches!(sync.sync().await, Err(SyncError::Decode(_))));
        assert_untouched(&table);
    }

    #[tokio::test]
    async fn test_invalid_document_keeps_table() {
        let url = serve(
            "200 OK",
            r#"{"routes":[{"host":"demo","backend":{"address":"a","port":80}},{"host":"","backend":{"address":"b","port":80}}]}"#.into(),
        )
        .await;
        let table = seeded_table();
        let sync = RoutingSync::new(url, table.clone(), Duration::from_secs(2)).unwrap();

        assert!(matches!(sync.sync().await, Err(SyncError::Invalid(_))));
        assert_untouched(&table);
    }

    #[tokio::test]
    async fn test_error_status_keeps_table() {
        let url = serve("500 Internal Server Error", "boom".into()).await;
        let table = seeded_table();
        let sync = RoutingSync::new(url, table.clone(), Duration::from_secs(2)).unwrap();

        assert!(matches!(sync.sync().await, Err(SyncError::Status { .. })));
        assert_untouched(&table);
    }

    #[tokio::test]
    async fn test_unreachable_source_keeps_table() {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let url = Url::parse(&format!("http://{}/routing", addr)).unwrap();
        let table = seeded_table();
        let sync = RoutingSync::new(url, table.clone(), Duration::from_secs(2)).unwrap();

        assert!(matches!(sync.sync().await, Err(SyncError::Fetch { .. })));
        assert_untouched(&table);
    }
}
