//! The connector pull seam.
//!
//! Connectors are addressed purely by capability: the registry maps a URL
//! scheme to an implementation, and the coordinator never knows which one it
//! is talking to. `http`/`https` resolve to [`HttpConnector`];
//! [`StaticConnector`] serves staged documents for demos and tests under
//! whatever scheme it is registered as.
//!
//! One pull returns the complete batch for a run; pagination, upstream auth,
//! and rate limits are the connector service's business.

use crate::error::IngestError;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Caps applied to one pull.
#[derive(Debug, Clone)]
pub struct PullLimits {
    pub max_bytes: usize,
    pub timeout: Duration,
}

/// A pull-capable document origin.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Fetch the complete document batch. The response must be a JSON array
    /// of opaque document objects.
    async fn pull(
        &self,
        url: &Url,
        auth_ref: Option<&str>,
        limits: &PullLimits,
    ) -> Result<Vec<Value>, IngestError>;
}

/// Scheme → connector table.
#[derive(Default)]
pub struct ConnectorRegistry {
    by_scheme: DashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the HTTP connector bound to `http` and `https`.
    pub fn with_http(timeout: Duration) -> Result<Self, IngestError> {
        let registry = Self::new();
        let http: Arc<dyn Connector> = Arc::new(HttpConnector::new(timeout)?);
        registry.register("http", Arc::clone(&http));
        registry.register("https", http);
        Ok(registry)
    }

    pub fn register(&self, scheme: &str, connector: Arc<dyn Connector>) {
        self.by_scheme.insert(scheme.to_string(), connector);
    }

    /// Parse the URL, dispatch on its scheme, and pull.
    pub async fn pull(
        &self,
        connector_url: &str,
        auth_ref: Option<&str>,
        limits: &PullLimits,
    ) -> Result<Vec<Value>, IngestError> {
        let url = Url::parse(connector_url)
            .map_err(|e| IngestError::ConnectorUnavailable(format!("bad url `{connector_url}`: {e}")))?;
        let connector = self
            .by_scheme
            .get(url.scheme())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                IngestError::ConnectorUnavailable(format!(
                    "no connector registered for scheme `{}`",
                    url.scheme()
                ))
            })?;
        connector.pull(&url, auth_ref, limits).await
    }
}

/// Interpret a response body as the document batch.
fn parse_batch(bytes: &[u8], limits: &PullLimits) -> Result<Vec<Value>, IngestError> {
    if bytes.len() > limits.max_bytes {
        return Err(IngestError::ConnectorResponseTooLarge {
            size: bytes.len(),
            limit: limits.max_bytes,
        });
    }
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| IngestError::ConnectorMalformed(format!("body is not JSON: {e}")))?;
    match value {
        Value::Array(documents) => Ok(documents),
        other => Err(IngestError::ConnectorMalformed(format!(
            "expected a top-level JSON array, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// HTTP connector
// ============================================================================

/// Pulls over HTTP. The auth reference names an environment variable whose
/// value is sent as a bearer token.
pub struct HttpConnector {
    client: Client,
}

impl HttpConnector {
    pub fn new(timeout: Duration) -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::ConnectorUnavailable(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn pull(
        &self,
        url: &Url,
        auth_ref: Option<&str>,
        limits: &PullLimits,
    ) -> Result<Vec<Value>, IngestError> {
        let mut request = self.client.get(url.clone());
        if let Some(reference) = auth_ref {
            let token = std::env::var(reference).map_err(|_| {
                IngestError::ConnectorUnavailable(format!(
                    "auth reference `{reference}` is not set in the environment"
                ))
            })?;
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                IngestError::Timeout {
                    operation: "connector pull".to_string(),
                }
            } else {
                IngestError::ConnectorUnavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::ConnectorUnavailable(format!(
                "{url} answered {status}"
            )));
        }

        if let Some(length) = response.content_length() {
            if length as usize > limits.max_bytes {
                return Err(IngestError::ConnectorResponseTooLarge {
                    size: length as usize,
                    limit: limits.max_bytes,
                });
            }
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                IngestError::Timeout {
                    operation: "connector pull".to_string(),
                }
            } else {
                IngestError::ConnectorUnavailable(e.to_string())
            }
        })?;
        debug!(url = %url, bytes = bytes.len(), "connector responded");
        parse_batch(&bytes, limits)
    }
}

// ============================================================================
// Static connector (demo / tests)
// ============================================================================

/// Serves documents staged in memory, keyed by the full connector URL.
#[derive(Default)]
pub struct StaticConnector {
    responses: DashMap<String, Value>,
}

impl StaticConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a response body for a URL. The value is checked at pull time
    /// exactly like an HTTP body, so staging a non-array exercises the
    /// malformed path.
    pub fn stage(&self, url: &str, body: Value) {
        self.responses.insert(url.to_string(), body);
    }
}

#[async_trait]
impl Connector for StaticConnector {
    async fn pull(
        &self,
        url: &Url,
        _auth_ref: Option<&str>,
        limits: &PullLimits,
    ) -> Result<Vec<Value>, IngestError> {
        let body = self
            .responses
            .get(url.as_str())
            .map(|entry| entry.clone())
            .ok_or_else(|| {
                IngestError::ConnectorUnavailable(format!("nothing staged for {url}"))
            })?;
        let bytes = serde_json::to_vec(&body)
            .map_err(|e| IngestError::ConnectorMalformed(e.to_string()))?;
        parse_batch(&bytes, limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits(max_bytes: usize) -> PullLimits {
        PullLimits {
            max_bytes,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn static_connector_serves_staged_batches() {
        let registry = ConnectorRegistry::new();
        let connector = Arc::new(StaticConnector::new());
        connector.stage("static://c/products", json!([{"sku": "A"}, {"sku": "B"}]));
        registry.register("static", connector);

        let docs = registry
            .pull("static://c/products", None, &limits(1024))
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn unstaged_urls_are_unavailable() {
        let registry = ConnectorRegistry::new();
        registry.register("static", Arc::new(StaticConnector::new()));
        let err = registry
            .pull("static://c/missing", None, &limits(1024))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::ConnectorUnavailable(_)));
    }

    #[tokio::test]
    async fn non_array_bodies_are_malformed() {
        let registry = ConnectorRegistry::new();
        let connector = Arc::new(StaticConnector::new());
        connector.stage("static://c/object", json!({"not": "an array"}));
        registry.register("static", connector);

        let err = registry
            .pull("static://c/object", None, &limits(1024))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::ConnectorMalformed(_)));
    }

    #[tokio::test]
    async fn oversize_bodies_are_rejected() {
        let registry = ConnectorRegistry::new();
        let connector = Arc::new(StaticConnector::new());
        connector.stage(
            "static://c/huge",
            json!([{"filler": "x".repeat(2048)}]),
        );
        registry.register("static", connector);

        let err = registry
            .pull("static://c/huge", None, &limits(256))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::ConnectorResponseTooLarge { .. }));
    }

    #[tokio::test]
    async fn unknown_schemes_and_bad_urls_fail() {
        let registry = ConnectorRegistry::new();
        for url in ["ftp://c/x", "not a url"] {
            let err = registry.pull(url, None, &limits(1024)).await.unwrap_err();
            assert!(matches!(err, IngestError::ConnectorUnavailable(_)), "{url}");
        }
    }
}
