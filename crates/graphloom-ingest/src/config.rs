//! Environment-driven ingestion knobs.

use std::time::Duration;

/// Tunables for the coordinator. See the repository documentation for the
/// corresponding `GRAPHLOOM_*` environment variables.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Connector pull timeout.
    pub connector_timeout: Duration,
    /// Per-batch embedding timeout.
    pub embedding_timeout: Duration,
    /// Per-operation store timeout.
    pub store_timeout: Duration,
    /// Connector payload cap in bytes.
    pub max_payload_bytes: usize,
    /// Bounded write parallelism `P`.
    pub write_parallelism: usize,
    /// Per-run error retention ceiling; past it errors are counted, not
    /// retained.
    pub error_retention: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            connector_timeout: Duration::from_secs(60),
            embedding_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(15),
            max_payload_bytes: 16 * 1024 * 1024,
            write_parallelism: 8,
            error_retention: 100,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            connector_timeout: env_parse("GRAPHLOOM_CONNECTOR_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.connector_timeout),
            embedding_timeout: env_parse("GRAPHLOOM_EMBEDDING_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.embedding_timeout),
            store_timeout: env_parse("GRAPHLOOM_STORE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.store_timeout),
            max_payload_bytes: env_parse("GRAPHLOOM_MAX_PAYLOAD_BYTES")
                .unwrap_or(defaults.max_payload_bytes),
            write_parallelism: env_parse::<usize>("GRAPHLOOM_WRITE_PARALLELISM")
                .filter(|p| *p > 0)
                .unwrap_or(defaults.write_parallelism),
            error_retention: env_parse("GRAPHLOOM_ERROR_RETENTION")
                .unwrap_or(defaults.error_retention),
        }
    }
}
