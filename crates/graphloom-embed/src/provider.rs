//! Embedding providers and the registry that dispatches to them.
//!
//! A schema names its provider as an opaque `"<family>:<model>"` string. The
//! family half selects a registered [`EmbeddingProvider`]; the model half is
//! passed through. The coordinator never special-cases a provider.
//!
//! Three implementations ship here:
//! - [`LocalHttpProvider`] — an OpenAI-compatible endpoint on localhost
//!   (vLLM, Ollama in OpenAI mode), no auth,
//! - [`RemoteHttpProvider`] — a cloud endpoint with bearer-token auth,
//! - [`HashEmbeddingProvider`] — deterministic feature-hashed bag-of-words
//!   vectors for offline and demo use; no service required.

use crate::error::EmbeddingError;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Dimensions of commonly deployed embedding models. The registry also
/// learns dimensions from responses, so this table is a head start, not a
/// requirement.
const KNOWN_DIMENSIONS: &[(&str, usize)] = &[
    ("text-embedding-3-small", 1536),
    ("text-embedding-3-large", 3072),
    ("text-embedding-ada-002", 1536),
    ("nomic-embed-text", 768),
    ("mxbai-embed-large", 1024),
    ("all-minilm", 384),
];

fn known_dimension(model: &str) -> Option<usize> {
    KNOWN_DIMENSIONS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, dim)| *dim)
}

/// One embedding backend. Implementations must preserve input order and be
/// pure with respect to `(model, texts)`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// The `<family>` half of the provider ids this backend serves.
    fn family(&self) -> &str;

    /// Embed a batch. One vector per input text, in input order.
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Vector length for a model, when known ahead of the first call.
    fn dimension(&self, model: &str) -> Option<usize>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Environment-driven embedding configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub local_url: String,
    pub remote_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_batch: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            local_url: "http://127.0.0.1:8089".to_string(),
            remote_url: "https://api.openai.com".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            max_batch: 64,
        }
    }
}

impl EmbeddingConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            local_url: std::env::var("GRAPHLOOM_EMBEDDING_URL").unwrap_or(defaults.local_url),
            remote_url: std::env::var("GRAPHLOOM_EMBEDDING_REMOTE_URL")
                .unwrap_or(defaults.remote_url),
            api_key: std::env::var("GRAPHLOOM_EMBEDDING_API_KEY").ok(),
            timeout: std::env::var("GRAPHLOOM_EMBEDDING_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_batch: std::env::var("GRAPHLOOM_EMBEDDING_MAX_BATCH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_batch),
        }
    }
}

// ============================================================================
// HTTP providers
// ============================================================================

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

async fn http_embed(
    client: &Client,
    base_url: &str,
    bearer: Option<&str>,
    model: &str,
    texts: &[String],
    timeout: Duration,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let url = format!("{}/v1/embeddings", base_url.trim_end_matches('/'));
    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let mut request = client.post(&url).json(&body);
    if let Some(token) = bearer {
        request = request.header("Authorization", format!("Bearer {token}"));
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            EmbeddingError::Timeout(timeout)
        } else {
            EmbeddingError::Unavailable(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(EmbeddingError::Unavailable(format!("{status}: {body}")));
    }

    let parsed: EmbeddingsResponse = response
        .json()
        .await
        .map_err(|e| EmbeddingError::MalformedResponse(e.to_string()))?;

    if parsed.data.len() != texts.len() {
        return Err(EmbeddingError::MalformedResponse(format!(
            "asked for {} embeddings, got {}",
            texts.len(),
            parsed.data.len()
        )));
    }

    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
}

fn http_client(timeout: Duration) -> Result<Client, EmbeddingError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EmbeddingError::Unavailable(e.to_string()))
}

/// OpenAI-compatible endpoint on the local machine. No auth.
pub struct LocalHttpProvider {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl LocalHttpProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Ok(Self {
            client: http_client(config.timeout)?,
            base_url: config.local_url.clone(),
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalHttpProvider {
    fn family(&self) -> &str {
        "local"
    }

    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        http_embed(&self.client, &self.base_url, None, model, texts, self.timeout).await
    }

    fn dimension(&self, model: &str) -> Option<usize> {
        known_dimension(model)
    }
}

/// Cloud endpoint with bearer-token authentication.
pub struct RemoteHttpProvider {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl RemoteHttpProvider {
    /// Fails when no API key is configured — a remote provider without
    /// credentials can only ever return auth errors.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            EmbeddingError::Unavailable("GRAPHLOOM_EMBEDDING_API_KEY is not set".to_string())
        })?;
        Ok(Self {
            client: http_client(config.timeout)?,
            base_url: config.remote_url.clone(),
            api_key,
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteHttpProvider {
    fn family(&self) -> &str {
        "remote"
    }

    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        http_embed(
            &self.client,
            &self.base_url,
            Some(&self.api_key),
            model,
            texts,
            self.timeout,
        )
        .await
    }

    fn dimension(&self, model: &str) -> Option<usize> {
        known_dimension(model)
    }
}

// ============================================================================
// Hash provider (offline / demo)
// ============================================================================

/// Feature-hashed bag-of-words vectors: deterministic, offline, and similar
/// texts overlap in token buckets. The model string is the dimension, e.g.
/// `hash:64`.
#[derive(Debug, Default)]
pub struct HashEmbeddingProvider;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

impl HashEmbeddingProvider {
    fn vectorize(text: &str, dimension: usize) -> Vec<f32> {
        let mut vector = vec![0.0f32; dimension];
        for token in text.split_whitespace() {
            let token: String = token
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            let bucket = (fnv1a(token.as_bytes()) % dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn family(&self) -> &str {
        "hash"
    }

    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let dimension: usize = model
            .parse()
            .map_err(|_| EmbeddingError::UnknownProvider(format!("hash:{model}")))?;
        Ok(texts
            .iter()
            .map(|text| Self::vectorize(text, dimension))
            .collect())
    }

    fn dimension(&self, model: &str) -> Option<usize> {
        model.parse().ok()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Process-wide provider table plus the per-provider-id dimension registry.
pub struct ProviderRegistry {
    providers: DashMap<String, Arc<dyn EmbeddingProvider>>,
    dimensions: DashMap<String, usize>,
    max_batch: usize,
}

impl ProviderRegistry {
    pub fn new(max_batch: usize) -> Self {
        Self {
            providers: DashMap::new(),
            dimensions: DashMap::new(),
            max_batch: max_batch.max(1),
        }
    }

    /// Registry with every provider the configuration can support. The
    /// remote provider is skipped without credentials; the hash provider is
    /// always available.
    pub fn with_default_providers(config: &EmbeddingConfig) -> Self {
        let registry = Self::new(config.max_batch);
        if let Ok(local) = LocalHttpProvider::new(config) {
            registry.register(Arc::new(local));
        }
        if let Ok(remote) = RemoteHttpProvider::new(config) {
            registry.register(Arc::new(remote));
        }
        registry.register(Arc::new(HashEmbeddingProvider));
        registry
    }

    pub fn register(&self, provider: Arc<dyn EmbeddingProvider>) {
        self.providers
            .insert(provider.family().to_string(), provider);
    }

    fn resolve(
        &self,
        provider_id: &str,
    ) -> Result<(Arc<dyn EmbeddingProvider>, String), EmbeddingError> {
        let (family, model) = provider_id.split_once(':').unwrap_or((provider_id, ""));
        let provider = self
            .providers
            .get(family)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EmbeddingError::UnknownProvider(provider_id.to_string()))?;
        Ok((provider, model.to_string()))
    }

    /// The registered or learned dimension for a provider id.
    pub fn dimension(&self, provider_id: &str) -> Option<usize> {
        if let Some(dim) = self.dimensions.get(provider_id) {
            return Some(*dim);
        }
        let (provider, model) = self.resolve(provider_id).ok()?;
        provider.dimension(&model)
    }

    /// Record a dimension observed from a live response.
    pub fn register_dimension(&self, provider_id: &str, dimension: usize) {
        self.dimensions.insert(provider_id.to_string(), dimension);
    }

    /// Embed `texts` through the provider named by `provider_id`.
    ///
    /// Batches are split at the configured size; output order matches input
    /// order. Every returned vector is checked against the expected
    /// dimension (registered, or learned from the first vector).
    pub async fn embed(
        &self,
        provider_id: &str,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let (provider, model) = self.resolve(provider_id)?;
        let mut expected = self.dimension(provider_id);

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.max_batch) {
            let batch_vectors = provider.embed(&model, batch).await?;
            if batch_vectors.len() != batch.len() {
                return Err(EmbeddingError::MalformedResponse(format!(
                    "batch of {} texts returned {} vectors",
                    batch.len(),
                    batch_vectors.len()
                )));
            }
            for vector in batch_vectors {
                match expected {
                    Some(dim) if vector.len() != dim => {
                        return Err(EmbeddingError::DimensionMismatch {
                            expected: dim,
                            got: vector.len(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        expected = Some(vector.len());
                        self.register_dimension(provider_id, vector.len());
                        debug!(provider_id, dimension = vector.len(), "dimension learned");
                    }
                }
                vectors.push(vector);
            }
        }
        Ok(vectors)
    }
}
