//! Embedding providers.
//!
//! [`EmbeddingProvider`] is the seam the indexer and search engine embed
//! through; [`OllamaClient`] implements it against a local Ollama server's
//! `/api/embed` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tars_core::{EmbeddingConfig, TarsError};
use tracing::debug;

const BATCH_SIZE: usize = 64;
const PROBE_TEXT: &str = "dimension probe";

/// Turns text into fixed-length vectors.
///
/// Implementations return one vector per input, in input order. They may
/// return fewer (callers treat any shortfall as a provider failure) but
/// never reorder.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts` with `model`.
    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>, TarsError>;

    /// Vector length produced by `model`, found by embedding a probe string.
    async fn probe_dimension(&self, model: &str) -> Result<usize, TarsError> {
        let vectors = self.embed(&[PROBE_TEXT.to_string()], model).await?;
        match vectors.first() {
            Some(v) if !v.is_empty() => Ok(v.len()),
            _ => Err(TarsError::Provider(format!(
                "model {model:?} returned no embeddings"
            ))),
        }
    }
}

/// Client for the Ollama embedding API.
///
/// # Examples
///
/// ```
/// use tars_memory::embedding::OllamaClient;
///
/// let client = OllamaClient::new("http://localhost:11434").unwrap();
/// assert_eq!(client.base_url(), "http://localhost:11434");
/// ```
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

impl OllamaClient {
    /// Create a client for the server at `base_url` with a 120 second timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Provider`] if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, TarsError> {
        Self::with_timeout(base_url, Duration::from_secs(120))
    }

    fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, TarsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TarsError::Provider(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a client from an [`EmbeddingConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Config`] if the configured provider is not
    /// `ollama`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tars_core::EmbeddingConfig;
    /// use tars_memory::embedding::OllamaClient;
    ///
    /// let client = OllamaClient::with_config(&EmbeddingConfig::default()).unwrap();
    /// assert_eq!(client.base_url(), "http://localhost:11434");
    /// ```
    pub fn with_config(config: &EmbeddingConfig) -> Result<Self, TarsError> {
        if !config.provider.eq_ignore_ascii_case("ollama") {
            return Err(TarsError::Config(format!(
                "unsupported embedding provider '{}': only 'ollama' is available",
                config.provider
            )));
        }
        Self::with_timeout(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    /// Server base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn embed_batch(&self, batch: &[String], model: &str) -> Result<Vec<Vec<f32>>, TarsError> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&EmbedRequest {
                model,
                input: batch,
            })
            .send()
            .await
            .map_err(|e| TarsError::Provider(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(TarsError::Provider(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| TarsError::Provider(format!("failed to parse response: {e}")))?;
        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    /// Embed in sub-batches of 64. A short sub-batch ends the run, so the
    /// result never contains vectors out of position.
    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>, TarsError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            let vectors = self.embed_batch(batch, model).await?;
            let short = vectors.len() < batch.len();
            all_embeddings.extend(vectors.into_iter().take(batch.len()));
            if short {
                break;
            }
        }

        debug!(
            model,
            requested = texts.len(),
            returned = all_embeddings.len(),
            "embedded texts"
        );
        Ok(all_embeddings)
    }
}
