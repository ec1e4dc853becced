//! ============================================================================
//! Embedding Providers - Vector embeddings for memory content
//! ============================================================================
//! Pluggable text-to-vector backends behind one trait. Provider failures
//! never propagate: every transport, status or decode error is logged and
//! answered with a zero vector of the provider's declared dimensionality, so
//! writes never block on an unavailable backend.
//!
//! Backends: Gemini `text-embedding-004` (768 dims) and OpenAI
//! `text-embedding-3-small` (1536 dims).
//! ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{LavenderError, Result};

/// Per-request timeout for every embedding HTTP call
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const GEMINI_MODEL: &str = "text-embedding-004";
pub const GEMINI_DIM: usize = 768;
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const OPENAI_MODEL: &str = "text-embedding-3-small";
pub const OPENAI_DIM: usize = 1536;
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// A text embedding backend
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier, e.g. `gemini-text-embedding-004`
    fn name(&self) -> &str;

    /// Length of every vector this provider returns
    fn dimensions(&self) -> usize;

    /// Embed one text. Returns a zero vector on failure.
    async fn embed(&self, text: &str) -> Vec<f32>;

    /// Embed several texts, preserving input order. Returns one zero vector
    /// per input on failure.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>>;

    /// Embed a probe string and check the result is usable
    async fn health_check(&self) -> bool {
        let vector = self.embed("ping").await;
        vector.len() == self.dimensions() && vector.iter().any(|v| *v != 0.0)
    }
}

fn zero_vector(dims: usize) -> Vec<f32> {
    vec![0.0; dims]
}

fn http_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            warn!("Failed to build HTTP client with timeout, using defaults: {}", e);
            Client::new()
        })
}

/// Send a JSON POST and decode a successful JSON response
async fn post_json<B, R>(request: reqwest::RequestBuilder, body: &B) -> Result<R>
where
    B: Serialize + ?Sized,
    R: for<'de> Deserialize<'de>,
{
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| LavenderError::ProviderUnavailable(format!("Request failed: {}", e)))?;

    let status = response.status();
    let text = response.text().await.map_err(|e| {
        LavenderError::ProviderUnavailable(format!("Failed to read response body: {}", e))
    })?;

    if !status.is_success() {
        if let Ok(error) = serde_json::from_str::<ErrorResponse>(&text) {
            return Err(LavenderError::ProviderUnavailable(format!(
                "API error ({}): {}",
                status, error.error.message
            )));
        }
        return Err(LavenderError::ProviderUnavailable(format!(
            "API error ({}): {}",
            status, text
        )));
    }

    serde_json::from_str(&text).map_err(|e| {
        LavenderError::ProviderUnavailable(format!("Failed to parse response: {}", e))
    })
}

/// Error body shape shared by both HTTP APIs
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

// ============================================================================
// Gemini
// ============================================================================

#[derive(Debug, Serialize)]
struct GeminiEmbedRequest<'a> {
    model: &'a str,
    content: GeminiContent<'a>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    parts: [GeminiPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GeminiBatchRequest<'a> {
    requests: Vec<GeminiEmbedRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct GeminiValues {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedResponse {
    embedding: GeminiValues,
}

#[derive(Debug, Deserialize)]
struct GeminiBatchResponse {
    #[serde(default)]
    embeddings: Vec<GeminiValues>,
}

/// Google Gemini `text-embedding-004`
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model_path: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            model_path: format!("models/{}", GEMINI_MODEL),
        }
    }

    /// Point at a different endpoint root (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/{}:{}", self.base_url, self.model_path, method))
            .query(&[("key", self.api_key.as_str())])
    }

    fn embed_request<'a>(&'a self, text: &'a str) -> GeminiEmbedRequest<'a> {
        GeminiEmbedRequest {
            model: &self.model_path,
            content: GeminiContent {
                parts: [GeminiPart { text }],
            },
        }
    }

    async fn try_embed(&self, text: &str) -> Result<Vec<f32>> {
        let response: GeminiEmbedResponse = post_json(
            self.request("embedContent"),
            &self.embed_request(text),
        )
        .await?;
        Ok(response.embedding.values)
    }

    async fn try_embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = GeminiBatchRequest {
            requests: texts.iter().map(|t| self.embed_request(t)).collect(),
        };
        let response: GeminiBatchResponse =
            post_json(self.request("batchEmbedContents"), &body).await?;
        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini-text-embedding-004"
    }

    fn dimensions(&self) -> usize {
        GEMINI_DIM
    }

    async fn embed(&self, text: &str) -> Vec<f32> {
        match self.try_embed(text).await {
            Ok(vector) => {
                debug!("Gemini embedding: {} dims", vector.len());
                vector
            }
            Err(e) => {
                warn!("Gemini embed failed, using zero vector: {}", e);
                zero_vector(GEMINI_DIM)
            }
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }

        match self.try_embed_batch(texts).await {
            Ok(vectors) if vectors.len() == texts.len() => vectors,
            Ok(vectors) => {
                warn!(
                    "Gemini batch returned {} embeddings for {} inputs, using zero vectors",
                    vectors.len(),
                    texts.len()
                );
                vec![zero_vector(GEMINI_DIM); texts.len()]
            }
            Err(e) => {
                warn!("Gemini batch embed failed, using zero vectors: {}", e);
                vec![zero_vector(GEMINI_DIM); texts.len()]
            }
        }
    }
}

// ============================================================================
// OpenAI
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiData {
    embedding: Vec<f32>,
    index: usize,
}

/// OpenAI `text-embedding-3-small`
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }

    /// Point at a different endpoint root (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn try_embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key);
        let response: OpenAiResponse = post_json(
            request,
            &OpenAiRequest {
                model: OPENAI_MODEL,
                input: texts,
            },
        )
        .await?;

        // Sort by index; the API does not promise response order
        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai-text-embedding-3-small"
    }

    fn dimensions(&self) -> usize {
        OPENAI_DIM
    }

    async fn embed(&self, text: &str) -> Vec<f32> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await;
        vectors.pop().unwrap_or_else(|| zero_vector(OPENAI_DIM))
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }

        match self.try_embed_batch(texts).await {
            Ok(vectors) if vectors.len() == texts.len() => {
                debug!("OpenAI embeddings: {} vectors", vectors.len());
                vectors
            }
            Ok(vectors) => {
                warn!(
                    "OpenAI returned {} embeddings for {} inputs, using zero vectors",
                    vectors.len(),
                    texts.len()
                );
                vec![zero_vector(OPENAI_DIM); texts.len()]
            }
            Err(e) => {
                warn!("OpenAI embed failed, using zero vectors: {}", e);
                vec![zero_vector(OPENAI_DIM); texts.len()]
            }
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

fn build_provider(kind: ProviderKind, config: &ProviderConfig) -> Option<Box<dyn EmbeddingProvider>> {
    match kind {
        ProviderKind::Gemini => config
            .gemini_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(|k| Box::new(GeminiProvider::new(k)) as Box<dyn EmbeddingProvider>),
        ProviderKind::OpenAi => config
            .openai_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(|k| Box::new(OpenAiProvider::new(k)) as Box<dyn EmbeddingProvider>),
        ProviderKind::Local => {
            debug!("Local embedding provider has no backend");
            None
        }
    }
}

/// Create the configured provider, trying the primary kind first and then
/// the fallback. Kinds without an API key are skipped.
pub fn create_embedding_provider(config: &ProviderConfig) -> Option<Box<dyn EmbeddingProvider>> {
    if let Some(provider) = build_provider(config.primary, config) {
        debug!("Using {} for embeddings", provider.name());
        return Some(provider);
    }

    if config.fallback != config.primary {
        if let Some(provider) = build_provider(config.fallback, config) {
            warn!(
                "{:?} embeddings unavailable, falling back to {}",
                config.primary,
                provider.name()
            );
            return Some(provider);
        }
    }

    warn!("No embedding provider available, memories are stored without embeddings");
    None
}
