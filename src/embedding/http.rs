//! Embedder for OpenAI-compatible `/v1/embeddings` endpoints.
//!
//! Works with the OpenAI API and with local servers that speak the same
//! protocol (LM Studio, vLLM, Ollama, text-embeddings-inference).

use super::{Embedder, normalize_in_place};
use crate::{Error, Result};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP embedder configuration.
#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    /// Full URL of the embeddings endpoint.
    pub endpoint: String,
    /// Bearer token, if the endpoint needs one.
    pub api_key: Option<SecretString>,
    /// Model name sent with each request.
    pub model: String,
    /// Expected vector length.
    pub dimensions: usize,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Texts per HTTP request.
    pub max_batch_size: usize,
}

impl Default for HttpEmbedderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            timeout_secs: 30,
            max_batch_size: 100,
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    encoding_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

fn http_error(cause: impl Into<String>) -> Error {
    Error::OperationFailed {
        operation: "embed_http".to_string(),
        cause: cause.into(),
    }
}

/// Blocking HTTP embedder.
#[derive(Debug)]
pub struct HttpEmbedder {
    client: Client,
    config: HttpEmbedderConfig,
}

impl HttpEmbedder {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the client cannot
    /// be built.
    pub fn new(config: HttpEmbedderConfig) -> Result<Self> {
        if config.max_batch_size == 0 {
            return Err(Error::InvalidInput(
                "embedding max_batch_size must be positive".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key.expose_secret()))
                .map_err(|e| Error::InvalidInput(format!("Invalid API key format: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        } else if config.endpoint.contains("openai.com") {
            tracing::warn!(endpoint = %config.endpoint, "No API key configured for embedding endpoint");
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| http_error(format!("Failed to build HTTP client: {e}")))?;

        tracing::info!(
            endpoint = %config.endpoint,
            model = %config.model,
            dimensions = config.dimensions,
            "HTTP embedder initialized"
        );
        Ok(Self { client, config })
    }

    fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            // Only the text-embedding-3 family accepts a dimensions override.
            dimensions: self
                .config
                .model
                .contains("text-embedding-3")
                .then_some(self.config.dimensions),
            encoding_format: "float",
        };

        tracing::debug!(endpoint = %self.config.endpoint, texts = texts.len(), "Requesting embeddings");
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .map_err(|e| http_error(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map_or(body, |parsed| parsed.error.message);
            return Err(http_error(format!("HTTP {status}: {message}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| http_error(format!("Failed to parse response: {e}")))?;
        if parsed.data.len() != texts.len() {
            return Err(http_error(format!(
                "expected {} embeddings, received {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data
            .into_iter()
            .map(|d| {
                let mut embedding = d.embedding;
                normalize_in_place(&mut embedding);
                embedding
            })
            .collect())
    }
}

impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request(&[text])?
            .pop()
            .ok_or_else(|| http_error("empty embedding response"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.max_batch_size) {
            out.extend(self.request(chunk)?);
        }
        Ok(out)
    }
}
