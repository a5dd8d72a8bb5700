//! HTTP embedding client with retry and deadline handling.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use lattice_config::{EmbeddingConfig, EmbeddingProviderKind};
use lattice_core::error::{Error, Result};
use lattice_core::traits::EmbeddingProvider;

/// Embedding client over the configured provider endpoint.
///
/// One call maps to one upstream request; `embed_batch` uses the provider's
/// batch endpoint where it has one. The base URL is overridable through
/// configuration so tests can point at a local mock server.
pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    config: EmbeddingConfig,
    base_url: String,
}

impl HttpEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::EmbeddingUnavailable(format!("failed to build http client: {e}")))?;

        let base_url = config.api_base.clone().unwrap_or_else(|| match config.provider {
            EmbeddingProviderKind::ApiKey => {
                "https://generativelanguage.googleapis.com/v1beta".to_string()
            }
            EmbeddingProviderKind::Vertex => format!(
                "https://{}-aiplatform.googleapis.com/v1",
                config.location
            ),
        });

        Ok(HttpEmbeddingClient {
            http,
            config,
            base_url,
        })
    }

    fn endpoint(&self, batch: bool) -> String {
        match self.config.provider {
            EmbeddingProviderKind::ApiKey => {
                let op = if batch { "batchEmbedContents" } else { "embedContent" };
                format!("{}/models/{}:{op}", self.base_url, self.config.model)
            }
            // Vertex :predict accepts multiple instances, so one endpoint
            EmbeddingProviderKind::Vertex => format!(
                "{}/projects/{}/locations/{}/publishers/google/models/{}:predict",
                self.base_url, self.config.project, self.config.location, self.config.model
            ),
        }
    }

    fn single_body(&self, text: &str) -> Value {
        match self.config.provider {
            EmbeddingProviderKind::ApiKey => json!({
                "content": { "parts": [{ "text": text }] }
            }),
            EmbeddingProviderKind::Vertex => json!({
                "instances": [{ "content": text }]
            }),
        }
    }

    fn batch_body(&self, texts: &[String]) -> Value {
        match self.config.provider {
            EmbeddingProviderKind::ApiKey => {
                let model = format!("models/{}", self.config.model);
                let requests: Vec<Value> = texts
                    .iter()
                    .map(|t| json!({ "model": model, "content": { "parts": [{ "text": t }] } }))
                    .collect();
                json!({ "requests": requests })
            }
            EmbeddingProviderKind::Vertex => {
                let instances: Vec<Value> = texts.iter().map(|t| json!({ "content": t })).collect();
                json!({ "instances": instances })
            }
        }
    }

    fn extract_single(&self, body: &Value) -> Result<Vec<f32>> {
        let values = match self.config.provider {
            EmbeddingProviderKind::ApiKey => body.pointer("/embedding/values"),
            EmbeddingProviderKind::Vertex => body.pointer("/predictions/0/embeddings/values"),
        };
        self.decode_values(values)
    }

    fn extract_batch(&self, body: &Value, expected: usize) -> Result<Vec<Vec<f32>>> {
        let entries = match self.config.provider {
            EmbeddingProviderKind::ApiKey => body.get("embeddings").and_then(Value::as_array),
            EmbeddingProviderKind::Vertex => body.get("predictions").and_then(Value::as_array),
        }
        .ok_or_else(|| malformed("missing embeddings array"))?;

        if entries.len() != expected {
            return Err(malformed(format!(
                "expected {expected} embeddings, got {}",
                entries.len()
            )));
        }

        entries
            .iter()
            .map(|entry| {
                let values = match self.config.provider {
                    EmbeddingProviderKind::ApiKey => entry.get("values"),
                    EmbeddingProviderKind::Vertex => entry.pointer("/embeddings/values"),
                };
                self.decode_values(values)
            })
            .collect()
    }

    fn decode_values(&self, values: Option<&Value>) -> Result<Vec<f32>> {
        let array = values
            .and_then(Value::as_array)
            .ok_or_else(|| malformed("missing embedding values"))?;
        let vector: Vec<f32> = array
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| malformed("non-numeric embedding value"))?;

        if vector.len() != self.config.dimension {
            return Err(Error::EmbeddingUnavailable(format!(
                "provider returned dimension {}, expected {}",
                vector.len(),
                self.config.dimension
            )));
        }
        Ok(vector)
    }

    /// POST `body` to `url`, retrying transient failures with exponential
    /// backoff until the attempt budget or the deadline runs out.
    async fn post_with_retry(
        &self,
        url: &str,
        body: &Value,
        deadline: Option<Instant>,
    ) -> Result<Value> {
        let attempts = self.config.max_retries + 1;
        let mut backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let mut last_error = Error::EmbeddingUnavailable("no attempts made".to_string());

        for attempt in 0..attempts {
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(Error::RetryableIo("embedding deadline exceeded".to_string()));
                }
            }

            match self.post_once(url, body, deadline).await {
                Ok(value) => return Ok(value),
                Err((error, retryable)) => {
                    if !retryable {
                        return Err(error);
                    }
                    warn!(attempt, error = %error, "embedding request failed, will retry");
                    last_error = error;
                }
            }

            if attempt + 1 < attempts {
                let sleep = match deadline {
                    Some(d) => backoff.min(d.saturating_duration_since(Instant::now())),
                    None => backoff,
                };
                tokio::time::sleep(sleep).await;
                backoff *= 2;
            }
        }

        Err(last_error)
    }

    /// One attempt. The error side carries whether a retry is worthwhile.
    async fn post_once(
        &self,
        url: &str,
        body: &Value,
        deadline: Option<Instant>,
    ) -> std::result::Result<Value, (Error, bool)> {
        let mut request = self.http.post(url).json(body);

        match self.config.provider {
            EmbeddingProviderKind::ApiKey => {
                if let Some(key) = &self.config.api_key {
                    request = request.header("x-goog-api-key", key);
                }
            }
            EmbeddingProviderKind::Vertex => {
                if let Some(token) = &self.config.auth_token {
                    request = request.bearer_auth(token);
                }
            }
        }

        // The per-attempt timeout never extends past the caller's deadline.
        if let Some(d) = deadline {
            request = request.timeout(
                d.saturating_duration_since(Instant::now())
                    .min(Duration::from_millis(self.config.timeout_ms)),
            );
        }

        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                Error::RetryableIo(format!("embedding request timed out: {e}"))
            } else {
                Error::RetryableIo(format!("embedding transport error: {e}"))
            };
            (kind, true)
        })?;

        let status = response.status();
        if status.is_success() {
            let value = response
                .json::<Value>()
                .await
                .map_err(|e| (malformed(format!("invalid response body: {e}")), false))?;
            return Ok(value);
        }

        let retryable = status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error();
        let detail = response.text().await.unwrap_or_default();
        let error = Error::EmbeddingUnavailable(format!(
            "provider returned {status}: {}",
            detail.chars().take(200).collect::<String>()
        ));
        Err((error, retryable))
    }
}

fn malformed(detail: impl std::fmt::Display) -> Error {
    Error::EmbeddingUnavailable(format!("malformed provider response: {detail}"))
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, text: &str, deadline: Option<Instant>) -> Result<Vec<f32>> {
        debug!(chars = text.len(), "embedding text");
        let url = self.endpoint(false);
        let body = self.single_body(text);
        let response = self.post_with_retry(&url, &body, deadline).await?;
        self.extract_single(&response)
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        deadline: Option<Instant>,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = texts.len(), "embedding batch");
        let url = self.endpoint(true);
        let body = self.batch_body(texts);
        let response = self.post_with_retry(&url, &body, deadline).await?;
        self.extract_batch(&response, texts.len())
    }
}
