//! HTTP client for a locally hosted Ollama-compatible model endpoint.
//!
//! Wire contract:
//!
//! - `POST {base}/api/generate` with
//!   `{"model", "prompt", "stream": false, "options": {"temperature", "top_p"}}`,
//!   answered by `{"response": "<generated text>", ...}`
//! - `GET {base}/api/tags` for liveness and model discovery
//!
//! Every attempt carries its own timeout. Timeouts, refused connections and
//! 5xx responses are retried with exponential backoff; 4xx responses fail
//! immediately.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::retry::{RetryConfig, with_retry};
use super::traits::FormulaModel;
use crate::telemetry;
use crate::types::ModelParameters;
use crate::{FormulaError, Result};

/// Default base URL for a local Ollama instance.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default model name.
pub const DEFAULT_MODEL: &str = "llama3";

/// Default per-attempt timeout for generation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// Timeout for the liveness probe.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the model endpoint.
#[derive(Clone)]
pub struct ModelClient {
    http: Client,
    base_url: String,
    model: String,
    retry: RetryConfig,
    timeout: Duration,
    ping_timeout: Duration,
}

impl ModelClient {
    /// Create a client for `model` on the default local endpoint.
    pub fn new(model: impl Into<String>) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, model)
    }

    /// Create a client with a custom base URL (also used for testing with wiremock).
    pub fn with_base_url(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(crate::version::user_agent())
            .build()
            .map_err(|e| FormulaError::Configuration(format!("failed to build HTTP client: {e}")))?;

        let base_url: String = base_url.into();
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            retry: RetryConfig::default(),
            timeout: DEFAULT_TIMEOUT,
            ping_timeout: PING_TIMEOUT,
        })
    }

    /// Set the retry policy.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Set the per-attempt timeout for generation.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the timeout for [`ping()`](Self::ping).
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Generate a completion using the configured timeout.
    pub async fn generate(&self, prompt: &str, parameters: &ModelParameters) -> Result<String> {
        self.generate_with_timeout(prompt, parameters, self.timeout)
            .await
    }

    /// Generate a completion, giving each physical attempt `timeout`.
    ///
    /// Returns the trimmed `response` text. On exhausting retries the error
    /// is [`FormulaError::RetriesExhausted`] carrying the last cause.
    pub async fn generate_with_timeout(
        &self,
        prompt: &str,
        parameters: &ModelParameters,
        timeout: Duration,
    ) -> Result<String> {
        parameters.validate()?;
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: parameters.temperature,
                top_p: parameters.top_p,
            },
        };

        let start = Instant::now();
        let result = with_retry(&self.retry, "generate", |attempt| {
            debug!(
                model = %self.model,
                attempt = attempt + 1,
                max_attempts = self.retry.max_attempts,
                "sending generation request"
            );
            self.attempt(&body, timeout)
        })
        .await;

        metrics::histogram!(telemetry::MODEL_REQUEST_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(telemetry::MODEL_REQUESTS_TOTAL, "status" => status).increment(1);
        result
    }

    async fn attempt(&self, body: &GenerateRequest<'_>, timeout: Duration) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| send_error(e, timeout))?;

        let response = check_status(response).await?;
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| send_error(e, timeout))?;

        let text = parsed.response.trim();
        if text.is_empty() {
            return Err(FormulaError::EmptyResponse);
        }
        Ok(text.to_string())
    }

    /// Whether the endpoint answers at all.
    pub async fn ping(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.http.get(&url).timeout(self.ping_timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url, error = %e, "model endpoint unreachable");
                false
            }
        }
    }

    /// Names of the models installed on the endpoint.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(self.ping_timeout)
            .send()
            .await
            .map_err(|e| match send_error(e, self.ping_timeout) {
                FormulaError::TransientNetwork(msg) => FormulaError::EndpointUnreachable(msg),
                other => other,
            })?;
        let response = check_status(response).await?;
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| FormulaError::Json(e.to_string()))?;
        let models: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
        info!(count = models.len(), "listed installed models");
        Ok(models)
    }
}

/// Map a transport failure, keeping the configured timeout for timeouts.
fn send_error(err: reqwest::Error, timeout: Duration) -> FormulaError {
    if err.is_timeout() {
        FormulaError::Timeout(timeout)
    } else if err.is_connect() {
        FormulaError::TransientNetwork(format!("connection failed: {err}"))
    } else {
        FormulaError::from(err)
    }
}

/// Check response status and map to the appropriate error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let code = status.as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or_else(|_| {
            if body.trim().is_empty() {
                status.to_string()
            } else {
                body
            }
        });

    if status.is_server_error() {
        Err(FormulaError::Server {
            status: code,
            message,
        })
    } else {
        Err(FormulaError::ClientRequest {
            status: code,
            message,
        })
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

// ============================================================================
// Provider Trait Implementation
// ============================================================================

#[async_trait]
impl FormulaModel for ModelClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, parameters: &ModelParameters) -> Result<String> {
        // Delegate to the existing method
        ModelClient::generate(self, prompt, parameters).await
    }

    async fn ping(&self) -> bool {
        ModelClient::ping(self).await
    }
}
