//! OpenAI-compatible HTTP client.
//!
//! [`OpenAiCompatClient`] works with any endpoint that follows the OpenAI
//! chat completion format, which is what the model gateway in front of the
//! candidate models speaks. Every call carries a wall-clock timeout; the
//! gateway's HTTP status codes are mapped onto the [`ModelError`] taxonomy
//! so the retry and failover layers can classify them.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::client::ModelClient;
use crate::error::{ModelError, Result};
use crate::types::{ChatRequest, ChatResponse};

/// Connection settings for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Client name for logging (e.g. "gateway").
    pub name: String,

    /// Base URL, e.g. "https://models.internal/v1".
    pub base_url: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Per-call wall-clock timeout.
    pub timeout: Duration,
}

impl EndpointConfig {
    /// An endpoint with the default 90 s call timeout.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key_env: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key_env: api_key_env.into(),
            timeout: Duration::from_secs(90),
        }
    }

    /// Builder-style timeout override.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A [`ModelClient`] for OpenAI-compatible chat completion endpoints.
pub struct OpenAiCompatClient {
    config: EndpointConfig,
    http: reqwest::Client,
    api_key: Option<String>,
}

impl OpenAiCompatClient {
    /// Create a client; the API key is resolved from `config.api_key_env`
    /// at request time.
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            api_key: None,
        }
    }

    /// Create a client with an explicit API key, bypassing the environment.
    pub fn with_api_key(config: EndpointConfig, api_key: String) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            api_key: Some(api_key),
        }
    }

    /// Returns the endpoint configuration.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    fn resolve_api_key(&self) -> Result<String> {
        if let Some(ref key) = self.api_key {
            return Ok(key.clone());
        }
        std::env::var(&self.config.api_key_env)
            .map_err(|_| ModelError::NotConfigured(format!("set {} env var", self.config.api_key_env)))
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let api_key = self.resolve_api_key()?;
        let url = self.completions_url();

        debug!(
            client = %self.config.name,
            model = %request.model,
            messages = request.messages.len(),
            "sending chat completion request"
        );

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                let header_ms = parse_retry_after_header(&response);
                let body = response.text().await.unwrap_or_default();
                let retry_ms = header_ms
                    .or_else(|| parse_retry_after_ms(&body))
                    .unwrap_or(1000);
                warn!(
                    client = %self.config.name,
                    model = %request.model,
                    retry_after_ms = retry_ms,
                    "rate limited"
                );
                return Err(ModelError::RateLimited {
                    retry_after_ms: retry_ms,
                });
            }

            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(ModelError::NotEntitled(body));
            }
            if status.as_u16() == 404 {
                return Err(ModelError::ModelNotFound(format!(
                    "model '{}': {}",
                    request.model, body
                )));
            }
            return Err(ModelError::RequestFailed(format!("HTTP {status}: {body}")));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("failed to parse response: {e}")))?;

        debug!(
            client = %self.config.name,
            model = %chat_response.model,
            choices = chat_response.choices.len(),
            "chat completion response received"
        );

        Ok(chat_response)
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        match tokio::time::timeout(self.config.timeout, self.send(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    client = %self.config.name,
                    model = %request.model,
                    timeout_s = self.config.timeout.as_secs(),
                    "chat completion call timed out"
                );
                Err(ModelError::Timeout)
            }
        }
    }
}

/// Extract a Retry-After value (seconds or HTTP date not supported) from
/// the response headers, in milliseconds.
fn parse_retry_after_header(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|secs| secs * 1000)
}

/// Extract a retry hint from a JSON error body, in milliseconds.
fn parse_retry_after_ms(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("retry_after_ms"))
        .or_else(|| value.get("retry_after_ms"))
        .and_then(|v| v.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completions_url_normalizes_trailing_slash() {
        let client = OpenAiCompatClient::new(EndpointConfig::new(
            "gateway",
            "https://models.internal/v1/",
            "MODEL_API_KEY",
        ));
        assert_eq!(
            client.completions_url(),
            "https://models.internal/v1/chat/completions"
        );
    }

    #[test]
    fn explicit_key_bypasses_env() {
        let client = OpenAiCompatClient::with_api_key(
            EndpointConfig::new("gateway", "https://x", "UNSET_VAR_FOR_TEST"),
            "sk-test".into(),
        );
        assert_eq!(client.resolve_api_key().unwrap(), "sk-test");
    }

    #[test]
    fn missing_key_is_not_configured() {
        let client = OpenAiCompatClient::new(EndpointConfig::new(
            "gateway",
            "https://x",
            "PULSEFORGE_TEST_KEY_THAT_IS_UNSET",
        ));
        assert!(matches!(
            client.resolve_api_key().unwrap_err(),
            ModelError::NotConfigured(_)
        ));
    }

    #[test]
    fn retry_after_ms_from_body_variants() {
        assert_eq!(
            parse_retry_after_ms(r#"{"error":{"retry_after_ms":750}}"#),
            Some(750)
        );
        assert_eq!(parse_retry_after_ms(r#"{"retry_after_ms":200}"#), Some(200));
        assert_eq!(parse_retry_after_ms("not json"), None);
        assert_eq!(parse_retry_after_ms(r#"{"error":"nope"}"#), None);
    }
}
