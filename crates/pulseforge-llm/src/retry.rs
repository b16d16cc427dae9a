//! Bounded retries with exponential backoff and full jitter.
//!
//! [`RetryPolicy`] wraps any [`ModelClient`] and retries transient failures
//! (throttling, timeouts, 5xx-class errors). The delay before attempt `n`
//! is drawn uniformly from `0..=min(max_delay, base_delay * 2^n)` -- full
//! jitter, so a burst of workers retrying the same throttled endpoint does
//! not retry in lockstep. The policy never extends the caller's deadline;
//! outer deadlines are applied around the whole wrapped call.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::client::ModelClient;
use crate::error::{ModelError, Result};
use crate::types::{ChatRequest, ChatResponse};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3).
    pub max_retries: u32,
    /// Base delay for the exponential schedule (default: 1 second).
    pub base_delay: Duration,
    /// Ceiling on any single delay (default: 30 seconds).
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Full-jitter delay for attempt `n` (0-indexed).
///
/// Uniformly distributed in `0..=min(max_delay, base_delay * 2^n)`. The
/// draw is seeded from the system clock's sub-second nanos; retry pacing
/// does not need reproducibility, only spread.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let base_ms = config.base_delay.as_millis() as u64;
    let cap_ms = base_ms
        .saturating_mul(exp)
        .min(config.max_delay.as_millis() as u64);

    if cap_ms == 0 {
        return Duration::ZERO;
    }
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    Duration::from_millis(seed % (cap_ms + 1))
}

/// A client wrapper that retries transient failures.
pub struct RetryPolicy<C> {
    inner: C,
    config: RetryConfig,
}

impl<C: ModelClient> RetryPolicy<C> {
    /// Wrap a client with retry logic.
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Returns the retry configuration.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns a reference to the inner client.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: ModelClient> ModelClient for RetryPolicy<C> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            match self.inner.complete(request).await {
                Ok(response) => {
                    if attempt > 0 {
                        debug!(
                            client = %self.inner.name(),
                            model = %request.model,
                            attempt,
                            "request succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if !err.is_transient() || attempt == self.config.max_retries {
                        return Err(err);
                    }

                    // Honor the endpoint's suggested wait when it is longer
                    // than the jittered draw.
                    let delay = if let ModelError::RateLimited { retry_after_ms } = &err {
                        backoff_delay(&self.config, attempt)
                            .max(Duration::from_millis(*retry_after_ms))
                    } else {
                        backoff_delay(&self.config, attempt)
                    };

                    warn!(
                        client = %self.inner.name(),
                        model = %request.model,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient error"
                    );

                    tokio::time::sleep(delay).await;
                    last_err = Some(err);
                }
            }
        }

        Err(last_err
            .unwrap_or(ModelError::RequestFailed("retry loop exhausted without error".into())))
    }
}

impl<C: std::fmt::Debug> std::fmt::Debug for RetryPolicy<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("inner", &self.inner)
            .field("config", &self.config)
            .finish()
    }
}
