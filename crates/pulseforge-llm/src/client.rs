//! The core [`ModelClient`] trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatRequest, ChatResponse};

/// A client that can execute chat completion requests.
///
/// Implementations handle the protocol details for a specific endpoint
/// (authentication, request formatting, response parsing). The main
/// implementation is [`OpenAiCompatClient`](crate::openai_compat::OpenAiCompatClient);
/// wrappers such as [`RetryPolicy`](crate::retry::RetryPolicy) also
/// implement it so policies compose by nesting.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Returns the client name for logging (e.g. "gateway").
    fn name(&self) -> &str;

    /// Execute a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`](crate::error::ModelError) on network issues,
    /// entitlement rejections, rate limiting, timeouts, or unparseable
    /// responses.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;
}
