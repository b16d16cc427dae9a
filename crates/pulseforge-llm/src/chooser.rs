//! Candidate-model selection with a sticky, TTL-bounded cache.
//!
//! [`ModelChooser`] holds an ordered list of candidate model ids (primary
//! first, universal fallback last) and probes them lazily: each invocation
//! starts from the cached working choice, advances past candidates that are
//! unavailable or not entitled, and pins whichever candidate succeeds. The
//! pin expires after a bounded TTL, after which probing restarts from the
//! primary so a recovered model is picked back up.
//!
//! The availability state machine is: trying primary -> using fallback(i)
//! -> all exhausted. The universal fallback is a stable terminal state
//! until the TTL elapses.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::client::ModelClient;
use crate::error::{ModelError, Result};
use crate::types::{ChatMessage, ChatRequest, ChatResponse};

/// A completion together with the candidate model that produced it.
#[derive(Debug, Clone)]
pub struct ChosenResponse {
    /// The model id that served the request.
    pub model_id: String,
    /// The completion.
    pub response: ChatResponse,
}

/// Cached probe position. `pinned_at` is `None` until the first success.
struct ChoiceState {
    cursor: usize,
    pinned_at: Option<Instant>,
}

/// Ordered candidate models over a single client, with failover and a
/// sticky cached choice.
pub struct ModelChooser<C> {
    client: C,
    candidates: Vec<String>,
    ttl: Duration,
    state: RwLock<ChoiceState>,
}

impl<C: ModelClient> ModelChooser<C> {
    /// Create a chooser over `candidates`, primary first.
    ///
    /// Returns `None` if the candidate list is empty.
    pub fn new(client: C, candidates: Vec<String>, ttl: Duration) -> Option<Self> {
        if candidates.is_empty() {
            return None;
        }
        Some(Self {
            client,
            candidates,
            ttl,
            state: RwLock::new(ChoiceState {
                cursor: 0,
                pinned_at: None,
            }),
        })
    }

    /// The candidate list, in probe order.
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// The currently cached candidate, if the pin is still fresh.
    pub fn cached_choice(&self) -> Option<String> {
        let state = self.state.read().expect("chooser lock poisoned");
        match state.pinned_at {
            Some(at) if at.elapsed() < self.ttl => {
                Some(self.candidates[state.cursor].clone())
            }
            _ => None,
        }
    }

    /// Execute a completion against the first available candidate.
    ///
    /// Candidates before the cached choice are skipped while the pin is
    /// fresh. Errors that are neither entitlement/availability conditions
    /// nor transient (e.g. an unparseable response body) are returned
    /// immediately without advancing the cursor: they are per-call, not
    /// per-model.
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: i32,
        temperature: f64,
    ) -> Result<ChosenResponse> {
        let start = {
            let state = self.state.read().expect("chooser lock poisoned");
            match state.pinned_at {
                Some(at) if at.elapsed() < self.ttl => state.cursor,
                _ => 0,
            }
        };

        let mut attempts: Vec<String> = Vec::new();

        for (idx, model_id) in self.candidates.iter().enumerate().skip(start) {
            let request = ChatRequest::new(model_id.clone(), messages.clone())
                .with_max_tokens(max_tokens)
                .with_temperature(temperature);

            match self.client.complete(&request).await {
                Ok(response) => {
                    if idx != start {
                        debug!(model = %model_id, "pinning fallback model");
                    }
                    let mut state = self.state.write().expect("chooser lock poisoned");
                    state.cursor = idx;
                    state.pinned_at = Some(Instant::now());
                    return Ok(ChosenResponse {
                        model_id: model_id.clone(),
                        response,
                    });
                }
                Err(err) => {
                    if !err.is_failover_eligible() {
                        return Err(err);
                    }
                    warn!(
                        model = %model_id,
                        candidate = idx,
                        total = self.candidates.len(),
                        error = %err,
                        "model candidate failed, advancing"
                    );
                    attempts.push(format!("{model_id}: {err}"));
                }
            }
        }

        Err(ModelError::AllModelsExhausted { attempts })
    }
}

impl<C> std::fmt::Debug for ModelChooser<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelChooser")
            .field("candidates", &self.candidates)
            .field("ttl", &self.ttl)
            .finish()
    }
}
