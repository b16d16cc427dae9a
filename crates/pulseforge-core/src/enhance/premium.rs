//! Premium (model-backed) enhancement.
//!
//! Builds a fixed prompt from the pulse fields, invokes the first
//! available candidate model through the chooser, parses the structured
//! response with a single repair pass, reconciles the actual cost against
//! the budget ledger, and returns the enhancement with its cost and model
//! metadata. User-supplied content is interpolated as data only; it never
//! alters the template structure.
//!
//! An upstream token bucket bounds concurrent model calls; waiting workers
//! count against the event deadline, never extend it.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use pulseforge_llm::{ChatMessage, ModelChooser, ModelClient, TariffTable, Usage};
use pulseforge_types::pulse::{AiInsights, EnhancedFields, StoppedPulse, TITLE_CAP, truncate_chars};
use serde::Deserialize;

use crate::admission::Decision;
use crate::enhance::{Enhancement, MAX_OUTPUT_TOKENS, PremiumMeta};
use crate::error::{PipelineError, Result};
use crate::json_repair::parse_with_repair;
use crate::ledger::{BudgetLedger, ChargeOutcome, WindowCaps};

/// Fixed prompt overhead in characters; the admission-time estimate adds
/// this to the pulse field lengths.
pub const PROMPT_OVERHEAD_CHARS: usize = 600;

const SYSTEM_PROMPT: &str = "You review short, intention-scoped focus sessions. \
Given a session's intent, reflection, duration, and emotion tags, respond with \
a single JSON object and nothing else:\n\
{\"gen_title\": \"short title for the session\", \
\"gen_badge\": \"snake_case badge id\", \
\"insights\": {\"productivity_score\": 1-10, \
\"key_insight\": \"the single most important observation\", \
\"next_suggestion\": \"one concrete suggestion for the next session\", \
\"mood_assessment\": \"short mood read\", \
\"emotion_pattern\": \"optional note on the emotion arc, or null\"}}";

/// The expected shape of the model's JSON reply. Numbers arrive however
/// the model felt like emitting them, so the score is taken as a float
/// and clamped later.
#[derive(Debug, Deserialize)]
struct RawReply {
    gen_title: String,
    gen_badge: String,
    insights: RawInsights,
}

#[derive(Debug, Deserialize)]
struct RawInsights {
    productivity_score: f64,
    key_insight: String,
    next_suggestion: String,
    mood_assessment: String,
    #[serde(default)]
    emotion_pattern: Option<String>,
}

/// Model-backed enhancer with rate limiting and cost reconciliation.
pub struct PremiumEnhancer<C> {
    chooser: ModelChooser<C>,
    tariffs: Arc<TariffTable>,
    ledger: Arc<dyn BudgetLedger>,
    limiter: Arc<Semaphore>,
    temperature: f64,
}

impl<C: ModelClient> PremiumEnhancer<C> {
    /// Create an enhancer with an upstream concurrency limit.
    pub fn new(
        chooser: ModelChooser<C>,
        tariffs: Arc<TariffTable>,
        ledger: Arc<dyn BudgetLedger>,
        concurrency: usize,
    ) -> Self {
        Self {
            chooser,
            tariffs,
            ledger,
            limiter: Arc::new(Semaphore::new(concurrency.max(1))),
            temperature: 0.3,
        }
    }

    /// Produce a premium enhancement for an admitted pulse.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::PremiumUnavailable`] when every candidate model
    ///   is unavailable or entitlement is denied.
    /// - [`PipelineError::Parse`] when the response defeats the repair
    ///   pass; the orchestrator treats this like premium-unavailable.
    /// - [`PipelineError::DeadlineExceeded`] when the event deadline
    ///   passes while waiting on the token bucket or the model.
    /// - [`PipelineError::Transient`] for retryable ledger trouble.
    pub async fn enhance(
        &self,
        pulse: &StoppedPulse,
        decision: &Decision,
        caps: &WindowCaps,
        deadline: tokio::time::Instant,
    ) -> Result<Enhancement> {
        let _permit = tokio::time::timeout_at(deadline, self.limiter.acquire())
            .await
            .map_err(|_| PipelineError::DeadlineExceeded {
                operation: "model_rate_limit",
            })?
            .map_err(|_| PipelineError::Fatal("model limiter closed".into()))?;

        let messages = build_prompt(pulse);
        let started = Instant::now();

        let chosen = tokio::time::timeout_at(
            deadline,
            self.chooser
                .complete(messages, MAX_OUTPUT_TOKENS as i32, self.temperature),
        )
        .await
        .map_err(|_| PipelineError::DeadlineExceeded {
            operation: "model_call",
        })??;

        let latency_ms = started.elapsed().as_millis() as u64;
        let model_id = chosen.model_id;

        let text = chosen
            .response
            .first_text()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| PipelineError::Parse("empty model response".into()))?
            .to_string();

        let (fields, insights) = parse_reply(&pulse.pulse_id, &text)?;

        // Reconcile actual cost from reported usage; estimate it from text
        // lengths when the gateway omitted usage.
        let usage = chosen.response.usage.unwrap_or_else(|| {
            let prompt_tokens = ((PROMPT_OVERHEAD_CHARS
                + pulse.intent.chars().count()
                + pulse.reflection.chars().count())
                / 4) as u32;
            let completion_tokens = (text.chars().count() / 4) as u32;
            Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }
        });
        let actual_cost_cents = self.tariffs.cost_cents(&model_id, &usage).max(1);

        self.charge(pulse, actual_cost_cents, caps).await?;

        info!(
            pulse_id = %pulse.pulse_id,
            user_id = %pulse.user_id,
            model = %model_id,
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            cost_cents = actual_cost_cents,
            estimated_cents = decision.estimated_cost_cents,
            latency_ms,
            "premium enhancement complete"
        );

        Ok(Enhancement::Premium {
            fields: EnhancedFields {
                gen_title: fields.0,
                gen_badge: fields.1,
                ai_insights: Some(insights),
            },
            meta: PremiumMeta {
                model_id,
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                latency_ms,
                actual_cost_cents,
            },
        })
    }

    /// Charge the ledger, idempotent on pulse id, with a small internal
    /// retry for contention. A cap refusal here means admission raced a
    /// concurrent spend; the enhancement already happened, so it is kept
    /// and the overrun is surfaced as an alert.
    async fn charge(&self, pulse: &StoppedPulse, cents: u32, caps: &WindowCaps) -> Result<()> {
        let mut last = String::new();
        for attempt in 0..3 {
            match self
                .ledger
                .charge(&pulse.user_id, cents, &pulse.pulse_id, caps)
                .await
            {
                Ok(ChargeOutcome::Applied) => return Ok(()),
                Ok(ChargeOutcome::Duplicate) => {
                    debug!(pulse_id = %pulse.pulse_id, "charge already recorded, replay");
                    return Ok(());
                }
                Ok(ChargeOutcome::CapExceeded { window }) => {
                    error!(
                        pulse_id = %pulse.pulse_id,
                        user_id = %pulse.user_id,
                        cents,
                        ?window,
                        "budget overrun: enhancement spent past the cap"
                    );
                    return Ok(());
                }
                Err(err) => {
                    last = err.to_string();
                    if attempt < 2 {
                        tokio::time::sleep(std::time::Duration::from_millis(25 << attempt)).await;
                    }
                }
            }
        }
        Err(PipelineError::Transient {
            operation: "ledger_charge",
            message: last,
        })
    }
}

/// Build the fixed two-message prompt. Pulse fields are data.
fn build_prompt(pulse: &StoppedPulse) -> Vec<ChatMessage> {
    let user = format!(
        "Intent: {}\nReflection: {}\nPlanned seconds: {}\nActual seconds: {}\nEmotion at start: {}\nEmotion at stop: {}",
        pulse.intent,
        if pulse.reflection.is_empty() {
            "(none)"
        } else {
            &pulse.reflection
        },
        pulse.duration_seconds,
        pulse.effective_duration_seconds,
        pulse.intent_emotion.as_deref().unwrap_or("(none)"),
        pulse.reflection_emotion.as_deref().unwrap_or("(none)"),
    );
    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)]
}

/// Parse the model reply, one repair pass allowed. Enforces field caps
/// and clamps the productivity score.
fn parse_reply(pulse_id: &str, text: &str) -> Result<((String, String), AiInsights)> {
    let value = parse_with_repair(text).map_err(|err| {
        warn!(pulse_id, payload = %text, "unparseable premium reply");
        PipelineError::Parse(format!("{err}; payload: {}", truncate_chars(text, 160)))
    })?;

    let reply: RawReply = serde_json::from_value(value).map_err(|err| {
        warn!(pulse_id, payload = %text, "premium reply missing required fields");
        PipelineError::Parse(format!("{err}; payload: {}", truncate_chars(text, 160)))
    })?;

    let insights = AiInsights {
        productivity_score: reply.insights.productivity_score.round().clamp(1.0, 10.0) as u8,
        key_insight: reply.insights.key_insight,
        next_suggestion: reply.insights.next_suggestion,
        mood_assessment: reply.insights.mood_assessment,
        emotion_pattern: reply.insights.emotion_pattern,
    }
    .sanitize();

    Ok((
        (
            truncate_chars(reply.gen_title.trim(), TITLE_CAP),
            truncate_chars(reply.gen_badge.trim(), TITLE_CAP),
        ),
        insights,
    ))
}
