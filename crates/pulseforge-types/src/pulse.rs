//! Pulse lifecycle types.
//!
//! A pulse moves through three one-way phases: `Started` (intent declared),
//! `Stopped` (reflection recorded), and `Ingested` (enhanced and persisted).
//! The pipeline consumes [`StoppedPulse`] images from the change stream and
//! produces exactly one [`IngestedPulse`] record per pulse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::UserTier;

/// Maximum length of `intent` and `reflection`, in characters.
pub const FIELD_CAP: usize = 200;

/// Maximum length of `key_insight` and `next_suggestion`, in characters.
pub const INSIGHT_CAP: usize = 240;

/// Maximum length of `mood_assessment` and `emotion_pattern`, in characters.
pub const MOOD_CAP: usize = 120;

/// Maximum length of generated titles and badges, in characters.
pub const TITLE_CAP: usize = 120;

// ── Lifecycle ────────────────────────────────────────────────────────────

/// The lifecycle phase of a pulse. Transitions are one-way and append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulsePhase {
    /// The user has declared an intent and started the timer.
    Started,
    /// The user has stopped the pulse and recorded a reflection.
    Stopped,
    /// The pipeline has enhanced and persisted the pulse.
    Ingested,
}

// ── Stopped pulse ────────────────────────────────────────────────────────

/// A fully validated stopped pulse, the unit of work for the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoppedPulse {
    /// Globally unique, opaque pulse identifier.
    pub pulse_id: String,

    /// Opaque identifier of the owning user.
    pub user_id: String,

    /// The stated intent, at most [`FIELD_CAP`] characters.
    pub intent: String,

    /// Optional short emotion tag recorded at start (e.g. "focused").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_emotion: Option<String>,

    /// When the pulse was started (UTC).
    pub start_time: DateTime<Utc>,

    /// Requested duration in seconds; always positive.
    pub duration_seconds: u32,

    /// The reflection recorded at stop, at most [`FIELD_CAP`] characters.
    /// May be empty.
    #[serde(default)]
    pub reflection: String,

    /// Optional short emotion tag recorded at stop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection_emotion: Option<String>,

    /// When the pulse was stopped (UTC).
    pub stopped_at: DateTime<Utc>,

    /// Seconds the pulse actually ran; may be shorter than requested.
    pub effective_duration_seconds: u32,
}

/// The raw stopped-pulse image as it arrives on the change stream.
///
/// Required fields are optional here so that malformed events can be
/// deserialized, inspected, and classified as poison instead of failing
/// at the serde layer. [`StoppedPulseImage::into_pulse`] performs the
/// validation that promotes an image to a [`StoppedPulse`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoppedPulseImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pulse_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_emotion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection_emotion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_duration_seconds: Option<u32>,
}

impl StoppedPulseImage {
    /// Build an image from a validated pulse (used by tooling and tests).
    pub fn from_pulse(p: &StoppedPulse) -> Self {
        Self {
            pulse_id: Some(p.pulse_id.clone()),
            user_id: Some(p.user_id.clone()),
            intent: Some(p.intent.clone()),
            intent_emotion: p.intent_emotion.clone(),
            start_time: Some(p.start_time),
            duration_seconds: Some(p.duration_seconds),
            reflection: Some(p.reflection.clone()),
            reflection_emotion: p.reflection_emotion.clone(),
            stopped_at: Some(p.stopped_at),
            effective_duration_seconds: Some(p.effective_duration_seconds),
        }
    }

    /// Validate the image and promote it to a [`StoppedPulse`].
    ///
    /// # Errors
    ///
    /// Returns [`PulseValidationError`] when a required field is absent,
    /// a text field exceeds its cap, or the requested duration is zero.
    pub fn into_pulse(self) -> Result<StoppedPulse, PulseValidationError> {
        let pulse_id = self
            .pulse_id
            .filter(|s| !s.is_empty())
            .ok_or(PulseValidationError::MissingField("pulse_id"))?;
        let user_id = self
            .user_id
            .filter(|s| !s.is_empty())
            .ok_or(PulseValidationError::MissingField("user_id"))?;
        let intent = self
            .intent
            .ok_or(PulseValidationError::MissingField("intent"))?;
        let start_time = self
            .start_time
            .ok_or(PulseValidationError::MissingField("start_time"))?;
        let stopped_at = self
            .stopped_at
            .ok_or(PulseValidationError::MissingField("stopped_at"))?;
        let duration_seconds = self
            .duration_seconds
            .ok_or(PulseValidationError::MissingField("duration_seconds"))?;
        let reflection = self.reflection.unwrap_or_default();

        check_cap("intent", &intent, FIELD_CAP)?;
        check_cap("reflection", &reflection, FIELD_CAP)?;
        if duration_seconds == 0 {
            return Err(PulseValidationError::NonPositiveDuration);
        }

        let effective_duration_seconds = self
            .effective_duration_seconds
            .unwrap_or(duration_seconds);

        Ok(StoppedPulse {
            pulse_id,
            user_id,
            intent,
            intent_emotion: self.intent_emotion,
            start_time,
            duration_seconds,
            reflection,
            reflection_emotion: self.reflection_emotion,
            stopped_at,
            effective_duration_seconds,
        })
    }
}

fn check_cap(field: &'static str, value: &str, cap: usize) -> Result<(), PulseValidationError> {
    let len = value.chars().count();
    if len > cap {
        return Err(PulseValidationError::FieldTooLong { field, len, cap });
    }
    Ok(())
}

/// Why a change-stream image could not be promoted to a pulse.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PulseValidationError {
    /// A required field was absent or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A text field exceeded its character cap.
    #[error("field {field} is {len} chars, cap is {cap}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        cap: usize,
    },

    /// The requested duration was zero.
    #[error("duration_seconds must be positive")]
    NonPositiveDuration,
}

// ── Enhancement output ──────────────────────────────────────────────────

/// Structured insights produced by the premium enhancer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiInsights {
    /// Productivity assessment on a 1-10 scale.
    pub productivity_score: u8,

    /// The single most important observation about this pulse.
    pub key_insight: String,

    /// A concrete suggestion for the next session.
    pub next_suggestion: String,

    /// Short assessment of the user's mood across the session.
    pub mood_assessment: String,

    /// Optional observation about the emotion arc (start vs. stop tag).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion_pattern: Option<String>,
}

impl AiInsights {
    /// Clamp the score into 1-10 and truncate oversized text fields.
    pub fn sanitize(mut self) -> Self {
        self.productivity_score = self.productivity_score.clamp(1, 10);
        self.key_insight = truncate_chars(&self.key_insight, INSIGHT_CAP);
        self.next_suggestion = truncate_chars(&self.next_suggestion, INSIGHT_CAP);
        self.mood_assessment = truncate_chars(&self.mood_assessment, MOOD_CAP);
        self.emotion_pattern = self
            .emotion_pattern
            .map(|p| truncate_chars(&p, MOOD_CAP));
        self
    }
}

/// Truncate `value` to at most `cap` characters, marking overflow with `…`.
pub fn truncate_chars(value: &str, cap: usize) -> String {
    if value.chars().count() <= cap {
        return value.to_string();
    }
    let mut out: String = value.chars().take(cap.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// The common output contract shared by both enhancers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedFields {
    /// Generated title, at most [`TITLE_CAP`] characters.
    pub gen_title: String,

    /// Generated badge identifier from the closed catalogue.
    pub gen_badge: String,

    /// Present only on the premium path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_insights: Option<AiInsights>,
}

// ── Selection info ──────────────────────────────────────────────────────

/// Closed set of admission decision reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// The global AI kill switch was off.
    GloballyDisabled,
    /// Committing the estimate would breach a budget window.
    BudgetExhausted,
    /// Score met the deterministic admission threshold.
    HighWorthiness,
    /// Admitted by the seeded probabilistic draw.
    Probabilistic,
    /// Score fell below the probabilistic band.
    BelowThreshold,
    /// Config or ledger was unreachable; treated as AI-disabled.
    Degraded,
    /// Admitted, but every model candidate was unavailable.
    PremiumUnavailable,
}

impl DecisionReason {
    /// The wire tag for this reason.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GloballyDisabled => "globally_disabled",
            Self::BudgetExhausted => "budget_exhausted",
            Self::HighWorthiness => "high_worthiness",
            Self::Probabilistic => "probabilistic",
            Self::BelowThreshold => "below_threshold",
            Self::Degraded => "degraded",
            Self::PremiumUnavailable => "premium_unavailable",
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Budget usage observed at decision time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetState {
    /// Cents spent in the current daily window.
    pub daily_used_cents: u32,
    /// Cents spent in the current monthly window.
    pub monthly_used_cents: u32,
    /// The user's tier at decision time.
    pub tier: UserTier,
}

/// The decision record attached to every ingested pulse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionInfo {
    /// Why the pulse took the path it took.
    pub decision_reason: DecisionReason,

    /// Worthiness score in `[0, 1]`.
    pub worthiness_score: f64,

    /// Estimated premium cost published at decision time.
    pub estimated_cost_cents: u32,

    /// Whether a wealthier budget would have produced a premium outcome.
    pub could_be_enhanced: bool,

    /// Budget usage snapshot at decision time.
    pub budget_snapshot: BudgetState,

    /// When the decision was made (UTC).
    pub decided_at: DateTime<Utc>,
}

// ── Ingested record ─────────────────────────────────────────────────────

/// The final enhanced record written by the ingest writer.
///
/// Field names are fixed and stable; the retrieval surface scans
/// `inverted_timestamp` ascending to list newest-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedPulse {
    pub pulse_id: String,
    pub user_id: String,
    pub intent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_emotion: Option<String>,
    pub reflection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection_emotion: Option<String>,
    pub start_time: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    /// Seconds the pulse actually ran.
    pub duration_seconds: u32,
    pub gen_title: String,
    pub gen_badge: String,
    pub ai_enhanced: bool,
    pub ai_cost_cents: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_insights: Option<AiInsights>,
    pub selection_info: SelectionInfo,
    /// `i64::MAX - stopped_at_millis`; ascending scan yields newest first.
    pub inverted_timestamp: i64,
}

impl IngestedPulse {
    /// Assemble the final record from a stopped pulse and its enhancement.
    ///
    /// Enforces the accounting invariant: `ai_enhanced` is true exactly
    /// when `ai_cost_cents > 0` and insights are present. Callers supply
    /// a consistent triple; an inconsistent one is a programmer error.
    ///
    /// # Panics
    ///
    /// Panics if the enhanced/cost/insights triple is inconsistent.
    pub fn assemble(
        pulse: &StoppedPulse,
        fields: EnhancedFields,
        ai_cost_cents: u32,
        selection_info: SelectionInfo,
    ) -> Self {
        let ai_enhanced = fields.ai_insights.is_some();
        assert_eq!(
            ai_enhanced,
            ai_cost_cents > 0,
            "enhancement accounting mismatch for pulse {}",
            pulse.pulse_id
        );

        Self {
            pulse_id: pulse.pulse_id.clone(),
            user_id: pulse.user_id.clone(),
            intent: pulse.intent.clone(),
            intent_emotion: pulse.intent_emotion.clone(),
            reflection: pulse.reflection.clone(),
            reflection_emotion: pulse.reflection_emotion.clone(),
            start_time: pulse.start_time,
            stopped_at: pulse.stopped_at,
            duration_seconds: pulse.effective_duration_seconds,
            gen_title: truncate_chars(&fields.gen_title, TITLE_CAP),
            gen_badge: truncate_chars(&fields.gen_badge, TITLE_CAP),
            ai_enhanced,
            ai_cost_cents,
            ai_insights: fields.ai_insights,
            selection_info,
            inverted_timestamp: inverted_timestamp(pulse.stopped_at),
        }
    }
}

/// Derive the newest-first sort key from a stop time.
pub fn inverted_timestamp(stopped_at: DateTime<Utc>) -> i64 {
    i64::MAX - stopped_at.timestamp_millis()
}
