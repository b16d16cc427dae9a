//! Change-stream, audit, and dead-letter event shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pulse::{DecisionReason, StoppedPulseImage};

// ── Change stream ───────────────────────────────────────────────────────

/// Mutation kind on the stopped-pulse store. The pipeline processes
/// `Insert` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Insert,
    Modify,
    Remove,
}

/// One event from the partitioned change stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened on the source store.
    pub kind: EventKind,

    /// Monotonic sequence identifier within the event's partition.
    pub sequence: u64,

    /// Full stopped-pulse image carried with the event.
    pub pulse: StoppedPulseImage,
}

impl ChangeEvent {
    /// An insertion event carrying the given image.
    pub fn insert(sequence: u64, pulse: StoppedPulseImage) -> Self {
        Self {
            kind: EventKind::Insert,
            sequence,
            pulse,
        }
    }
}

// ── Audit ───────────────────────────────────────────────────────────────

/// Final classification of one admission-plus-enhancement pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageOutcome {
    /// Admitted and successfully premium-enhanced.
    AdmittedEnhanced,
    /// Admitted, but degraded to the rule path.
    AdmittedDegraded,
    /// Not admitted; rule path by decision.
    Rejected,
    /// The pass failed outright (dead-lettered or conflicted).
    Errored,
}

/// Immutable audit record for every admission decision and enhancement
/// outcome. Keyed by user and time at the sink; also indexable by pulse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiUsageEvent {
    pub user_id: String,
    pub pulse_id: String,
    pub decided_at: DateTime<Utc>,
    pub decision_reason: DecisionReason,
    pub score: f64,
    pub estimated_cost_cents: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_cost_cents: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub outcome: UsageOutcome,
}

// ── Dead letter ─────────────────────────────────────────────────────────

/// Envelope written to the dead-letter queue when an event cannot be
/// processed within its retry and deadline budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEnvelope {
    /// The original source event, untouched.
    pub event: ChangeEvent,

    /// Error taxonomy tag (e.g. "transient", "poison").
    pub error_kind: String,

    /// How many processing attempts were made.
    pub attempts: u32,

    /// When the pipeline first received the event.
    pub first_seen_at: DateTime<Utc>,

    /// Message of the last error observed.
    pub last_error_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_uses_uppercase_wire_tags() {
        assert_eq!(
            serde_json::to_string(&EventKind::Insert).unwrap(),
            "\"INSERT\""
        );
        let kind: EventKind = serde_json::from_str("\"REMOVE\"").unwrap();
        assert_eq!(kind, EventKind::Remove);
    }

    #[test]
    fn usage_outcome_wire_tags() {
        assert_eq!(
            serde_json::to_string(&UsageOutcome::AdmittedEnhanced).unwrap(),
            "\"admitted_enhanced\""
        );
        assert_eq!(
            serde_json::to_string(&UsageOutcome::AdmittedDegraded).unwrap(),
            "\"admitted_degraded\""
        );
    }

    #[test]
    fn change_event_round_trip() {
        let event = ChangeEvent::insert(42, StoppedPulseImage::default());
        let json = serde_json::to_string(&event).unwrap();
        let back: ChangeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.sequence, 42);
    }

    #[test]
    fn usage_event_omits_absent_optionals() {
        let event = AiUsageEvent {
            user_id: "u-1".into(),
            pulse_id: "p-1".into(),
            decided_at: Utc::now(),
            decision_reason: DecisionReason::BelowThreshold,
            score: 0.1,
            estimated_cost_cents: 1,
            actual_cost_cents: None,
            model_id: None,
            input_tokens: None,
            output_tokens: None,
            latency_ms: None,
            outcome: UsageOutcome::Rejected,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("actual_cost_cents"));
        assert!(!json.contains("model_id"));
    }
}
