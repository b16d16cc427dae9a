//! Final persistence of enhanced pulses.
//!
//! [`IngestWriter::persist`] assembles the ingested record, writes it
//! through a conditional put that is idempotent on pulse id, updates the
//! user's aggregates with monotonic increments keyed by pulse id, and
//! emits the completion usage event. A repeated persist with identical
//! content is a no-op; a differing one is a conflict -- the existing
//! record wins and the caller acks.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use pulseforge_types::event::{AiUsageEvent, UsageOutcome};
use pulseforge_types::pulse::{DecisionReason, IngestedPulse, SelectionInfo, StoppedPulse};

use crate::audit::AuditSink;
use crate::enhance::Enhancement;
use crate::error::{PipelineError, Result};

/// Default page size for the retrieval surface's user listing.
pub const DEFAULT_PAGE_LIMIT: usize = 24;

/// Result of a conditional put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// No record existed; this one was written.
    Created,
    /// An identical record already exists; nothing was written.
    IdenticalExists,
    /// A differing record already exists; nothing was written.
    Conflict,
}

/// The backing store could not be reached.
#[derive(Error, Debug)]
#[error("store unavailable: {0}")]
pub struct StoreError(pub String);

/// Idempotent per-user aggregate counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserAggregates {
    /// Total ingested pulses.
    pub total_completed: u64,
    /// Lifetime AI-enhanced pulses.
    pub lifetime_ai_enhanced: u64,
}

/// Store of ingested pulses and user aggregates.
///
/// The retrieval surface relies on two indexes this trait guarantees: by
/// `pulse_id` for direct lookup, and by `user_id` ordered by ascending
/// `inverted_timestamp` (newest first) for listing.
#[async_trait]
pub trait PulseStore: Send + Sync {
    /// Conditional put: create the record only if none exists for this
    /// pulse id, and apply the aggregate increments in the same logical
    /// transaction.
    async fn put_ingested(&self, record: &IngestedPulse)
    -> std::result::Result<PutOutcome, StoreError>;

    /// Direct lookup by pulse id.
    async fn get(&self, pulse_id: &str)
    -> std::result::Result<Option<IngestedPulse>, StoreError>;

    /// Ingested pulses for one user, newest first. `limit` defaults to
    /// [`DEFAULT_PAGE_LIMIT`].
    async fn list_by_user(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> std::result::Result<Vec<IngestedPulse>, StoreError>;

    /// Aggregates for one user.
    async fn aggregates(&self, user_id: &str)
    -> std::result::Result<UserAggregates, StoreError>;
}

// ── In-memory store ─────────────────────────────────────────────────────

#[derive(Default)]
struct AggState {
    completed: HashSet<String>,
    enhanced: HashSet<String>,
}

/// In-memory [`PulseStore`] for tests and the single-process runner.
#[derive(Default)]
pub struct MemoryPulseStore {
    records: RwLock<HashMap<String, IngestedPulse>>,
    aggregates: RwLock<HashMap<String, AggState>>,
}

impl MemoryPulseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().expect("store lock poisoned").len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored record, newest first. For tooling and tests.
    pub fn records(&self) -> Vec<IngestedPulse> {
        let mut out: Vec<IngestedPulse> = self
            .records
            .read()
            .expect("store lock poisoned")
            .values()
            .cloned()
            .collect();
        out.sort_by_key(|r| r.inverted_timestamp);
        out
    }
}

#[async_trait]
impl PulseStore for MemoryPulseStore {
    async fn put_ingested(
        &self,
        record: &IngestedPulse,
    ) -> std::result::Result<PutOutcome, StoreError> {
        let mut records = self.records.write().expect("store lock poisoned");
        if let Some(existing) = records.get(&record.pulse_id) {
            if existing == record {
                return Ok(PutOutcome::IdenticalExists);
            }
            return Ok(PutOutcome::Conflict);
        }
        records.insert(record.pulse_id.clone(), record.clone());

        // Aggregate increments are keyed by pulse id, so a replay that
        // somehow reaches this point cannot double count.
        let mut aggregates = self.aggregates.write().expect("store lock poisoned");
        let agg = aggregates.entry(record.user_id.clone()).or_default();
        agg.completed.insert(record.pulse_id.clone());
        if record.ai_enhanced {
            agg.enhanced.insert(record.pulse_id.clone());
        }
        Ok(PutOutcome::Created)
    }

    async fn get(
        &self,
        pulse_id: &str,
    ) -> std::result::Result<Option<IngestedPulse>, StoreError> {
        Ok(self
            .records
            .read()
            .expect("store lock poisoned")
            .get(pulse_id)
            .cloned())
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> std::result::Result<Vec<IngestedPulse>, StoreError> {
        let mut out: Vec<IngestedPulse> = self
            .records
            .read()
            .expect("store lock poisoned")
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.inverted_timestamp);
        out.truncate(limit.unwrap_or(DEFAULT_PAGE_LIMIT));
        Ok(out)
    }

    async fn aggregates(
        &self,
        user_id: &str,
    ) -> std::result::Result<UserAggregates, StoreError> {
        Ok(self
            .aggregates
            .read()
            .expect("store lock poisoned")
            .get(user_id)
            .map(|agg| UserAggregates {
                total_completed: agg.completed.len() as u64,
                lifetime_ai_enhanced: agg.enhanced.len() as u64,
            })
            .unwrap_or_default())
    }
}

// ── Writer ──────────────────────────────────────────────────────────────

/// Writes the final enhanced record and emits the completion usage event.
pub struct IngestWriter {
    store: Arc<dyn PulseStore>,
    audit: Arc<dyn AuditSink>,
}

impl IngestWriter {
    pub fn new(store: Arc<dyn PulseStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Persist the fully assembled record.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Conflict`] when a differing record exists; the
    ///   existing record wins and the caller should ack.
    /// - [`PipelineError::Transient`] when the store is unreachable.
    pub async fn persist(
        &self,
        pulse: &StoppedPulse,
        enhancement: Enhancement,
        selection: SelectionInfo,
    ) -> Result<PutOutcome> {
        let outcome = usage_outcome(&enhancement, &selection);
        let meta = enhancement.premium_meta().cloned();
        let cost = enhancement.cost_cents();
        let record =
            IngestedPulse::assemble(pulse, enhancement.into_fields(), cost, selection.clone());

        let put = self
            .store
            .put_ingested(&record)
            .await
            .map_err(|err| PipelineError::Transient {
                operation: "persist",
                message: err.to_string(),
            })?;

        match put {
            PutOutcome::Created => {
                info!(
                    pulse_id = %record.pulse_id,
                    user_id = %record.user_id,
                    ai_enhanced = record.ai_enhanced,
                    cost_cents = record.ai_cost_cents,
                    reason = %selection.decision_reason,
                    "pulse ingested"
                );
                self.emit_usage_event(&record, &selection, meta, outcome)
                    .await;
                Ok(PutOutcome::Created)
            }
            PutOutcome::IdenticalExists => {
                debug!(pulse_id = %record.pulse_id, "identical record already ingested");
                Ok(PutOutcome::IdenticalExists)
            }
            PutOutcome::Conflict => {
                warn!(
                    pulse_id = %record.pulse_id,
                    "differing record already exists, keeping the existing one"
                );
                Err(PipelineError::Conflict {
                    pulse_id: record.pulse_id,
                })
            }
        }
    }

    async fn emit_usage_event(
        &self,
        record: &IngestedPulse,
        selection: &SelectionInfo,
        meta: Option<crate::enhance::PremiumMeta>,
        outcome: UsageOutcome,
    ) {
        let event = AiUsageEvent {
            user_id: record.user_id.clone(),
            pulse_id: record.pulse_id.clone(),
            decided_at: selection.decided_at,
            decision_reason: selection.decision_reason,
            score: selection.worthiness_score,
            estimated_cost_cents: selection.estimated_cost_cents,
            actual_cost_cents: meta.as_ref().map(|m| m.actual_cost_cents),
            model_id: meta.as_ref().map(|m| m.model_id.clone()),
            input_tokens: meta.as_ref().map(|m| m.input_tokens),
            output_tokens: meta.as_ref().map(|m| m.output_tokens),
            latency_ms: meta.as_ref().map(|m| m.latency_ms),
            outcome,
        };
        // Best effort: a missed audit event never fails the pulse.
        if let Err(err) = self.audit.record(event).await {
            warn!(pulse_id = %record.pulse_id, error = %err, "usage event dropped");
        }
    }
}

fn usage_outcome(enhancement: &Enhancement, selection: &SelectionInfo) -> UsageOutcome {
    if enhancement.premium_meta().is_some() {
        UsageOutcome::AdmittedEnhanced
    } else if selection.decision_reason == DecisionReason::PremiumUnavailable {
        UsageOutcome::AdmittedDegraded
    } else {
        UsageOutcome::Rejected
    }
}
