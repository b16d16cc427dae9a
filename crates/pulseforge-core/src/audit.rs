//! Usage-event audit sink.
//!
//! Every pulse that completes the pipeline produces exactly one
//! [`AiUsageEvent`] per enhancement outcome. The sink deduplicates on
//! `(pulse_id, outcome)` so at-least-once delivery upstream cannot
//! inflate the audit trail.

use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use pulseforge_types::event::{AiUsageEvent, UsageOutcome};

/// The audit sink could not be reached.
#[derive(Error, Debug)]
#[error("audit sink unavailable: {0}")]
pub struct AuditError(pub String);

/// Destination for immutable usage events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one event. Implementations deduplicate on
    /// `(pulse_id, outcome)`.
    async fn record(&self, event: AiUsageEvent) -> Result<(), AuditError>;
}

/// In-memory sink for tests and the single-process runner.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: RwLock<Vec<AiUsageEvent>>,
    seen: RwLock<HashSet<(String, UsageOutcome)>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, in arrival order.
    pub fn events(&self) -> Vec<AiUsageEvent> {
        self.events.read().expect("audit lock poisoned").clone()
    }

    /// Events for one pulse.
    pub fn for_pulse(&self, pulse_id: &str) -> Vec<AiUsageEvent> {
        self.events
            .read()
            .expect("audit lock poisoned")
            .iter()
            .filter(|e| e.pulse_id == pulse_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AiUsageEvent) -> Result<(), AuditError> {
        let key = (event.pulse_id.clone(), event.outcome);
        {
            let mut seen = self.seen.write().expect("audit lock poisoned");
            if !seen.insert(key) {
                debug!(pulse_id = %event.pulse_id, "duplicate usage event dropped");
                return Ok(());
            }
        }
        self.events
            .write()
            .expect("audit lock poisoned")
            .push(event);
        Ok(())
    }
}
