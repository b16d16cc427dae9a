//! Inbound boundaries.
//!
//! The pipeline's external collaborators appear here as traits: the
//! partitioned change stream of stopped pulses, the user directory and
//! history reads the admission controller needs, and the dead-letter sink
//! for events the pipeline cannot process. Channel- and memory-backed
//! implementations serve tests and the single-process runner.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

use pulseforge_types::event::{ChangeEvent, DeadLetterEnvelope};
use pulseforge_types::profile::{HistorySummary, UserProfile};

use crate::ingest::StoreError;

// ── Change stream ───────────────────────────────────────────────────────

/// The ordered, partitioned change stream of stopped pulses.
///
/// `recv` yields the next event for this consumer or `None` when the
/// stream has closed. Events must be acknowledged by sequence once fully
/// processed or dead-lettered; unacked events are redelivered after a
/// restart.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// The next event, or `None` when the stream is closed.
    async fn recv(&self) -> Option<ChangeEvent>;

    /// Acknowledge an event by its sequence identifier.
    async fn ack(&self, sequence: u64);
}

/// An [`EventSource`] over a bounded in-process channel.
pub struct ChannelEventSource {
    rx: Mutex<mpsc::Receiver<ChangeEvent>>,
    acked: RwLock<Vec<u64>>,
}

impl ChannelEventSource {
    /// Create a source and the sender that feeds it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Sender<ChangeEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                rx: Mutex::new(rx),
                acked: RwLock::new(Vec::new()),
            },
            tx,
        )
    }

    /// Sequences acknowledged so far, in ack order.
    pub fn acked(&self) -> Vec<u64> {
        self.acked.read().expect("source lock poisoned").clone()
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn recv(&self) -> Option<ChangeEvent> {
        self.rx.lock().await.recv().await
    }

    async fn ack(&self, sequence: u64) {
        self.acked
            .write()
            .expect("source lock poisoned")
            .push(sequence);
    }
}

// ── Dead letter ─────────────────────────────────────────────────────────

/// The dead-letter queue could not be written.
#[derive(Error, Debug)]
#[error("dead-letter write failed: {0}")]
pub struct DlqError(pub String);

/// Destination for events the pipeline gives up on. Drained by operator
/// tooling, never by the pipeline itself.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Append one envelope. The source event is only acked after this
    /// succeeds.
    async fn push(&self, envelope: DeadLetterEnvelope) -> Result<(), DlqError>;
}

/// In-memory dead-letter sink.
#[derive(Default)]
pub struct MemoryDeadLetterSink {
    envelopes: RwLock<Vec<DeadLetterEnvelope>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All envelopes pushed so far.
    pub fn envelopes(&self) -> Vec<DeadLetterEnvelope> {
        self.envelopes.read().expect("dlq lock poisoned").clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn push(&self, envelope: DeadLetterEnvelope) -> Result<(), DlqError> {
        self.envelopes
            .write()
            .expect("dlq lock poisoned")
            .push(envelope);
        Ok(())
    }
}

// ── User context reads ──────────────────────────────────────────────────

/// Read-only access to user profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// The profile for a user, or `None` when unknown.
    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;
}

/// Read-only access to the per-user history summary.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Light history for the scorer. Callers fall back to zeros when this
    /// fails.
    async fn history(&self, user_id: &str) -> Result<HistorySummary, StoreError>;
}

/// In-memory profile directory.
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<String, UserProfile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile.
    pub fn insert(&self, profile: UserProfile) {
        self.profiles
            .write()
            .expect("profiles lock poisoned")
            .insert(profile.user_id.clone(), profile);
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self
            .profiles
            .read()
            .expect("profiles lock poisoned")
            .get(user_id)
            .cloned())
    }
}

/// In-memory history provider.
#[derive(Default)]
pub struct MemoryHistoryProvider {
    histories: RwLock<HashMap<String, HistorySummary>>,
}

impl MemoryHistoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user's history summary.
    pub fn insert(&self, user_id: &str, history: HistorySummary) {
        self.histories
            .write()
            .expect("history lock poisoned")
            .insert(user_id.to_string(), history);
    }
}

#[async_trait]
impl HistoryProvider for MemoryHistoryProvider {
    async fn history(&self, user_id: &str) -> Result<HistorySummary, StoreError> {
        Ok(self
            .histories
            .read()
            .expect("history lock poisoned")
            .get(user_id)
            .copied()
            .unwrap_or_default())
    }
}
