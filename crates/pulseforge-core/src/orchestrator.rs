//! The pipeline orchestrator.
//!
//! A fleet of workers consumes the change stream and drives each event
//! through `Received -> Decided -> Enhanced -> Persisted -> Acked`.
//! Failures are classified by [`ErrorKind`]: transient ones retry with
//! backoff and full jitter at the enhancer and writer boundaries (never
//! inside the pure scorer or rule enhancer), premium-unavailable and
//! parse failures degrade the event to the rule path, conflicts ack in
//! favor of the existing record, poison events dead-letter immediately,
//! and an event that cannot be ingested within its wall-clock budget is
//! dead-lettered even if retries remain. The source event is never acked
//! before the dead-letter write succeeds.
//!
//! Concurrency is bounded by the worker pool: when the premium enhancer
//! is slow, the pool saturates and new events wait in the source. No
//! in-process queue grows without bound. A crashed worker is restarted by
//! its supervisor; the in-flight event returns to the source unacked.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pulseforge_llm::ModelClient;
use pulseforge_llm::retry::{RetryConfig, backoff_delay};
use pulseforge_types::event::{AiUsageEvent, ChangeEvent, DeadLetterEnvelope, EventKind, UsageOutcome};
use pulseforge_types::profile::{HistorySummary, UserProfile};
use pulseforge_types::pulse::{DecisionReason, SelectionInfo, StoppedPulse};
use pulseforge_types::PipelineConfig;

use crate::admission::{AdmissionController, Decision};
use crate::audit::AuditSink;
use crate::clock::Clock;
use crate::config::ConfigResolver;
use crate::enhance::premium::PremiumEnhancer;
use crate::enhance::rules::RuleEnhancer;
use crate::enhance::Enhancement;
use crate::error::{ErrorKind, PipelineError};
use crate::ingest::{IngestWriter, PutOutcome};
use crate::ledger::WindowCaps;
use crate::source::{DeadLetterSink, EventSource, HistoryProvider, ProfileStore};

/// Everything the orchestrator drives, assembled by the caller.
pub struct PipelineDeps<C> {
    pub config: Arc<ConfigResolver>,
    pub admission: Arc<AdmissionController>,
    pub premium: Arc<PremiumEnhancer<C>>,
    pub rules: RuleEnhancer,
    pub writer: Arc<IngestWriter>,
    pub source: Arc<dyn EventSource>,
    pub dlq: Arc<dyn DeadLetterSink>,
    pub audit: Arc<dyn AuditSink>,
    pub profiles: Arc<dyn ProfileStore>,
    pub history: Arc<dyn HistoryProvider>,
    pub clock: Arc<dyn Clock>,
}

/// The worker pool driving events from the change stream to ingestion.
pub struct Orchestrator<C> {
    deps: PipelineDeps<C>,
    recent: Mutex<RecentIds>,
}

impl<C: ModelClient + 'static> Orchestrator<C> {
    /// Assemble an orchestrator. The dedupe LRU is sized from the config
    /// resolver's base snapshot.
    pub fn new(deps: PipelineDeps<C>, dedupe_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            deps,
            recent: Mutex::new(RecentIds::new(dedupe_capacity)),
        })
    }

    /// Run the worker pool until the source closes or `shutdown` fires.
    ///
    /// Each worker slot has a supervisor: a panicking worker (a `Fatal`
    /// error) is restarted, and its in-flight event returns to the source
    /// unacked.
    pub async fn run(self: &Arc<Self>, shutdown: CancellationToken) {
        let config = self.effective_config().await;
        let workers = config.worker_concurrency.max(1);
        info!(workers, "pipeline starting");

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let this = Arc::clone(self);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let task_this = Arc::clone(&this);
                    let task_shutdown = shutdown.clone();
                    let task = tokio::spawn(async move {
                        task_this.worker_loop(worker_id, task_shutdown).await;
                    });
                    match task.await {
                        Ok(()) => break,
                        Err(join_err) => {
                            if shutdown.is_cancelled() {
                                break;
                            }
                            error!(worker_id, error = %join_err, "worker crashed, restarting");
                        }
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        info!("pipeline stopped");
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize, shutdown: CancellationToken) {
        debug!(worker_id, "worker started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                maybe = self.deps.source.recv() => match maybe {
                    Some(event) => self.process(event).await,
                    None => break,
                },
            }
        }
        debug!(worker_id, "worker stopped");
    }

    /// Drive one event through the state machine. Never returns an error;
    /// every failure path ends in degrade, dead-letter, or redelivery.
    async fn process(&self, event: ChangeEvent) {
        if event.kind != EventKind::Insert {
            debug!(sequence = event.sequence, kind = ?event.kind, "ignoring non-insert event");
            self.deps.source.ack(event.sequence).await;
            return;
        }

        // Received.
        let first_seen = self.deps.clock.now();
        let config = self.effective_config().await;
        let deadline = Instant::now() + Duration::from_secs(config.event_deadline_seconds);
        let mut attempts: u32 = 1;

        let pulse = match event.pulse.clone().into_pulse() {
            Ok(pulse) => pulse,
            Err(validation) => {
                let err = PipelineError::from(validation);
                warn!(sequence = event.sequence, error = %err, "poison event");
                // Straight to the dead-letter queue; no downstream calls.
                self.fail_event(&event, None, &err, attempts, first_seen).await;
                return;
            }
        };

        if self.recently_processed(&pulse.pulse_id) {
            debug!(pulse_id = %pulse.pulse_id, "duplicate delivery, already processed");
            self.deps.source.ack(event.sequence).await;
            return;
        }

        let profile = self.load_profile(&pulse.user_id).await;
        let history = self.load_history(&pulse.user_id).await;

        // Decided.
        let decision = self.deps.admission.decide(&pulse, &profile, &history).await;
        debug!(
            pulse_id = %pulse.pulse_id,
            ai_worthy = decision.ai_worthy,
            reason = %decision.reason,
            score = decision.score,
            "admission decided"
        );

        // Enhanced.
        let mut selection = decision.selection_info();
        let enhancement = if decision.ai_worthy {
            let caps = WindowCaps::from(config.tiers.for_tier(profile.tier));
            match self
                .premium_with_retries(&pulse, &decision, &caps, deadline, &config, &mut attempts)
                .await
            {
                Ok(enhancement) => enhancement,
                Err(err)
                    if matches!(err.kind(), ErrorKind::PremiumUnavailable | ErrorKind::Parse) =>
                {
                    warn!(
                        pulse_id = %pulse.pulse_id,
                        error = %err,
                        "premium unavailable, degrading to rule path"
                    );
                    selection.decision_reason = DecisionReason::PremiumUnavailable;
                    Enhancement::Rule {
                        fields: self.deps.rules.enhance(&pulse, profile.tier),
                    }
                }
                Err(err) => {
                    self.fail_event(&event, Some((&pulse, &decision)), &err, attempts, first_seen)
                        .await;
                    return;
                }
            }
        } else {
            Enhancement::Rule {
                fields: self.deps.rules.enhance(&pulse, profile.tier),
            }
        };

        // Persisted.
        match self
            .persist_with_retries(&pulse, enhancement, selection, deadline, &config, &mut attempts)
            .await
        {
            Ok(_) => {
                // Acked.
                self.deps.source.ack(event.sequence).await;
                self.remember(&pulse.pulse_id);
            }
            Err(err) if err.kind() == ErrorKind::Conflict => {
                // The existing record wins; ack without retry.
                warn!(pulse_id = %pulse.pulse_id, "conflicting record, acking in favor of existing");
                self.deps.source.ack(event.sequence).await;
                self.remember(&pulse.pulse_id);
            }
            Err(err) => {
                self.fail_event(&event, Some((&pulse, &decision)), &err, attempts, first_seen)
                    .await;
            }
        }
    }

    async fn premium_with_retries(
        &self,
        pulse: &StoppedPulse,
        decision: &Decision,
        caps: &WindowCaps,
        deadline: Instant,
        config: &PipelineConfig,
        attempts: &mut u32,
    ) -> crate::error::Result<Enhancement> {
        let mut step_attempt = 0u32;
        loop {
            if Instant::now() >= deadline {
                return Err(PipelineError::DeadlineExceeded {
                    operation: "enhance",
                });
            }
            match self.deps.premium.enhance(pulse, decision, caps, deadline).await {
                Ok(enhancement) => return Ok(enhancement),
                Err(err) => {
                    step_attempt += 1;
                    *attempts += 1;
                    if err.kind() != ErrorKind::Transient
                        || step_attempt > config.step_retry_attempts
                        || Instant::now() >= deadline
                    {
                        return Err(err);
                    }
                    let delay = step_delay(step_attempt - 1);
                    warn!(
                        pulse_id = %pulse.pulse_id,
                        attempt = step_attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying premium enhancement"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn persist_with_retries(
        &self,
        pulse: &StoppedPulse,
        enhancement: Enhancement,
        selection: SelectionInfo,
        deadline: Instant,
        config: &PipelineConfig,
        attempts: &mut u32,
    ) -> crate::error::Result<PutOutcome> {
        let mut step_attempt = 0u32;
        loop {
            if Instant::now() >= deadline {
                return Err(PipelineError::DeadlineExceeded {
                    operation: "persist",
                });
            }
            match self
                .deps
                .writer
                .persist(pulse, enhancement.clone(), selection.clone())
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    step_attempt += 1;
                    *attempts += 1;
                    if err.kind() != ErrorKind::Transient
                        || step_attempt > config.step_retry_attempts
                        || Instant::now() >= deadline
                    {
                        return Err(err);
                    }
                    let delay = step_delay(step_attempt - 1);
                    warn!(
                        pulse_id = %pulse.pulse_id,
                        attempt = step_attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying persist"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Dead-letter an event, then ack it. The ack only happens after the
    /// envelope is durably written; when the dead-letter sink itself is
    /// down, the event is left unacked for redelivery.
    async fn fail_event(
        &self,
        event: &ChangeEvent,
        context: Option<(&StoppedPulse, &Decision)>,
        err: &PipelineError,
        attempts: u32,
        first_seen: chrono::DateTime<chrono::Utc>,
    ) {
        error!(
            sequence = event.sequence,
            error_kind = %err.kind(),
            attempts,
            error = %err,
            "dead-lettering event"
        );
        let envelope = DeadLetterEnvelope {
            event: event.clone(),
            error_kind: err.kind().as_str().to_string(),
            attempts,
            first_seen_at: first_seen,
            last_error_message: err.to_string(),
        };

        for attempt in 0..3u32 {
            match self.deps.dlq.push(envelope.clone()).await {
                Ok(()) => {
                    if let Some((pulse, decision)) = context {
                        self.emit_errored(pulse, decision).await;
                    }
                    self.deps.source.ack(event.sequence).await;
                    return;
                }
                Err(dlq_err) => {
                    warn!(attempt, error = %dlq_err, "dead-letter write failed");
                    tokio::time::sleep(Duration::from_millis(50 << attempt)).await;
                }
            }
        }
        error!(
            sequence = event.sequence,
            "dead-letter sink unavailable; leaving event unacked for redelivery"
        );
    }

    async fn emit_errored(&self, pulse: &StoppedPulse, decision: &Decision) {
        let event = AiUsageEvent {
            user_id: pulse.user_id.clone(),
            pulse_id: pulse.pulse_id.clone(),
            decided_at: decision.decided_at,
            decision_reason: decision.reason,
            score: decision.score,
            estimated_cost_cents: decision.estimated_cost_cents,
            actual_cost_cents: None,
            model_id: None,
            input_tokens: None,
            output_tokens: None,
            latency_ms: None,
            outcome: UsageOutcome::Errored,
        };
        if let Err(err) = self.deps.audit.record(event).await {
            warn!(pulse_id = %pulse.pulse_id, error = %err, "errored usage event dropped");
        }
    }

    async fn load_profile(&self, user_id: &str) -> UserProfile {
        match self.deps.profiles.profile(user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => UserProfile::new(user_id),
            Err(err) => {
                warn!(user_id, error = %err, "profile read failed, defaulting to free tier");
                UserProfile::new(user_id)
            }
        }
    }

    async fn load_history(&self, user_id: &str) -> HistorySummary {
        match self.deps.history.history(user_id).await {
            Ok(history) => history,
            Err(err) => {
                warn!(user_id, error = %err, "history read failed, scoring with zeros");
                HistorySummary::default()
            }
        }
    }

    async fn effective_config(&self) -> Arc<PipelineConfig> {
        match self.deps.config.snapshot().await {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %err, "config degraded, running on defaults");
                Arc::new(PipelineConfig::default())
            }
        }
    }

    fn recently_processed(&self, pulse_id: &str) -> bool {
        self.recent
            .lock()
            .expect("dedupe lock poisoned")
            .contains(pulse_id)
    }

    fn remember(&self, pulse_id: &str) {
        self.recent
            .lock()
            .expect("dedupe lock poisoned")
            .insert(pulse_id);
    }
}

/// Step-retry backoff: exponential from 200 ms, capped at 5 s, full
/// jitter via the shared delay helper.
fn step_delay(attempt: u32) -> Duration {
    backoff_delay(
        &RetryConfig {
            max_retries: u32::MAX,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        },
        attempt,
    )
}

// ── Dedupe LRU ──────────────────────────────────────────────────────────

/// Bounded set of recently processed pulse ids, evicting oldest-inserted
/// first. The writer's idempotency is the durable guard; this only spares
/// redundant work on short-window redelivery.
struct RecentIds {
    set: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.set.contains(id)
    }

    fn insert(&mut self, id: &str) {
        if !self.set.insert(id.to_string()) {
            return;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
    }
}
