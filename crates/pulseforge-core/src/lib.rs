//! Enhancement pipeline core.
//!
//! Consumes completion events for stopped pulses from a partitioned change
//! stream, decides per pulse whether to spend AI-inference budget on a
//! premium enhancement or fall back to a rule-based one, and persists a
//! single final enhanced record per pulse with at-least-once delivery,
//! bounded retries, and dead-lettering.
//!
//! Component map, leaves first:
//!
//! - [`config`] -- typed config snapshots with TTL caching.
//! - [`clock`] -- injectable time source.
//! - [`scorer`] -- pure worthiness scoring.
//! - [`ledger`] -- per-user daily/monthly budget accounting.
//! - [`admission`] -- the AI-worthiness decision.
//! - [`enhance`] -- premium (model-backed) and rule enhancers.
//! - [`ingest`] -- idempotent final writes and user aggregates.
//! - [`audit`] -- usage-event sink.
//! - [`source`] -- inbound boundaries: change stream, user directory,
//!   history reads, dead-letter sink.
//! - [`orchestrator`] -- the worker pool driving an event from `Received`
//!   to `Acked`.

pub mod admission;
pub mod audit;
pub mod clock;
pub mod config;
pub mod enhance;
pub mod error;
pub mod ingest;
pub mod json_repair;
pub mod ledger;
pub mod orchestrator;
pub mod scorer;
pub mod source;

pub use admission::{AdmissionController, Decision};
pub use audit::{AuditSink, MemoryAuditSink};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigResolver, ConfigSource, StaticConfigSource};
pub use enhance::premium::PremiumEnhancer;
pub use enhance::rules::RuleEnhancer;
pub use enhance::{Enhancement, PremiumMeta};
pub use error::{ErrorKind, PipelineError, Result};
pub use ingest::{IngestWriter, MemoryPulseStore, PulseStore, PutOutcome};
pub use ledger::{BudgetLedger, ChargeOutcome, MemoryLedger, WindowCaps};
pub use orchestrator::{Orchestrator, PipelineDeps};
pub use source::{
    ChannelEventSource, DeadLetterSink, EventSource, HistoryProvider, MemoryDeadLetterSink,
    MemoryHistoryProvider, MemoryProfileStore, ProfileStore,
};
