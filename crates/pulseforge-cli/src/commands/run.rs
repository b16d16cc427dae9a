//! `pulseforge run` -- drive the pipeline over a JSONL event stream.
//!
//! Events are read one JSON object per line, either full change events
//! (`{"kind": "INSERT", "sequence": 1, "pulse": {...}}`) or bare stopped
//! pulses, which are wrapped as insertions numbered by line. The pipeline
//! runs with in-memory backends against the configured model gateway;
//! ingested records go to stdout or `--output`, and a dead-letter summary
//! is printed at the end.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pulseforge_core::admission::AdmissionController;
use pulseforge_core::audit::MemoryAuditSink;
use pulseforge_core::clock::SystemClock;
use pulseforge_core::config::{ConfigResolver, StaticConfigSource};
use pulseforge_core::enhance::premium::PremiumEnhancer;
use pulseforge_core::enhance::rules::RuleEnhancer;
use pulseforge_core::ingest::{IngestWriter, MemoryPulseStore};
use pulseforge_core::ledger::MemoryLedger;
use pulseforge_core::orchestrator::{Orchestrator, PipelineDeps};
use pulseforge_core::source::{
    ChannelEventSource, MemoryDeadLetterSink, MemoryHistoryProvider, MemoryProfileStore,
};
use pulseforge_llm::retry::{RetryConfig, RetryPolicy};
use pulseforge_llm::{EndpointConfig, ModelChooser, OpenAiCompatClient, TariffTable};
use pulseforge_types::event::ChangeEvent;
use pulseforge_types::pulse::StoppedPulseImage;
use pulseforge_types::UserProfile;

/// Environment variable holding the model gateway API key.
const GATEWAY_KEY_ENV: &str = "PULSEFORGE_GATEWAY_KEY";

#[derive(Args)]
pub struct RunArgs {
    /// JSONL file of change events; stdin when absent.
    #[arg(short, long)]
    pub events: Option<PathBuf>,

    /// TOML pipeline config; defaults apply when absent.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// JSON file with an array of user profiles.
    #[arg(long)]
    pub profiles: Option<PathBuf>,

    /// Write ingested records to this JSONL file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Model gateway base URL.
    #[arg(long, default_value = "http://127.0.0.1:8787/v1")]
    pub gateway_url: String,
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let base = super::load_config(args.config.as_deref())?;
    let clock = Arc::new(SystemClock);

    let resolver = Arc::new(ConfigResolver::new(
        Arc::new(StaticConfigSource::empty()),
        base.clone(),
    ));
    let tariffs = Arc::new(TariffTable::builtin());
    let ledger = Arc::new(MemoryLedger::new(clock.clone()));
    let store = Arc::new(MemoryPulseStore::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let dlq = Arc::new(MemoryDeadLetterSink::new());
    let history = Arc::new(MemoryHistoryProvider::new());

    let profiles = Arc::new(MemoryProfileStore::new());
    if let Some(path) = &args.profiles {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading profiles file {}", path.display()))?;
        let parsed: Vec<UserProfile> =
            serde_json::from_str(&raw).context("parsing profiles file")?;
        for profile in parsed {
            ledger.set_tz_offset(&profile.user_id, profile.tz_offset_minutes);
            profiles.insert(profile);
        }
    }

    let endpoint = EndpointConfig::new("gateway", &args.gateway_url, GATEWAY_KEY_ENV)
        .with_timeout(Duration::from_secs(base.model.timeout_seconds));
    let client = RetryPolicy::new(
        OpenAiCompatClient::new(endpoint),
        RetryConfig {
            max_retries: base.model.retry_attempts,
            ..RetryConfig::default()
        },
    );
    let chooser = ModelChooser::new(
        client,
        base.model.candidates(),
        Duration::from_secs(base.model.choice_ttl_seconds),
    )
    .context("model candidate list is empty")?;

    let admission = Arc::new(AdmissionController::new(
        resolver.clone(),
        ledger.clone(),
        tariffs.clone(),
        clock.clone(),
    ));
    let premium = Arc::new(PremiumEnhancer::new(
        chooser,
        tariffs,
        ledger.clone(),
        base.model.concurrency,
    ));
    let writer = Arc::new(IngestWriter::new(store.clone(), audit.clone()));

    let (source, tx) = ChannelEventSource::channel(256);
    let source = Arc::new(source);

    let orchestrator = Orchestrator::new(
        PipelineDeps {
            config: resolver,
            admission,
            premium,
            rules: RuleEnhancer::new(),
            writer,
            source: source.clone(),
            dlq: dlq.clone(),
            audit: audit.clone(),
            profiles,
            history,
            clock,
        },
        base.dedupe_capacity,
    );

    // Feed events from the file or stdin on a blocking reader task.
    let events_path = args.events.clone();
    let feeder = tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
        let reader: Box<dyn BufRead> = match &events_path {
            Some(path) => Box::new(std::io::BufReader::new(
                std::fs::File::open(path)
                    .with_context(|| format!("opening events file {}", path.display()))?,
            )),
            None => Box::new(std::io::stdin().lock()),
        };

        let mut sent = 0usize;
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.context("reading events")?;
            if line.trim().is_empty() {
                continue;
            }
            let event = parse_event_line(&line, line_no as u64 + 1)?;
            tx.blocking_send(event).context("pipeline stopped early")?;
            sent += 1;
        }
        Ok(sent)
    });

    let shutdown = CancellationToken::new();
    orchestrator.run(shutdown).await;
    let sent = feeder.await.context("event feeder panicked")??;

    // Emit the ingested records.
    let records = store.records();
    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("creating output file {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };
    for record in &records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;

    let envelopes = dlq.envelopes();
    info!(
        events = sent,
        ingested = records.len(),
        dead_lettered = envelopes.len(),
        usage_events = audit.events().len(),
        "run complete"
    );
    for envelope in &envelopes {
        warn!(
            sequence = envelope.event.sequence,
            error_kind = %envelope.error_kind,
            attempts = envelope.attempts,
            last_error = %envelope.last_error_message,
            "dead-lettered event"
        );
    }
    Ok(())
}

/// Parse one JSONL line: a full change event, or a bare pulse image
/// wrapped as an insertion numbered by line.
fn parse_event_line(line: &str, line_no: u64) -> anyhow::Result<ChangeEvent> {
    if let Ok(event) = serde_json::from_str::<ChangeEvent>(line) {
        return Ok(event);
    }
    let image: StoppedPulseImage = serde_json::from_str(line)
        .with_context(|| format!("line {line_no}: neither a change event nor a pulse"))?;
    Ok(ChangeEvent::insert(line_no, image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulseforge_types::event::EventKind;

    #[test]
    fn parses_full_change_event() {
        let line = r#"{"kind":"INSERT","sequence":7,"pulse":{"pulse_id":"p-1"}}"#;
        let event = parse_event_line(line, 1).unwrap();
        assert_eq!(event.sequence, 7);
        assert_eq!(event.kind, EventKind::Insert);
    }

    #[test]
    fn wraps_bare_pulse_as_insert() {
        let line = r#"{"pulse_id":"p-1","user_id":"u-1","intent":"work"}"#;
        let event = parse_event_line(line, 3).unwrap();
        assert_eq!(event.sequence, 3);
        assert_eq!(event.pulse.pulse_id.as_deref(), Some("p-1"));
    }

    #[test]
    fn rejects_garbage_lines() {
        assert!(parse_event_line("not json", 1).is_err());
    }
}
