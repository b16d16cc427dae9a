//! `pulseforge decide` -- run the admission decision for one pulse.
//!
//! Uses an empty in-memory ledger, so the decision reflects a user with
//! untouched budget windows; useful for checking how a pulse would be
//! routed under a given config and tier.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;

use pulseforge_core::admission::AdmissionController;
use pulseforge_core::clock::SystemClock;
use pulseforge_core::config::{ConfigResolver, StaticConfigSource};
use pulseforge_core::ledger::MemoryLedger;
use pulseforge_llm::TariffTable;
use pulseforge_types::profile::{HistorySummary, UserProfile, UserTier};
use pulseforge_types::pulse::StoppedPulse;

#[derive(Args)]
pub struct DecideArgs {
    /// JSON file holding one stopped pulse.
    pub pulse: PathBuf,

    /// TOML pipeline config; defaults apply when absent.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Tier to decide under.
    #[arg(long, value_enum, default_value = "free")]
    pub tier: TierArg,

    /// Completions already recorded today.
    #[arg(long, default_value_t = 0)]
    pub completions_today: u32,
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum TierArg {
    Free,
    Premium,
    Unlimited,
}

impl From<TierArg> for UserTier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Free => UserTier::Free,
            TierArg::Premium => UserTier::Premium,
            TierArg::Unlimited => UserTier::Unlimited,
        }
    }
}

pub async fn run(args: DecideArgs) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&args.pulse)
        .with_context(|| format!("reading pulse file {}", args.pulse.display()))?;
    let pulse: StoppedPulse = serde_json::from_str(&raw).context("parsing pulse file")?;
    let base = super::load_config(args.config.as_deref())?;

    let clock = Arc::new(SystemClock);
    let resolver = Arc::new(ConfigResolver::new(
        Arc::new(StaticConfigSource::empty()),
        base,
    ));
    let controller = AdmissionController::new(
        resolver,
        Arc::new(MemoryLedger::new(clock.clone())),
        Arc::new(TariffTable::builtin()),
        clock,
    );

    let profile = UserProfile::new(&pulse.user_id).with_tier(args.tier.into());
    let history = HistorySummary {
        completions_today: args.completions_today,
        ..Default::default()
    };

    let decision = controller.decide(&pulse, &profile, &history).await;
    println!("ai_worthy:      {}", decision.ai_worthy);
    println!("reason:         {}", decision.reason);
    println!("score:          {:.3}", decision.score);
    println!("estimated_cost: {}¢", decision.estimated_cost_cents);
    println!(
        "selection_info: {}",
        serde_json::to_string_pretty(&decision.selection_info())?
    );
    Ok(())
}
