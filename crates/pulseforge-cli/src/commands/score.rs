//! `pulseforge score` -- score one pulse and print the breakdown.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use pulseforge_core::scorer::score_pulse;
use pulseforge_types::profile::HistorySummary;
use pulseforge_types::pulse::StoppedPulse;

#[derive(Args)]
pub struct ScoreArgs {
    /// JSON file holding one stopped pulse.
    pub pulse: PathBuf,

    /// TOML pipeline config; defaults apply when absent.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Completions already recorded today.
    #[arg(long, default_value_t = 0)]
    pub completions_today: u32,

    /// AI-enhanced pulses in the trailing 7 days.
    #[arg(long, default_value_t = 0)]
    pub enhanced_last_7d: u32,

    /// Rolling mean duration in seconds.
    #[arg(long, default_value_t = 0.0)]
    pub mean_duration: f64,
}

pub fn run(args: ScoreArgs) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&args.pulse)
        .with_context(|| format!("reading pulse file {}", args.pulse.display()))?;
    let pulse: StoppedPulse = serde_json::from_str(&raw).context("parsing pulse file")?;
    let config = super::load_config(args.config.as_deref())?;

    let history = HistorySummary {
        completions_today: args.completions_today,
        ai_enhanced_last_7_days: args.enhanced_last_7d,
        mean_duration_seconds: args.mean_duration,
    };

    let breakdown = score_pulse(&pulse, &history, &config.scoring);
    println!("pulse:            {}", pulse.pulse_id);
    println!("content_effort:   {:.3}", breakdown.content_effort);
    println!("duration:         {:.3}", breakdown.duration);
    println!("reflection_depth: {:.3}", breakdown.reflection_depth);
    println!("frequency_bonus:  {:.3}", breakdown.frequency_bonus);
    println!("total:            {:.3}", breakdown.total);
    Ok(())
}
