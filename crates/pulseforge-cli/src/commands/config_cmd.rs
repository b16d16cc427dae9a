//! `pulseforge config` -- print the resolved pipeline configuration.

use std::path::PathBuf;

use clap::Args;

#[derive(Args)]
pub struct ConfigArgs {
    /// TOML pipeline config; defaults apply when absent.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print JSON instead of TOML.
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: ConfigArgs) -> anyhow::Result<()> {
    let config = super::load_config(args.config.as_deref())?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}
