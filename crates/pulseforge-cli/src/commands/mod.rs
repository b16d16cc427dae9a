//! Subcommand implementations.

pub mod config_cmd;
pub mod decide;
pub mod run;
pub mod score;

use std::path::Path;

use anyhow::Context;
use pulseforge_types::PipelineConfig;

/// Load a TOML pipeline config, or defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))
        }
        None => Ok(PipelineConfig::default()),
    }
}
