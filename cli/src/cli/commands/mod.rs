pub mod start;
pub mod status;

use std::path::PathBuf;

use openai_relay_core::config::{load_config, Config};

/// File config with environment overrides applied on top.
pub fn effective_config(config_path: Option<PathBuf>) -> anyhow::Result<Config> {
    let mut config = load_config(config_path)?;
    config.apply_env_overrides();
    Ok(config)
}
