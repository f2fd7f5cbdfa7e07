pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "openai-relay")]
#[command(author, version, about = "Re-expose an OpenAI-compatible API under a local endpoint")]
pub struct Cli {
    /// Path to config file (checked in order: local config.toml, ~/.config/openai-relay/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the proxy server
    Start {
        /// Port to listen on (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Upstream base URL (overrides config and UPSTREAM_API_URL)
        #[arg(short, long)]
        upstream: Option<String>,
    },

    /// Show proxy status
    Status,
}
