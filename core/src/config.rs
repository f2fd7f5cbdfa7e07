use serde::{Deserialize, Serialize};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var overriding the upstream base URL
pub const UPSTREAM_URL_ENV: &str = "UPSTREAM_API_URL";
/// Older name for [`UPSTREAM_URL_ENV`], still honoured
pub const LEGACY_UPSTREAM_URL_ENV: &str = "NVIDIA_API_URL";
/// Env var overriding the listen port
pub const PORT_ENV: &str = "PORT";

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings for the shared upstream transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// OpenAI-compatible base, e.g. `https://integrate.api.nvidia.com/v1`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Applies to bounded buffered passthroughs (model listing) only.
    #[serde(default = "default_buffered_timeout")]
    pub buffered_timeout_secs: u64,

    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,

    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,

    #[serde(default = "default_tcp_keepalive")]
    pub tcp_keepalive_secs: u64,

    /// Optional outbound proxy for all upstream traffic
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout(),
            buffered_timeout_secs: default_buffered_timeout(),
            pool_max_idle_per_host: default_pool_max_idle(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            tcp_keepalive_secs: default_tcp_keepalive(),
            proxy: None,
        }
    }
}

impl UpstreamConfig {
    pub fn buffered_timeout(&self) -> Duration {
        Duration::from_secs(self.buffered_timeout_secs)
    }
}

impl Config {
    /// Apply `UPSTREAM_API_URL` / `NVIDIA_API_URL` / `PORT` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Same as [`Config::apply_env_overrides`] with a pluggable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(UPSTREAM_URL_ENV)
            .or_else(|| lookup(LEGACY_UPSTREAM_URL_ENV))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        if let Some(base_url) = base_url {
            tracing::debug!("Upstream base URL overridden from environment: {}", base_url);
            self.upstream.base_url = base_url;
        }

        if let Some(raw) = lookup(PORT_ENV) {
            match raw.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(e) => tracing::warn!("Ignoring invalid {}={:?}: {}", PORT_ENV, raw, e),
            }
        }
    }
}

// Default value functions
fn default_port() -> u16 { 8007 }
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_max_body_bytes() -> usize { 100 * 1024 * 1024 }
fn default_base_url() -> String { "https://integrate.api.nvidia.com/v1".to_string() }
fn default_connect_timeout() -> u64 { 20 }
fn default_buffered_timeout() -> u64 { 30 }
fn default_pool_max_idle() -> usize { 16 }
fn default_pool_idle_timeout() -> u64 { 90 }
fn default_tcp_keepalive() -> u64 { 60 }

/// Get default config file path
/// Uses ~/.config/openai-relay/config.toml for Unix-like CLI experience
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("openai-relay")
        .join("config.toml")
}

/// Resolve the relay's settings from TOML.
///
/// An explicit `--config` path must exist. Without one, `config.toml` in the working
/// directory wins over the per-user file from [`default_config_path`]; a broken local
/// file is logged and skipped. With neither present the built-in defaults are used.
/// `UPSTREAM_API_URL` and friends are layered on later by [`Config::apply_env_overrides`].
pub fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    if let Some(explicit) = path {
        if !explicit.exists() {
            anyhow::bail!("Config file {:?} does not exist", explicit);
        }
        let config = read_config_file(&explicit)?;
        tracing::info!("Using config {:?}", explicit);
        return Ok(config);
    }

    let working_dir = Path::new("config.toml");
    if working_dir.exists() {
        match read_config_file(working_dir) {
            Ok(config) => {
                tracing::info!("Using config {:?} from the working directory", working_dir);
                return Ok(config);
            }
            Err(e) => tracing::error!("Ignoring {:?}: {:#}", working_dir, e),
        }
    }

    let per_user = default_config_path();
    if per_user.exists() {
        let config = read_config_file(&per_user)?;
        tracing::info!("Using config {:?}", per_user);
        return Ok(config);
    }

    tracing::info!("No config file, relaying with built-in defaults");
    Ok(Config::default())
}

fn read_config_file(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("parsing {:?}", path))
}
