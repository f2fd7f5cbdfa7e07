use std::path::PathBuf;

use openai_relay_core::proxy::ProxyServer;

use super::effective_config;

pub async fn run(
    config_path: Option<PathBuf>,
    port_override: Option<u16>,
    upstream_override: Option<String>,
) -> anyhow::Result<()> {
    let mut config = effective_config(config_path)?;

    // Command-line flags win over file and environment
    if let Some(port) = port_override {
        config.server.port = port;
    }
    if let Some(upstream) = upstream_override {
        config.upstream.base_url = upstream;
    }

    tracing::info!("Starting openai-relay...");
    tracing::info!("  Listen: {}", config.server.bind_address());
    tracing::info!("  Upstream: {}", config.upstream.base_url);
    tracing::info!("  Model listing timeout: {}s", config.upstream.buffered_timeout_secs);

    // Shared upstream transport is created here, before the listener exists
    let server = ProxyServer::new(&config)?;

    tracing::info!("Press Ctrl+C to stop");

    // Run server (blocks until shutdown)
    server.run().await?;

    Ok(())
}
