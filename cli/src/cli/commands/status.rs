use std::path::PathBuf;
use std::time::Duration;

use openai_relay_core::config::default_config_path;

use super::effective_config;

pub async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = effective_config(config_path.clone())?;

    println!("openai-relay Status");
    println!("===================");
    println!();
    println!("Configuration:");
    println!("  Config file: {:?}", config_path.unwrap_or_else(default_config_path));
    println!();
    println!("Server settings:");
    println!("  Host: {}", config.server.host);
    println!("  Port: {}", config.server.port);
    println!("  Upstream: {}", config.upstream.base_url);
    println!();

    // Check if server is reachable
    let url = format!("http://{}:{}/health", probe_host(&config.server.host), config.server.port);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()?;
    match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            println!("Server: RUNNING ✓");
        }
        _ => {
            println!("Server: NOT RUNNING");
        }
    }

    Ok(())
}

/// A wildcard bind address is not dialable; probe loopback instead.
fn probe_host(host: &str) -> &str {
    match host {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" | "[::]" => "[::1]",
        other => other,
    }
}
