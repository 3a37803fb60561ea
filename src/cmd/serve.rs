//! HTTP server command: `sideloader serve`.

use anyhow::Result;
use sideloader::config::Config;

pub async fn cmd_serve(
    project_dir: &std::path::Path,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let mut config = Config::load(project_dir)?;
    if let Some(host) = host {
        config.toml.server.host = host;
    }
    if let Some(port) = port {
        config.toml.server.port = port;
    }
    if config.toml.deploy.command.is_none() {
        tracing::warn!("no deploy command configured; releases will be marked deployed without running anything");
    }
    sideloader::server::start_server(&config).await
}
