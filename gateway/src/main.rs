use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use wraith_core::config::GatewayConfig;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "config.json".into());
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading gateway config from {path}"))?;
    let config = Arc::new(GatewayConfig::from_json(&text).context("parsing gateway config")?);

    let listener = TcpListener::bind(("0.0.0.0", config.listen_port))
        .await
        .with_context(|| format!("binding to port {}", config.listen_port))?;
    log::info!("gateway listening on {}", listener.local_addr()?);

    loop {
        let (client, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("accept error: {e}");
                continue;
            }
        };
        log::debug!("accepted client {addr}");
        let config = Arc::clone(&config);
        tokio::spawn(wraith_core::gateway::handle_connection(client, config));
    }
}
