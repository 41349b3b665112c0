use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use wraith_core::auth::{CredentialStore, InMemoryCredentialStore};
use wraith_core::config::RelayConfig;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "config.json".into());
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading relay config from {path}"))?;
    let config = Arc::new(RelayConfig::from_json(&text).context("parsing relay config")?);

    let store = InMemoryCredentialStore::new();
    for (user_name, password) in &config.users {
        store.add_user(user_name, password).await.ok();
    }
    let store: Arc<dyn CredentialStore> = Arc::new(store);

    let listener = TcpListener::bind(("0.0.0.0", config.listen_port))
        .await
        .with_context(|| format!("binding to port {}", config.listen_port))?;
    log::info!("relay listening on {}", listener.local_addr()?);

    loop {
        let (gateway_conn, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("accept error: {e}");
                continue;
            }
        };
        log::debug!("accepted gateway connection from {addr}");
        let config = Arc::clone(&config);
        let store = Arc::clone(&store);
        tokio::spawn(wraith_core::relay::handle_connection(
            gateway_conn,
            config,
            store,
        ));
    }
}
