use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::RwLock;
use tracing::{error, info};

use reaction_ring::config::ServerConfig;
use reaction_ring::metrics::{self, Metrics};
use reaction_ring::net::broker::SessionBroker;
use reaction_ring::net::transport::WebTransportServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    reaction_ring::init_tracing();

    info!("Reaction Ring Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate().map_err(|e| anyhow!("Invalid configuration: {}", e))?;
    info!(
        "Configuration loaded: {}:{}, max_sessions={}, outbox={}",
        config.bind_address, config.port, config.max_sessions, config.outbox_capacity
    );

    let metrics = Arc::new(Metrics::new());

    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let broker = Arc::new(RwLock::new(
        SessionBroker::new(config.max_sessions).with_metrics(metrics.clone()),
    ));

    let server = WebTransportServer::new(config.clone(), broker.clone(), metrics.clone()).await?;

    info!("Server ready on https://{}", server.bind_addr());
    info!("Certificate hash: {}", server.cert_hash());
    info!("Viewer: CERT_HASH={} reaction-ring-viewer", server.cert_hash());

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Shutdown signal received");
        }
    }

    info!("Server stopped with {} sessions connected", broker.read().await.count());
    Ok(())
}
