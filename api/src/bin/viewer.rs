//! Connects to a broker, mirrors its membership into a local ring and renders
//! it frame by frame. A closed link is reopened and the ring rebuilt from the
//! new Welcome.

use std::fs::File;
use std::io::LineWriter;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use reaction_ring::config::ViewerConfig;
use reaction_ring::net::client::ReactionClient;
use reaction_ring::net::protocol::{now_millis, ServerMessage};
use reaction_ring::sim::config::SimulationConfig;
use reaction_ring::sim::mirror::RingMirror;
use reaction_ring::sim::render::{FrameSink, JsonLinesSink, LogSink};
use reaction_ring::sim::simulation::ReactionSimulation;
use reaction_ring::sim::tick_loop::start_tick_loop;

const PING_INTERVAL: Duration = Duration::from_secs(5);
const STATS_INTERVAL: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Why the message loop ended
enum LinkEnd {
    Lost,
    Shutdown,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    reaction_ring::init_tracing();

    let config = ViewerConfig::load_or_default();
    config.validate().map_err(|e| anyhow!("Invalid viewer configuration: {}", e))?;
    let sim_config = SimulationConfig::load_or_default();
    sim_config
        .validate()
        .map_err(|e| anyhow!("Invalid simulation configuration: {}", e))?;
    let cert_digest = config.cert_digest().map_err(|e| anyhow!(e))?;

    let sink: Box<dyn FrameSink> = match &config.frame_dump {
        Some(path) => {
            info!("Writing frames to {}", path.display());
            Box::new(JsonLinesSink::new(LineWriter::new(File::create(path)?)))
        }
        None => Box::new(LogSink::new(config.log_every)),
    };

    let sim = Arc::new(RwLock::new(ReactionSimulation::new(sim_config)));
    let mut mirror = RingMirror::new();

    let mut client = ReactionClient::new();
    let welcome = client.connect(&config.server_url, cert_digest).await?;
    info!(
        "Joined {} as {} ({} online)",
        config.server_url, welcome.identity, welcome.count
    );
    mirror.on_welcome(&mut *sim.write().await, &welcome);

    let tick_loop = start_tick_loop(sim.clone(), sink, None);

    while let LinkEnd::Lost = run_link(&mut client, &mut mirror, &sim, &config).await {
        // Anything heard on the old link may be stale; the next Welcome rebuilds the ring
        let welcome = loop {
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = tokio::signal::ctrl_c() => break None,
            }
            match client.connect(&config.server_url, cert_digest).await {
                Ok(welcome) => break Some(welcome),
                Err(e) => warn!("Reconnect to {} failed: {}", config.server_url, e),
            }
        };
        let Some(welcome) = welcome else {
            break;
        };
        info!("Rejoined as {} ({} online)", welcome.identity, welcome.count);
        mirror.on_welcome(&mut *sim.write().await, &welcome);
    }

    tick_loop.abort();
    // Let the writer flush the goodbye before the runtime stops
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!("Viewer stopped");
    Ok(())
}

/// Drive one link until the broker closes it or the user stops the viewer
async fn run_link(
    client: &mut ReactionClient,
    mirror: &mut RingMirror,
    sim: &Arc<RwLock<ReactionSimulation>>,
    config: &ViewerConfig,
) -> LinkEnd {
    let reacting = config.reaction_interval_ms.is_some();
    let mut reaction_timer = interval(Duration::from_millis(
        config.reaction_interval_ms.unwrap_or(1000),
    ));
    reaction_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ping_timer = interval(PING_INTERVAL);
    let mut stats_timer = interval(STATS_INTERVAL);

    loop {
        tokio::select! {
            message = client.next_message() => {
                let Some(message) = message else {
                    warn!("Broker closed the link");
                    return LinkEnd::Lost;
                };
                if let ServerMessage::Pong { client_timestamp, .. } = &message {
                    info!("RTT {} ms", now_millis().saturating_sub(*client_timestamp));
                }
                mirror.apply(&mut *sim.write().await, &message);
            }
            _ = reaction_timer.tick(), if reacting => {
                match client.send_reaction().await {
                    Ok(()) => {
                        mirror.local_reaction(&mut *sim.write().await);
                    }
                    Err(e) => {
                        warn!("Reaction not sent: {}", e);
                        return LinkEnd::Lost;
                    }
                }
            }
            _ = ping_timer.tick() => {
                if let Err(e) = client.ping().await {
                    warn!("Ping failed: {}", e);
                }
            }
            _ = stats_timer.tick() => {
                let guard = sim.read().await;
                info!(
                    "{} nodes ({} reported), rate avg {:.2e}, order {:?}",
                    guard.node_count(),
                    mirror.reported_count(),
                    guard.angle_rate_average(),
                    guard.angle_rate_order()
                );
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                if let Err(e) = client.leave().await {
                    warn!("Leave not sent: {}", e);
                }
                return LinkEnd::Shutdown;
            }
        }
    }
}
