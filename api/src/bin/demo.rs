//! Single-process demo: an in-process broker with synthetic sessions, and a
//! ring that follows the broker through its event subscription.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use reaction_ring::config::{DemoConfig, ServerConfig};
use reaction_ring::metrics::Metrics;
use reaction_ring::net::broker::{BrokerEvent, SessionBroker};
use reaction_ring::net::protocol::ServerMessage;
use reaction_ring::net::session::outbox;
use reaction_ring::sim::config::SimulationConfig;
use reaction_ring::sim::constants::physics;
use reaction_ring::sim::mirror::RingMirror;
use reaction_ring::sim::node::Identity;
use reaction_ring::sim::render::LogSink;
use reaction_ring::sim::simulation::ReactionSimulation;
use reaction_ring::sim::tick_loop::start_tick_loop;

/// A connected session with nobody on the other end; its outbox is drained
/// and discarded
struct SyntheticSession {
    identity: Identity,
    inbox: mpsc::Receiver<ServerMessage>,
}

async fn connect(
    broker: &Arc<RwLock<SessionBroker>>,
    capacity: usize,
) -> Option<SyntheticSession> {
    let (tx, inbox) = outbox(capacity);
    match broker.write().await.on_connect(tx) {
        Ok(identity) => Some(SyntheticSession { identity, inbox }),
        Err(e) => {
            warn!("Synthetic session refused: {}", e);
            None
        }
    }
}

/// Follow broker events into the ring until the broker goes away
async fn mirror_events(
    mut events: broadcast::Receiver<BrokerEvent>,
    sim: Arc<RwLock<ReactionSimulation>>,
) {
    let mut mirror = RingMirror::new();
    loop {
        match events.recv().await {
            Ok(event) => mirror.apply_event(&mut *sim.write().await, &event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Ring mirror missed {} broker events", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    reaction_ring::init_tracing();

    let demo = DemoConfig::load_or_default();
    let server = ServerConfig::load_or_default();
    let sim_config = SimulationConfig::load_or_default();
    sim_config
        .validate()
        .map_err(|e| anyhow!("Invalid simulation configuration: {}", e))?;

    info!(
        "Demo: {} sessions, reaction chance {}, churn chance {}",
        demo.sessions, demo.reaction_chance, demo.churn_chance
    );

    let metrics = Arc::new(Metrics::new());
    let broker = Arc::new(RwLock::new(
        SessionBroker::new(server.max_sessions).with_metrics(metrics.clone()),
    ));
    let sim = Arc::new(RwLock::new(ReactionSimulation::new(sim_config)));

    let events = broker.read().await.subscribe();
    let mirror_task = tokio::spawn(mirror_events(events, sim.clone()));
    let tick_loop = start_tick_loop(
        sim.clone(),
        Box::new(LogSink::new(physics::TICK_RATE as u64 * 5)),
        Some(metrics.clone()),
    );

    let mut sessions = Vec::with_capacity(demo.sessions);
    for _ in 0..demo.sessions {
        if let Some(session) = connect(&broker, server.outbox_capacity).await {
            sessions.push(session);
        }
    }

    let mut rng = StdRng::from_entropy();
    let mut ticker = interval(Duration::from_millis(physics::TICK_DURATION_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let deadline = tokio::time::sleep(Duration::from_secs(demo.duration_secs.unwrap_or(365 * 24 * 3600)));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut discarded = 0usize;
                for session in sessions.iter_mut() {
                    while session.inbox.try_recv().is_ok() {
                        discarded += 1;
                    }
                }
                debug!("Discarded {} synthetic deliveries", discarded);

                let reactors: Vec<Identity> = sessions
                    .iter()
                    .filter(|_| rng.gen_bool(demo.reaction_chance))
                    .map(|s| s.identity)
                    .collect();
                for identity in reactors {
                    broker.write().await.on_reaction_send(identity);
                }

                if !sessions.is_empty() && rng.gen_bool(demo.churn_chance) {
                    let leaving = sessions.swap_remove(rng.gen_range(0..sessions.len()));
                    broker.write().await.on_disconnect(leaving.identity);
                    if let Some(session) = connect(&broker, server.outbox_capacity).await {
                        sessions.push(session);
                    }
                }
            }
            _ = &mut deadline, if demo.duration_secs.is_some() => {
                info!("Demo finished");
                break;
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                break;
            }
        }
    }

    for session in sessions.drain(..) {
        broker.write().await.on_disconnect(session.identity);
    }
    // Let the mirror catch up with the final leaves
    tokio::time::sleep(Duration::from_millis(100)).await;
    tick_loop.abort();
    mirror_task.abort();

    let guard = sim.read().await;
    info!(
        "Relayed {} reactions ({} dropped) over {} ticks; ring now has {} nodes",
        metrics.reactions_relayed.load(Ordering::Relaxed),
        metrics.reactions_dropped.load(Ordering::Relaxed),
        guard.tick_count(),
        guard.node_count()
    );
    Ok(())
}
