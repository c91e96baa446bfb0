//! Fixed-rate driver for a shared [`ReactionSimulation`]

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::metrics::Metrics;
use crate::sim::constants::physics;
use crate::sim::performance::PerformanceMonitor;
use crate::sim::render::{FrameSink, RenderFrame};
use crate::sim::simulation::{ReactionSimulation, TickReport};

/// Seconds between summary log lines
const SUMMARY_INTERVAL_SECS: u64 = 30;

/// Run one timed tick and capture the frame that follows it
pub fn step(
    sim: &mut ReactionSimulation,
    monitor: &mut PerformanceMonitor,
    metrics: Option<&Metrics>,
) -> (TickReport, RenderFrame) {
    monitor.tick_start();
    let report = sim.tick();
    let frame = sim.render_frame();
    let duration = monitor.tick_end(report.nodes);

    if let Some(metrics) = metrics {
        if let Some(duration) = duration {
            metrics.record_tick_time(duration);
        }
        metrics.record_performance(monitor);
        metrics.ring_nodes.store(report.nodes as u64, Ordering::Relaxed);
        metrics
            .active_effects
            .store(report.active_effects as u64, Ordering::Relaxed);
    }

    (report, frame)
}

/// Spawn the tick loop.
///
/// Ticks run every [`physics::TICK_DURATION_MS`]. A slow tick delays the next
/// one; missed ticks are never replayed in a burst. The write lock is held only
/// for the tick itself, frames are presented after it is released.
pub fn start_tick_loop(
    sim: Arc<RwLock<ReactionSimulation>>,
    mut sink: Box<dyn FrameSink>,
    metrics: Option<Arc<Metrics>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let tick_duration = Duration::from_millis(physics::TICK_DURATION_MS);
        let mut ticker = interval(tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut monitor = PerformanceMonitor::new(tick_duration);

        info!("Tick loop started at {} Hz", physics::TICK_RATE);
        let start = Instant::now();
        let summary_every = physics::TICK_RATE as u64 * SUMMARY_INTERVAL_SECS;
        let mut was_degraded = false;

        loop {
            ticker.tick().await;

            let (report, frame, rate_order) = {
                let mut guard = sim.write().await;
                let (report, frame) = step(&mut guard, &mut monitor, metrics.as_deref());
                let rate_order = if report.tick % summary_every == 0 {
                    Some(guard.angle_rate_order())
                } else {
                    None
                };
                (report, frame, rate_order)
            };

            sink.present(&frame);

            let degraded = monitor.status().is_degraded();
            if degraded && !was_degraded {
                warn!("Tick budget exceeded: {}", monitor.status_message());
            }
            was_degraded = degraded;

            if let Some(order) = rate_order {
                info!(
                    "Ring: {}s, tick {}, {} nodes, {} effects, rate order {:?} | Perf: {}",
                    start.elapsed().as_secs(),
                    report.tick,
                    report.nodes,
                    report.active_effects,
                    order,
                    monitor.status_message()
                );
            }
        }
    })
}
