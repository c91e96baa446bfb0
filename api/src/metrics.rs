//! Prometheus-compatible metrics endpoint
//!
//! Exposes broker and simulation counters in Prometheus text and JSON.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::sim::performance::PerformanceMonitor;

/// Metrics registry shared by the broker, transport and tick loop
#[derive(Debug)]
pub struct Metrics {
    // Sessions
    pub sessions_active: AtomicU64,
    pub sessions_total: AtomicU64,
    pub sessions_rejected: AtomicU64,
    pub sessions_evicted: AtomicU64,

    // Reactions
    pub reactions_received: AtomicU64,
    pub reactions_relayed: AtomicU64,
    pub reactions_dropped: AtomicU64,
    /// Join/Leave notifications lost to a full outbox
    pub membership_dropped: AtomicU64,

    // Network stats
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub malformed_frames: AtomicU64,

    // Simulation
    pub ring_nodes: AtomicU64,
    pub active_effects: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,
    pub tick_overruns: AtomicU64,

    // Performance status (0=Excellent .. 4=Overrun)
    pub performance_status: AtomicU64,
    pub budget_usage_percent: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sessions_active: AtomicU64::new(0),
            sessions_total: AtomicU64::new(0),
            sessions_rejected: AtomicU64::new(0),
            sessions_evicted: AtomicU64::new(0),
            reactions_received: AtomicU64::new(0),
            reactions_relayed: AtomicU64::new(0),
            reactions_dropped: AtomicU64::new(0),
            membership_dropped: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            ring_nodes: AtomicU64::new(0),
            active_effects: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            tick_overruns: AtomicU64::new(0),
            performance_status: AtomicU64::new(0),
            budget_usage_percent: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(1000)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > 1000 {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us
                .store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us
                .store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Copy the monitor's current status into the exported gauges
    pub fn record_performance(&self, monitor: &PerformanceMonitor) {
        self.performance_status
            .store(monitor.status().code(), Ordering::Relaxed);
        self.budget_usage_percent
            .store(monitor.budget_usage_percent() as u64, Ordering::Relaxed);
        self.tick_overruns
            .store(monitor.overrun_ticks(), Ordering::Relaxed);
    }

    /// Count one outbound frame of `bytes` length
    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count one inbound frame of `bytes` length
    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn status_name(&self) -> &'static str {
        match self.performance_status.load(Ordering::Relaxed) {
            0 => "excellent",
            1 => "good",
            2 => "warning",
            3 => "critical",
            _ => "overrun",
        }
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        // Session metrics
        metric!("reaction_ring_sessions_active", "Connected sessions", "gauge",
            self.sessions_active.load(Ordering::Relaxed));
        metric!("reaction_ring_sessions_total", "Sessions accepted since start", "counter",
            self.sessions_total.load(Ordering::Relaxed));
        metric!("reaction_ring_sessions_rejected_total", "Sessions refused at capacity", "counter",
            self.sessions_rejected.load(Ordering::Relaxed));
        metric!("reaction_ring_sessions_evicted_total", "Sessions closed after missing a membership change", "counter",
            self.sessions_evicted.load(Ordering::Relaxed));

        // Reaction fan-out
        metric!("reaction_ring_reactions_received_total", "Reactions sent by clients", "counter",
            self.reactions_received.load(Ordering::Relaxed));
        metric!("reaction_ring_reactions_relayed_total", "Reaction deliveries queued", "counter",
            self.reactions_relayed.load(Ordering::Relaxed));
        metric!("reaction_ring_reactions_dropped_total", "Reaction deliveries dropped on full outbox", "counter",
            self.reactions_dropped.load(Ordering::Relaxed));
        metric!("reaction_ring_membership_dropped_total", "Join/Leave notifications dropped on full outbox", "counter",
            self.membership_dropped.load(Ordering::Relaxed));

        // Network metrics
        metric!("reaction_ring_messages_sent_total", "Total messages sent", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("reaction_ring_messages_received_total", "Total messages received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("reaction_ring_bytes_sent_total", "Total bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("reaction_ring_bytes_received_total", "Total bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));
        metric!("reaction_ring_malformed_frames_total", "Inbound frames that failed to decode", "counter",
            self.malformed_frames.load(Ordering::Relaxed));

        // Simulation
        metric!("reaction_ring_nodes", "Nodes on the ring", "gauge",
            self.ring_nodes.load(Ordering::Relaxed));
        metric!("reaction_ring_effects_active", "Active effects", "gauge",
            self.active_effects.load(Ordering::Relaxed));

        // Performance metrics
        metric!("reaction_ring_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("reaction_ring_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("reaction_ring_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("reaction_ring_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("reaction_ring_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("reaction_ring_tick_overruns_total", "Ticks longer than the tick period", "counter",
            self.tick_overruns.load(Ordering::Relaxed));
        metric!("reaction_ring_performance_status", "Performance status (0=Excellent, 4=Overrun)", "gauge",
            self.performance_status.load(Ordering::Relaxed));
        metric!("reaction_ring_budget_usage_percent", "Tick budget usage percentage", "gauge",
            self.budget_usage_percent.load(Ordering::Relaxed));

        output.push_str(&format!(
            "# HELP reaction_ring_performance_state Human-readable performance state\n# TYPE reaction_ring_performance_state gauge\nreaction_ring_performance_state{{state=\"{}\"}} 1\n",
            self.status_name()
        ));

        metric!("reaction_ring_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics
    pub fn to_json(&self) -> String {
        let value = serde_json::json!({
            "sessions": {
                "active": self.sessions_active.load(Ordering::Relaxed),
                "total": self.sessions_total.load(Ordering::Relaxed),
                "rejected": self.sessions_rejected.load(Ordering::Relaxed),
                "evicted": self.sessions_evicted.load(Ordering::Relaxed),
            },
            "reactions": {
                "received": self.reactions_received.load(Ordering::Relaxed),
                "relayed": self.reactions_relayed.load(Ordering::Relaxed),
                "dropped": self.reactions_dropped.load(Ordering::Relaxed),
                "membership_dropped": self.membership_dropped.load(Ordering::Relaxed),
            },
            "network": {
                "messages_sent": self.messages_sent.load(Ordering::Relaxed),
                "messages_received": self.messages_received.load(Ordering::Relaxed),
                "bytes_sent": self.bytes_sent.load(Ordering::Relaxed),
                "bytes_received": self.bytes_received.load(Ordering::Relaxed),
                "malformed_frames": self.malformed_frames.load(Ordering::Relaxed),
            },
            "simulation": {
                "nodes": self.ring_nodes.load(Ordering::Relaxed),
                "effects": self.active_effects.load(Ordering::Relaxed),
            },
            "performance": {
                "tick_time_us": self.tick_time_us.load(Ordering::Relaxed),
                "tick_time_p95_us": self.tick_time_p95_us.load(Ordering::Relaxed),
                "tick_time_p99_us": self.tick_time_p99_us.load(Ordering::Relaxed),
                "tick_time_max_us": self.tick_time_max_us.load(Ordering::Relaxed),
                "tick_count": self.tick_count.load(Ordering::Relaxed),
                "overruns": self.tick_overruns.load(Ordering::Relaxed),
                "status": self.performance_status.load(Ordering::Relaxed),
                "status_name": self.status_name(),
                "budget_percent": self.budget_usage_percent.load(Ordering::Relaxed),
            },
            "uptime_seconds": self.uptime_seconds(),
        });
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    )
}

/// Build the HTTP response for one raw request
fn route(metrics: &Metrics, request: &str) -> String {
    // JSON routes first: "GET /metrics/json" also starts with "GET /metrics"
    if request.starts_with("GET /metrics/json") || request.starts_with("GET /json") {
        http_response("200 OK", "application/json", &metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        http_response(
            "200 OK",
            "text/plain; version=0.0.4",
            &metrics.to_prometheus(),
        )
    } else if request.starts_with("GET /health") || request.starts_with("GET / ") {
        http_response("200 OK", "text/plain", "OK")
    } else {
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = route(&metrics, &request);
                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.sessions_active.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) > 0);
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_record_traffic() {
        let metrics = Metrics::new();
        metrics.record_sent(12);
        metrics.record_sent(8);
        metrics.record_received(5);
        assert_eq!(metrics.messages_sent.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.bytes_sent.load(Ordering::Relaxed), 20);
        assert_eq!(metrics.bytes_received.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.sessions_active.store(3, Ordering::Relaxed);
        metrics.reactions_dropped.store(7, Ordering::Relaxed);

        let output = metrics.to_prometheus();

        assert!(output.contains("reaction_ring_sessions_active 3"));
        assert!(output.contains("reaction_ring_reactions_dropped_total 7"));
        assert!(output.contains("state=\"excellent\""));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        metrics.sessions_total.store(42, Ordering::Relaxed);

        let parsed: serde_json::Value =
            serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(parsed["sessions"]["total"], 42);
        assert_eq!(parsed["performance"]["status_name"], "excellent");
    }

    #[test]
    fn test_routes() {
        let metrics = Metrics::new();
        assert!(route(&metrics, "GET /metrics HTTP/1.1\r\n").contains("text/plain; version=0.0.4"));
        assert!(route(&metrics, "GET /metrics/json HTTP/1.1\r\n").contains("application/json"));
        assert!(route(&metrics, "GET /health HTTP/1.1\r\n").ends_with("OK"));
        assert!(route(&metrics, "GET /nope HTTP/1.1\r\n").starts_with("HTTP/1.1 404"));
    }
}
