//! Tick budget monitoring
//!
//! Tracks simulation tick durations against the tick period so the loop can
//! report when it is falling behind. An overrunning tick is never skipped or
//! caught up; the next tick simply starts late.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Budget usage levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceStatus {
    /// Well under budget
    Excellent,
    /// Normal operation
    Good,
    /// Most of the budget is used
    Warning,
    /// Close to the budget
    Critical,
    /// Average tick exceeds the budget; ticks are being delayed
    Overrun,
}

impl PerformanceStatus {
    /// Numeric code for metrics export (0 = Excellent .. 4 = Overrun)
    pub fn code(&self) -> u64 {
        match self {
            PerformanceStatus::Excellent => 0,
            PerformanceStatus::Good => 1,
            PerformanceStatus::Warning => 2,
            PerformanceStatus::Critical => 3,
            PerformanceStatus::Overrun => 4,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, PerformanceStatus::Critical | PerformanceStatus::Overrun)
    }
}

/// Rolling window of tick durations
pub struct PerformanceMonitor {
    tick_durations: VecDeque<Duration>,
    max_samples: usize,
    /// Tick period (budget)
    target_tick_duration: Duration,
    excellent_threshold: f32,
    warning_threshold: f32,
    critical_threshold: f32,
    status: PerformanceStatus,
    tick_start: Option<Instant>,
    /// Ticks that individually took longer than the budget
    overrun_ticks: u64,
    last_node_count: usize,
}

impl PerformanceMonitor {
    pub fn new(target_tick_duration: Duration) -> Self {
        Self {
            tick_durations: VecDeque::with_capacity(120),
            max_samples: 120,
            target_tick_duration,
            excellent_threshold: 0.3, // < 30% of budget
            warning_threshold: 0.7,   // > 70% of budget
            critical_threshold: 0.9,  // > 90% of budget
            status: PerformanceStatus::Excellent,
            tick_start: None,
            overrun_ticks: 0,
            last_node_count: 0,
        }
    }

    /// Start timing a tick
    pub fn tick_start(&mut self) {
        self.tick_start = Some(Instant::now());
    }

    /// End timing a tick and record the duration
    pub fn tick_end(&mut self, node_count: usize) -> Option<Duration> {
        let start = self.tick_start.take()?;
        let duration = start.elapsed();
        self.record_tick(duration);
        self.last_node_count = node_count;
        Some(duration)
    }

    fn record_tick(&mut self, duration: Duration) {
        if duration > self.target_tick_duration {
            self.overrun_ticks += 1;
        }
        self.tick_durations.push_back(duration);
        while self.tick_durations.len() > self.max_samples {
            self.tick_durations.pop_front();
        }
        self.update_status();
    }

    fn update_status(&mut self) {
        if self.tick_durations.len() < 10 {
            return;
        }

        let ratio = self.budget_usage_percent() / 100.0;

        self.status = if ratio < self.excellent_threshold {
            PerformanceStatus::Excellent
        } else if ratio < self.warning_threshold {
            PerformanceStatus::Good
        } else if ratio < self.critical_threshold {
            PerformanceStatus::Warning
        } else if ratio <= 1.0 {
            PerformanceStatus::Critical
        } else {
            PerformanceStatus::Overrun
        };
    }

    pub fn average_tick_duration(&self) -> Duration {
        if self.tick_durations.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.tick_durations.iter().sum();
        sum / self.tick_durations.len() as u32
    }

    pub fn p95_tick_duration(&self) -> Duration {
        if self.tick_durations.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<_> = self.tick_durations.iter().copied().collect();
        sorted.sort();
        let idx = (sorted.len() as f32 * 0.95) as usize;
        sorted.get(idx.min(sorted.len() - 1)).copied().unwrap_or(Duration::ZERO)
    }

    pub fn status(&self) -> PerformanceStatus {
        self.status
    }

    /// Budget usage as percentage (0-100+)
    pub fn budget_usage_percent(&self) -> f32 {
        let avg = self.average_tick_duration();
        (avg.as_secs_f32() / self.target_tick_duration.as_secs_f32()) * 100.0
    }

    pub fn overrun_ticks(&self) -> u64 {
        self.overrun_ticks
    }

    pub fn status_message(&self) -> String {
        format!(
            "{:?} - {:.1}% budget, {} nodes, {} overruns",
            self.status,
            self.budget_usage_percent(),
            self.last_node_count,
            self.overrun_ticks
        )
    }
}
