//! Metrics collection and monitoring module
//!
//! Engine counters and stream acknowledgment latency, mirrored to the `metrics` facade.

use std::time::Duration;

use metrics::{histogram, increment_counter};

/// Snapshot of engine counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineCounters {
    pub lookups_dispatched: u64,
    pub stale_lookups_dropped: u64,
    pub lookup_failures: u64,
    pub sessions_started: u64,
    pub start_failures: u64,
    pub bars_applied: u64,
    pub stale_bars_dropped: u64,
    pub orders_placed: u64,
    pub order_failures: u64,
    pub ack_latency_p50: u64,
    pub ack_latency_p95: u64,
    pub ack_latency_p99: u64,
}

/// Metrics collector for the market view engine
pub struct EngineMetrics {
    counters: EngineCounters,
    ack_samples: Vec<u64>,
    max_samples: usize,
}

impl EngineMetrics {
    /// Create a new metrics collector
    pub fn new(max_samples: usize) -> Self {
        Self {
            counters: EngineCounters::default(),
            ack_samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    pub fn record_lookup_dispatched(&mut self) {
        self.counters.lookups_dispatched += 1;
        increment_counter!("marketview_lookups_dispatched");
    }

    pub fn record_stale_lookup(&mut self) {
        self.counters.stale_lookups_dropped += 1;
        increment_counter!("marketview_stale_lookups_dropped");
    }

    pub fn record_lookup_failure(&mut self) {
        self.counters.lookup_failures += 1;
        increment_counter!("marketview_lookup_failures");
    }

    pub fn record_session_started(&mut self) {
        self.counters.sessions_started += 1;
        increment_counter!("marketview_sessions_started");
    }

    pub fn record_start_failure(&mut self) {
        self.counters.start_failures += 1;
        increment_counter!("marketview_start_failures");
    }

    pub fn record_bar_applied(&mut self) {
        self.counters.bars_applied += 1;
        increment_counter!("marketview_bars_applied");
    }

    pub fn record_stale_bar(&mut self) {
        self.counters.stale_bars_dropped += 1;
        increment_counter!("marketview_stale_bars_dropped");
    }

    pub fn record_order(&mut self, accepted: bool) {
        if accepted {
            self.counters.orders_placed += 1;
            increment_counter!("marketview_orders_placed");
        } else {
            self.counters.order_failures += 1;
            increment_counter!("marketview_order_failures");
        }
    }

    /// Record how long a backend took to acknowledge a stream start
    pub fn record_ack_latency(&mut self, latency: Duration) {
        let millis = latency.as_millis() as u64;

        // Add to samples, maintain max size
        if self.ack_samples.len() >= self.max_samples {
            self.ack_samples.remove(0);
        }
        self.ack_samples.push(millis);

        histogram!("marketview_stream_ack_ms", millis as f64);
    }

    /// Calculate acknowledgment latency percentiles
    pub fn calculate_percentiles(&self) -> (u64, u64, u64) {
        if self.ack_samples.is_empty() {
            return (0, 0, 0);
        }

        let mut sorted = self.ack_samples.clone();
        sorted.sort_unstable();

        let len = sorted.len();
        let p50_idx = (len * 50) / 100;
        let p95_idx = (len * 95) / 100;
        let p99_idx = (len * 99) / 100;

        let p50 = sorted.get(p50_idx).copied().unwrap_or(0);
        let p95 = sorted.get(p95_idx.min(len - 1)).copied().unwrap_or(0);
        let p99 = sorted.get(p99_idx.min(len - 1)).copied().unwrap_or(0);

        (p50, p95, p99)
    }

    /// Counters with current latency percentiles filled in
    pub fn snapshot(&self) -> EngineCounters {
        let (p50, p95, p99) = self.calculate_percentiles();
        EngineCounters {
            ack_latency_p50: p50,
            ack_latency_p95: p95,
            ack_latency_p99: p99,
            ..self.counters.clone()
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new(100)
    }
}
