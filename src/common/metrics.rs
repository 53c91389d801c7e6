//! Node metrics
//!
//! Prometheus-compatible counters, gauges and latency histograms. Each node
//! owns its own registry so several nodes can share a process (tests do).

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        let mut buckets = Vec::with_capacity(LATENCY_BUCKETS.len() + 1);
        for _ in 0..=LATENCY_BUCKETS.len() {
            buckets.push(AtomicU64::new(0));
        }
        Self {
            buckets,
            boundaries: LATENCY_BUCKETS.to_vec(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value (milliseconds)
    pub fn observe(&self, value: f64) {
        let idx = self
            .boundaries
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.boundaries.len());

        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative buckets, `+Inf` last
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per-endpoint metrics
#[derive(Debug, Default)]
pub struct EndpointMetrics {
    pub requests_total: Counter,
    pub requests_error: Counter,
    pub latency: Histogram,
}

/// Metrics registry for one node
#[derive(Debug)]
pub struct Metrics {
    endpoints: Mutex<BTreeMap<String, Arc<EndpointMetrics>>>,

    /// Operations sent to another node
    pub forwards_total: Counter,
    /// Forwards that ended in `PeerUnreachable`
    pub forward_failures: Counter,
    /// Peers removed from the ring
    pub evictions_total: Counter,
    /// Keys pushed to a new owner after a membership change
    pub handoff_keys_total: Counter,

    pub ring_members: Gauge,
    pub local_keys: Gauge,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(BTreeMap::new()),
            forwards_total: Counter::new(),
            forward_failures: Counter::new(),
            evictions_total: Counter::new(),
            handoff_keys_total: Counter::new(),
            ring_members: Gauge::new(),
            local_keys: Gauge::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create metrics for an endpoint
    pub fn endpoint(&self, path: &str) -> Arc<EndpointMetrics> {
        let mut endpoints = self.endpoints.lock().unwrap();
        endpoints
            .entry(path.to_string())
            .or_default()
            .clone()
    }

    pub fn record_request(&self, path: &str, duration: Duration, success: bool) {
        let endpoint = self.endpoint(path);
        endpoint.requests_total.inc();
        endpoint.latency.observe(duration.as_secs_f64() * 1000.0);
        if !success {
            endpoint.requests_error.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Prometheus text exposition
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let counters = [
            ("ringkv_forwards_total", "Operations forwarded to the owning peer", &self.forwards_total),
            ("ringkv_forward_failures_total", "Forwards that found the owner unreachable", &self.forward_failures),
            ("ringkv_evictions_total", "Peers evicted from the ring", &self.evictions_total),
            ("ringkv_handoff_keys_total", "Keys handed off to a new owner", &self.handoff_keys_total),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, counter.get());
        }

        let gauges = [
            ("ringkv_ring_members", "Members in the local ring view", &self.ring_members),
            ("ringkv_local_keys", "Keys held by this node", &self.local_keys),
        ];
        for (name, help, gauge) in gauges {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} gauge", name);
            let _ = writeln!(out, "{} {}", name, gauge.get());
        }

        let _ = writeln!(out, "# HELP ringkv_uptime_seconds Node uptime in seconds");
        let _ = writeln!(out, "# TYPE ringkv_uptime_seconds gauge");
        let _ = writeln!(out, "ringkv_uptime_seconds {}", self.uptime_seconds());

        let endpoints = self.endpoints.lock().unwrap();

        let _ = writeln!(out, "# HELP ringkv_endpoint_requests_total Requests per endpoint");
        let _ = writeln!(out, "# TYPE ringkv_endpoint_requests_total counter");
        for (path, m) in endpoints.iter() {
            let _ = writeln!(
                out,
                "ringkv_endpoint_requests_total{{path=\"{}\"}} {}",
                path,
                m.requests_total.get()
            );
        }

        let _ = writeln!(out, "# HELP ringkv_endpoint_errors_total Errors per endpoint");
        let _ = writeln!(out, "# TYPE ringkv_endpoint_errors_total counter");
        for (path, m) in endpoints.iter() {
            let _ = writeln!(
                out,
                "ringkv_endpoint_errors_total{{path=\"{}\"}} {}",
                path,
                m.requests_error.get()
            );
        }

        let _ = writeln!(out, "# HELP ringkv_request_duration_ms Request duration in milliseconds");
        let _ = writeln!(out, "# TYPE ringkv_request_duration_ms histogram");
        for (path, m) in endpoints.iter() {
            for (le, count) in m.latency.get_buckets() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                let _ = writeln!(
                    out,
                    "ringkv_request_duration_ms_bucket{{path=\"{}\",le=\"{}\"}} {}",
                    path, le, count
                );
            }
            let _ = writeln!(
                out,
                "ringkv_request_duration_ms_sum{{path=\"{}\"}} {}",
                path,
                m.latency.sum()
            );
            let _ = writeln!(
                out,
                "ringkv_request_duration_ms_count{{path=\"{}\"}} {}",
                path,
                m.latency.count()
            );
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
