//! Gateway metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Counters for calls, tool resolution, and the derived-tool cache.
pub struct GatewayMetrics {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    active_executions: AtomicU64,

    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    resolution_failures: AtomicU64,
    nested_connection_errors: AtomicU64,
    unknown_tool_calls: AtomicU64,

    tool_latencies: DashMap<String, LatencyStats>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            active_executions: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            resolution_failures: AtomicU64::new(0),
            nested_connection_errors: AtomicU64::new(0),
            unknown_tool_calls: AtomicU64::new(0),
            tool_latencies: DashMap::new(),
        }
    }

    pub fn record_call_start(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.active_executions.fetch_add(1, Ordering::Relaxed);
    }

    /// `tool` is the registered name the call resolved to. Calls that named
    /// no registered tool are only counted, so caller-chosen names never
    /// become latency keys.
    pub fn record_call_end(&self, tool: Option<&str>, success: bool, duration_ms: u64) {
        self.active_executions.fetch_sub(1, Ordering::Relaxed);

        if success {
            self.successful_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_calls.fetch_add(1, Ordering::Relaxed);
        }

        let Some(tool) = tool else {
            self.unknown_tool_calls.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if let Some(stats) = self.tool_latencies.get(tool) {
            stats.record(duration_ms);
            return;
        }
        self.tool_latencies
            .entry(tool.to_string())
            .or_insert_with(LatencyStats::new)
            .record(duration_ms);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolution_failure(&self) {
        self.resolution_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_nested_connection_error(&self) {
        self.nested_connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            active_executions: self.active_executions.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            resolution_failures: self.resolution_failures.load(Ordering::Relaxed),
            nested_connection_errors: self.nested_connection_errors.load(Ordering::Relaxed),
            unknown_tool_calls: self.unknown_tool_calls.load(Ordering::Relaxed),
        }
    }

    pub fn tool_latency(&self, tool: &str) -> Option<LatencySnapshot> {
        self.tool_latencies.get(tool).map(|stats| stats.snapshot())
    }

    pub fn all_tool_latencies(&self) -> Vec<(String, LatencySnapshot)> {
        self.tool_latencies
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-tool latency statistics.
pub struct LatencyStats {
    count: AtomicU64,
    total_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyStats {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
        }
    }

    fn record(&self, ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.min_ms.fetch_min(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total = self.total_ms.load(Ordering::Relaxed);
        let min = self.min_ms.load(Ordering::Relaxed);

        LatencySnapshot {
            count,
            avg_ms: if count > 0 { total / count } else { 0 },
            min_ms: if min == u64::MAX { 0 } else { min },
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub active_executions: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub resolution_failures: u64,
    pub nested_connection_errors: u64,
    pub unknown_tool_calls: u64,
}

impl MetricsSnapshot {
    /// Success rate as a percentage of completed calls.
    pub fn success_rate(&self) -> f64 {
        let completed = self.successful_calls + self.failed_calls;
        if completed == 0 {
            100.0
        } else {
            (self.successful_calls as f64 / completed as f64) * 100.0
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / lookups as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySnapshot {
    pub count: u64,
    pub avg_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}
