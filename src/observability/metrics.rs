//! Thread-safe metrics collection
//!
//! Atomic counters and mutex-protected per-label maps tracking routing
//! throughput, per-agent call health, breaker trips, retries, DLQ depth
//! and replay outcomes. A serializable snapshot is exposed over the health
//! server; transport to an external metrics sink stays outside the core.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Per-agent call statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentCallStats {
    pub success: u64,
    pub failure: u64,
    pub total_latency_ms: u64,
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Routing throughput
    signals_received: Mutex<HashMap<String, u64>>, // by kind
    duplicates_rejected: AtomicU64,
    request_latencies_ms: Mutex<Vec<u64>>,

    // Agent call health
    agent_calls: Mutex<HashMap<String, AgentCallStats>>, // by agent
    retry_attempts: Mutex<HashMap<String, u64>>,         // by agent
    breaker_trips: Mutex<HashMap<String, u64>>,          // by agent

    // DLQ lifecycle
    dlq_enqueued: Mutex<HashMap<String, u64>>, // by reason
    dlq_depth: AtomicU64,
    replay_processed: AtomicU64,
    replay_skipped: AtomicU64,
    replay_failed: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            signals_received: Mutex::new(HashMap::new()),
            duplicates_rejected: AtomicU64::new(0),
            request_latencies_ms: Mutex::new(Vec::new()),
            agent_calls: Mutex::new(HashMap::new()),
            retry_attempts: Mutex::new(HashMap::new()),
            breaker_trips: Mutex::new(HashMap::new()),
            dlq_enqueued: Mutex::new(HashMap::new()),
            dlq_depth: AtomicU64::new(0),
            replay_processed: AtomicU64::new(0),
            replay_skipped: AtomicU64::new(0),
            replay_failed: AtomicU64::new(0),
        }
    }

    pub fn record_signal(&self, kind: &str) {
        let mut map = self.signals_received.lock().unwrap();
        *map.entry(kind.to_string()).or_insert(0) += 1;
    }

    pub fn record_duplicate(&self) {
        self.duplicates_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_latency(&self, latency: Duration) {
        let mut latencies = self.request_latencies_ms.lock().unwrap();
        latencies.push(latency.as_millis() as u64);
        // Bound memory under sustained load
        if latencies.len() > 10_000 {
            let excess = latencies.len() - 10_000;
            latencies.drain(0..excess);
        }
    }

    pub fn record_agent_call(&self, agent: &str, success: bool, latency: Duration) {
        let mut map = self.agent_calls.lock().unwrap();
        let stats = map.entry(agent.to_string()).or_default();
        if success {
            stats.success += 1;
        } else {
            stats.failure += 1;
        }
        stats.total_latency_ms += latency.as_millis() as u64;
    }

    pub fn record_retry(&self, agent: &str) {
        let mut map = self.retry_attempts.lock().unwrap();
        *map.entry(agent.to_string()).or_insert(0) += 1;
    }

    pub fn record_breaker_trip(&self, agent: &str) {
        let mut map = self.breaker_trips.lock().unwrap();
        *map.entry(agent.to_string()).or_insert(0) += 1;
    }

    pub fn record_dlq_enqueued(&self, reason: &str) {
        let mut map = self.dlq_enqueued.lock().unwrap();
        *map.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn set_dlq_depth(&self, depth: u64) {
        self.dlq_depth.store(depth, Ordering::Relaxed);
    }

    pub fn record_replay_processed(&self) {
        self.replay_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay_skipped(&self) {
        self.replay_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay_failed(&self) {
        self.replay_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time view for the health server and tests
    pub fn snapshot(&self) -> MetricsSnapshot {
        let latencies = self.request_latencies_ms.lock().unwrap();
        let request_latency_avg_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
        };

        MetricsSnapshot {
            signals_received: self.signals_received.lock().unwrap().clone(),
            duplicates_rejected: self.duplicates_rejected.load(Ordering::Relaxed),
            requests_observed: latencies.len() as u64,
            request_latency_avg_ms,
            agent_calls: self.agent_calls.lock().unwrap().clone(),
            retry_attempts: self.retry_attempts.lock().unwrap().clone(),
            breaker_trips: self.breaker_trips.lock().unwrap().clone(),
            dlq_enqueued: self.dlq_enqueued.lock().unwrap().clone(),
            dlq_depth: self.dlq_depth.load(Ordering::Relaxed),
            replay_processed: self.replay_processed.load(Ordering::Relaxed),
            replay_skipped: self.replay_skipped.load(Ordering::Relaxed),
            replay_failed: self.replay_failed.load(Ordering::Relaxed),
        }
    }

    /// Clear all counters; test isolation only
    pub fn reset(&self) {
        self.signals_received.lock().unwrap().clear();
        self.duplicates_rejected.store(0, Ordering::Relaxed);
        self.request_latencies_ms.lock().unwrap().clear();
        self.agent_calls.lock().unwrap().clear();
        self.retry_attempts.lock().unwrap().clear();
        self.breaker_trips.lock().unwrap().clear();
        self.dlq_enqueued.lock().unwrap().clear();
        self.dlq_depth.store(0, Ordering::Relaxed);
        self.replay_processed.store(0, Ordering::Relaxed);
        self.replay_skipped.store(0, Ordering::Relaxed);
        self.replay_failed.store(0, Ordering::Relaxed);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable point-in-time metrics view
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub signals_received: HashMap<String, u64>,
    pub duplicates_rejected: u64,
    pub requests_observed: u64,
    pub request_latency_avg_ms: f64,
    pub agent_calls: HashMap<String, AgentCallStats>,
    pub retry_attempts: HashMap<String, u64>,
    pub breaker_trips: HashMap<String, u64>,
    pub dlq_enqueued: HashMap<String, u64>,
    pub dlq_depth: u64,
    pub replay_processed: u64,
    pub replay_skipped: u64,
    pub replay_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let collector = MetricsCollector::new();
        collector.record_signal("emergency");
        collector.record_signal("emergency");
        collector.record_signal("assist");
        collector.record_duplicate();
        collector.record_agent_call("Axis", true, Duration::from_millis(5));
        collector.record_agent_call("Axis", false, Duration::from_millis(7));
        collector.record_dlq_enqueued("all_agents_failed");
        collector.set_dlq_depth(3);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.signals_received["emergency"], 2);
        assert_eq!(snapshot.signals_received["assist"], 1);
        assert_eq!(snapshot.duplicates_rejected, 1);
        assert_eq!(snapshot.agent_calls["Axis"].success, 1);
        assert_eq!(snapshot.agent_calls["Axis"].failure, 1);
        assert_eq!(snapshot.agent_calls["Axis"].total_latency_ms, 12);
        assert_eq!(snapshot.dlq_enqueued["all_agents_failed"], 1);
        assert_eq!(snapshot.dlq_depth, 3);
    }

    #[test]
    fn test_latency_average() {
        let collector = MetricsCollector::new();
        collector.record_request_latency(Duration::from_millis(10));
        collector.record_request_latency(Duration::from_millis(30));
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.requests_observed, 2);
        assert!((snapshot.request_latency_avg_ms - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset_clears_everything() {
        let collector = MetricsCollector::new();
        collector.record_signal("assist");
        collector.record_replay_processed();
        collector.reset();
        let snapshot = collector.snapshot();
        assert!(snapshot.signals_received.is_empty());
        assert_eq!(snapshot.replay_processed, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let collector = MetricsCollector::new();
        collector.record_signal("policy");
        let json = serde_json::to_value(collector.snapshot()).unwrap();
        assert_eq!(json["signals_received"]["policy"], 1);
    }
}
