use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::CacheStats;

/// Task manager operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskMetrics {
    /// Module executions by module name.
    pub executions: HashMap<String, u64>,
    /// Failed executions by module name.
    pub failures: HashMap<String, u64>,
    /// Average execution duration by module name.
    pub avg_duration: HashMap<String, Duration>,
    /// Last execution time by module name.
    pub last_run: HashMap<String, DateTime<Utc>>,
    /// Requests answered from the cache.
    pub cache_hits: u64,
    /// Requests that attached to an in-flight computation.
    pub coalesced_requests: u64,
    /// Computations that exceeded the timeout.
    pub timeouts: u64,
    /// Ready entries currently cached.
    pub cached_results: usize,
    /// Computations currently running.
    pub in_flight: usize,
    /// Highest dataset version admitted so far.
    pub dataset_version: u64,
}

impl TaskMetrics {
    /// Record a successful module execution.
    pub fn record_execution(&mut self, module: &str, duration: Duration) {
        *self.executions.entry(module.to_string()).or_default() += 1;
        self.last_run.insert(module.to_string(), Utc::now());

        let count = self.executions[module];
        let prev_avg = self.avg_duration.get(module).copied().unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_duration.insert(module.to_string(), new_avg);
    }

    /// Record a module execution that returned an error.
    pub fn record_failure(&mut self, module: &str) {
        *self.failures.entry(module.to_string()).or_default() += 1;
        self.last_run.insert(module.to_string(), Utc::now());
    }

    /// Fold cache counters into this snapshot.
    pub fn with_cache_stats(mut self, stats: &CacheStats) -> Self {
        self.cache_hits = stats.hits;
        self.coalesced_requests = stats.coalesced;
        self.timeouts = stats.timeouts;
        self.cached_results = stats.ready_entries;
        self.in_flight = stats.in_flight;
        self
    }
}
