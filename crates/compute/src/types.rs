use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vantage_core::config::ComputeConfig;

use crate::modules::{ModuleResponse, SupportedModule};

/// Payload of one finished computation, shared read-only with every waiter.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleResult {
    pub module: SupportedModule,
    /// Dataset version the computation was admitted under.
    pub dataset_version: u64,
    pub responses: Vec<ModuleResponse>,
    pub computed_at: DateTime<Utc>,
    pub duration: Duration,
}

/// Task manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskManagerConfig {
    /// Upper bound on a single computation, in seconds.
    #[serde(default = "default_timeout")]
    pub computation_timeout_secs: u64,
    /// Sweep superseded cache entries as soon as a newer dataset version is admitted.
    #[serde(default = "default_evict")]
    pub evict_on_version_bump: bool,
    /// Confidence bins used by the metrics modules.
    #[serde(default = "default_ece_bins")]
    pub ece_bins: usize,
}

fn default_timeout() -> u64 { 300 }
fn default_evict() -> bool { true }
fn default_ece_bins() -> usize { 20 }

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            computation_timeout_secs: default_timeout(),
            evict_on_version_bump: default_evict(),
            ece_bins: default_ece_bins(),
        }
    }
}

impl TaskManagerConfig {
    /// Computation bound, never shorter than one second.
    pub fn computation_timeout(&self) -> Duration {
        Duration::from_secs(self.computation_timeout_secs.max(1))
    }
}

impl From<&ComputeConfig> for TaskManagerConfig {
    fn from(c: &ComputeConfig) -> Self {
        Self {
            computation_timeout_secs: c.timeout_secs,
            evict_on_version_bump: c.evict_on_version_bump,
            ece_bins: c.ece_bins as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = TaskManagerConfig::default();
        assert_eq!(config.computation_timeout_secs, 300);
        assert!(config.evict_on_version_bump);
        assert_eq!(config.ece_bins, 20);
        assert_eq!(config.computation_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn config_partial_json_uses_defaults() {
        let config: TaskManagerConfig =
            serde_json::from_str(r#"{"computation_timeout_secs": 5}"#).unwrap();
        assert_eq!(config.computation_timeout_secs, 5);
        assert!(config.evict_on_version_bump);
        assert_eq!(config.ece_bins, 20);
    }

    #[test]
    fn zero_timeout_is_bounded_below() {
        let config: TaskManagerConfig =
            serde_json::from_str(r#"{"computation_timeout_secs": 0}"#).unwrap();
        assert_eq!(config.computation_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn from_compute_config() {
        let c = ComputeConfig {
            timeout_secs: 12,
            evict_on_version_bump: false,
            ece_bins: 5,
        };
        let config = TaskManagerConfig::from(&c);
        assert_eq!(config.computation_timeout_secs, 12);
        assert!(!config.evict_on_version_bump);
        assert_eq!(config.ece_bins, 5);
    }
}
