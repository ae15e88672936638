use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub compute: ComputeConfig,
    pub dataset: DatasetConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `VANTAGE_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("VANTAGE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            compute: ComputeConfig::from_env_profiled(p),
            dataset: DatasetConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  compute:  timeout={}s, evict_on_version_bump={}, ece_bins={}",
            self.compute.timeout_secs,
            self.compute.evict_on_version_bump,
            self.compute.ece_bins
        );
        tracing::info!(
            "  dataset:  path={}",
            self.dataset
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string())
        );
    }
}

// ── Compute ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeConfig {
    /// Upper bound on a single module computation.
    pub timeout_secs: u64,
    /// Sweep superseded cache entries as soon as a newer dataset version is seen.
    pub evict_on_version_bump: bool,
    /// Number of confidence bins used for calibration error.
    pub ece_bins: u64,
}

impl ComputeConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            timeout_secs: positive_timeout(profiled_env_u64(p, "VANTAGE_COMPUTE_TIMEOUT_SECS", 300)),
            evict_on_version_bump: profiled_env_bool(p, "VANTAGE_EVICT_ON_VERSION_BUMP", true),
            ece_bins: profiled_env_u64(p, "VANTAGE_ECE_BINS", 20),
        }
    }
}

/// A zero timeout would fail every computation, so it is raised to one second.
fn positive_timeout(secs: u64) -> u64 {
    if secs == 0 {
        tracing::warn!("VANTAGE_COMPUTE_TIMEOUT_SECS=0 is not a usable bound, using 1s");
        1
    } else {
        secs
    }
}

// ── Dataset ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// JSON dataset loaded by the worker binary.
    pub path: Option<PathBuf>,
}

impl DatasetConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            path: profiled_env_opt(p, "VANTAGE_DATASET_PATH").map(PathBuf::from),
        }
    }
}
