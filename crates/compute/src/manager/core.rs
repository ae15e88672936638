use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::info;
use vantage_core::{DatasetSource, SplitName};

use crate::cache::ResultCache;
use crate::metrics::TaskMetrics;
use crate::registry::ModuleRegistry;
use crate::types::TaskManagerConfig;

/// Orchestrates module computations over a dataset and caches their results.
///
/// One instance owns the cache for the lifetime of the process. The registry
/// is fixed at construction; the dataset version is only ever read.
pub struct TaskManager {
    pub(super) config: TaskManagerConfig,
    pub(super) registry: Arc<ModuleRegistry>,
    pub(super) dataset: Arc<dyn DatasetSource>,
    pub(super) cache: ResultCache,
    pub(super) metrics: Arc<RwLock<TaskMetrics>>,
    /// Highest dataset version admitted so far.
    pub(super) last_seen_version: AtomicU64,
}

impl TaskManager {
    pub fn new(
        config: TaskManagerConfig,
        registry: ModuleRegistry,
        dataset: Arc<dyn DatasetSource>,
    ) -> Self {
        info!(
            "Task manager starting with {} modules, timeout {:?}",
            registry.len(),
            config.computation_timeout()
        );
        let cache = ResultCache::new(config.computation_timeout());
        Self {
            config,
            registry: Arc::new(registry),
            dataset,
            cache,
            metrics: Arc::new(RwLock::new(TaskMetrics::default())),
            last_seen_version: AtomicU64::new(0),
        }
    }

    /// Task manager with every standard module registered.
    pub fn with_standard_modules(config: TaskManagerConfig, dataset: Arc<dyn DatasetSource>) -> Self {
        let registry = ModuleRegistry::standard(config.ece_bins);
        Self::new(config, registry, dataset)
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    pub fn dataset(&self) -> &Arc<dyn DatasetSource> {
        &self.dataset
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Snapshot of the current metrics.
    pub fn metrics(&self) -> TaskMetrics {
        let snapshot = match self.metrics.read() {
            Ok(m) => m.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let mut snapshot = snapshot.with_cache_stats(&self.cache.stats());
        snapshot.dataset_version = self.last_seen_version.load(Ordering::SeqCst);
        snapshot
    }

    /// Drop every cached result for a split.
    pub fn invalidate_split(&self, split: &SplitName) -> usize {
        self.cache.invalidate_split(split)
    }
}
