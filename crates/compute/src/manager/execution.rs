use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};
use vantage_core::{DatasetSplit, ModuleOptions, SplitName};

use crate::cache::SharedResult;
use crate::error::TaskError;
use crate::key::ConfigKey;
use crate::metrics::TaskMetrics;
use crate::modules::{Module, SupportedModule};
use crate::types::ModuleResult;

use super::TaskManager;

impl TaskManager {
    /// Result of `module` over `split`, computing it if needed.
    ///
    /// `last_update` is the dataset version the caller observed. The request
    /// is always served for the live version: if the dataset has moved on,
    /// the result is computed for the newer version instead.
    ///
    /// Client errors (unknown module or split, missing pipeline) are returned
    /// before the cache is consulted.
    pub async fn get_result(
        &self,
        module: SupportedModule,
        split: &SplitName,
        options: &ModuleOptions,
        last_update: u64,
    ) -> Result<SharedResult, TaskError> {
        let registered = self.registry.get(module)?;
        let needs_pipeline = registered.requires_pipeline() || options.filters.requires_pipeline();
        if needs_pipeline && options.pipeline_index.is_none() {
            return Err(TaskError::MissingPipeline(module));
        }

        let version = self.dataset.last_update();
        let snapshot = self.dataset.split(split)?;
        if version != last_update {
            debug!(
                module = %module,
                split = %split,
                requested = last_update,
                live = version,
                "Dataset version differs from request, using live version"
            );
        }
        self.observe_version(version);

        let key = ConfigKey::new(module, split, options, version);
        // Only the request that starts a computation builds the module.
        self.cache
            .get_or_compute(key, || {
                let instance = registered.build(options);
                run_module(module, instance, snapshot, version, Arc::clone(&self.metrics))
            })
            .await
    }

    /// Track the newest admitted version and sweep superseded results once it advances.
    fn observe_version(&self, version: u64) {
        let previous = self.last_seen_version.fetch_max(version, Ordering::SeqCst);
        if version > previous {
            info!(previous, version, "Dataset version advanced");
            if self.config.evict_on_version_bump {
                self.cache.evict_stale(version);
            }
        } else if version < previous {
            warn!(previous, version, "Dataset version went backwards");
        }
    }
}

/// Run a module on the blocking pool and wrap its output.
async fn run_module(
    module: SupportedModule,
    instance: Arc<dyn Module>,
    snapshot: Arc<DatasetSplit>,
    version: u64,
    metrics: Arc<RwLock<TaskMetrics>>,
) -> Result<ModuleResult, TaskError> {
    info!(module = %module, split = %snapshot.name, version, "Running module");
    let split_name = snapshot.name.clone();

    let handle = tokio::task::spawn_blocking(move || {
        let start = Instant::now();
        let responses = instance
            .compute(&snapshot)
            .map_err(|e| TaskError::from_compute(module, e))?;
        Ok::<_, TaskError>((responses, start.elapsed()))
    });

    let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(e) => Err(TaskError::Computation(format!("{} worker panicked: {}", module, e))),
    };

    match outcome {
        Ok((responses, duration)) => {
            if let Ok(mut m) = metrics.write() {
                m.record_execution(module.as_str(), duration);
            }
            info!(
                module = %module,
                split = %split_name,
                version,
                "Module finished in {:.3}s",
                duration.as_secs_f64()
            );
            Ok(ModuleResult {
                module,
                dataset_version: version,
                responses,
                computed_at: Utc::now(),
                duration,
            })
        }
        Err(e) => {
            if let Ok(mut m) = metrics.write() {
                m.record_failure(module.as_str());
            }
            Err(e)
        }
    }
}
