//! Units of work the task manager can run over a dataset split.
//!
//! Each [`Module`] is built from [`ModuleOptions`] by a factory in the
//! [`ModuleRegistry`](crate::registry::ModuleRegistry) and produces a list of
//! [`ModuleResponse`] records. Modules only read the split they are handed.

mod class_distribution;
mod metrics;
mod metrics_per_filter;
pub mod types;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use vantage_core::{DatasetSplit, ModuleOptions};

use crate::error::TaskError;

pub use class_distribution::ClassDistributionModule;
pub use metrics::MetricsModule;
pub use metrics_per_filter::MetricsPerFilterModule;
pub use types::{
    CalibrationBin, ClassCount, ClassDistributionResponse, MetricsModuleResponse,
    MetricsPerFilterModuleResponse, MetricsPerFilterValue, ModuleResponse,
};

/// Closed set of modules the engine knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SupportedModule {
    Metrics,
    MetricsPerFilter,
    ClassDistribution,
}

impl SupportedModule {
    pub const ALL: [SupportedModule; 3] = [
        SupportedModule::Metrics,
        SupportedModule::MetricsPerFilter,
        SupportedModule::ClassDistribution,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SupportedModule::Metrics => "metrics",
            SupportedModule::MetricsPerFilter => "metrics_per_filter",
            SupportedModule::ClassDistribution => "class_distribution",
        }
    }
}

impl fmt::Display for SupportedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SupportedModule {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SupportedModule::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| TaskError::UnknownModule(s.to_string()))
    }
}

/// Error type for module execution.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    #[error("Module failed: {0}")]
    Failed(String),
    #[error("Pipeline index {index} out of range ({available} pipelines)")]
    PipelineOutOfRange { index: usize, available: usize },
    #[error("Module requires a pipeline index")]
    MissingPipeline,
    #[error("No utterances match the current filters")]
    EmptySubset,
}

/// A unit of compute work over one dataset split.
///
/// Implementations capture their [`ModuleOptions`] at construction and must
/// be deterministic for a given split snapshot.
pub trait Module: Send + Sync {
    /// Human-readable name for logging and metrics.
    fn name(&self) -> &str;

    /// Whether the module needs `pipeline_index` to be set.
    fn requires_pipeline(&self) -> bool;

    /// Options the module was built with.
    fn options(&self) -> &ModuleOptions;

    /// Run the computation.
    fn compute(&self, split: &DatasetSplit) -> Result<Vec<ModuleResponse>, ComputeError>;
}

/// Resolve the pipeline index a module should read, checking it exists in the split.
pub(crate) fn checked_pipeline(
    options: &ModuleOptions,
    split: &DatasetSplit,
) -> Result<Option<usize>, ComputeError> {
    match options.pipeline_index {
        Some(index) if index >= split.pipeline_count => Err(ComputeError::PipelineOutOfRange {
            index,
            available: split.pipeline_count,
        }),
        other => Ok(other),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;

    use vantage_core::{DatasetSplit, Prediction, Utterance};

    /// Three classes, the last one used for rejection, one pipeline.
    pub fn split() -> DatasetSplit {
        let rows = [
            // (label, prediction, confidence, text)
            (0, 0, 0.9, "hello there"),
            (0, 0, 0.8, "hi"),
            (0, 1, 0.6, "hey bye"),
            (1, 1, 0.95, "goodbye"),
            (1, 2, 0.3, "see you"),
            (2, 2, 0.2, "what is the weather"),
        ];
        let utterances = rows
            .iter()
            .enumerate()
            .map(|(id, (label, pred, confidence, text))| Utterance {
                id,
                text: text.to_string(),
                label: *label,
                predictions: vec![Prediction {
                    model_prediction: *pred,
                    postprocessed_prediction: *pred,
                    confidence: *confidence,
                }],
            })
            .collect();
        DatasetSplit {
            name: "validation".into(),
            class_names: Arc::from(vec![
                "greet".to_string(),
                "bye".to_string(),
                "NO_INTENT".to_string(),
            ]),
            rejection_class: Some(2),
            pipeline_count: 1,
            utterances,
        }
    }
}
