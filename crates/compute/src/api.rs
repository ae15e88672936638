//! Calls exposed to the routing layer.
//!
//! Each function maps one request shape onto task manager calls and folds the
//! module responses into the response the router serializes.

use std::collections::BTreeMap;

use serde::Serialize;
use vantage_core::{ModuleOptions, NamedDatasetFilters, Outcome, SplitName};

use crate::error::TaskError;
use crate::manager::TaskManager;
use crate::modules::{
    CalibrationBin, MetricsModuleResponse, MetricsPerFilterValue, ModuleResponse, SupportedModule,
};

/// Metrics as returned to API consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsApiResponse {
    pub utterance_count: usize,
    pub outcome_count: BTreeMap<Outcome, usize>,
    pub ece: f64,
    pub ece_plot: Vec<CalibrationBin>,
    pub custom_metrics: BTreeMap<String, f64>,
}

impl From<&MetricsModuleResponse> for MetricsApiResponse {
    fn from(m: &MetricsModuleResponse) -> Self {
        Self {
            utterance_count: m.utterance_count,
            outcome_count: m.outcome_count.clone(),
            ece: m.ece,
            // Empty bins only add noise to a plot.
            ece_plot: m.calibration.iter().filter(|b| b.count > 0).cloned().collect(),
            custom_metrics: m.custom_metrics.clone(),
        }
    }
}

/// Per-filter metrics plus the overall metrics as a single `overall` row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsPerFilterApiResponse {
    pub metrics_per_filter: BTreeMap<String, Vec<MetricsPerFilterValue>>,
    pub metrics_overall: Vec<MetricsPerFilterValue>,
}

/// Reject requests without a pipeline index.
pub fn require_pipeline_index(
    module: SupportedModule,
    pipeline_index: Option<usize>,
) -> Result<usize, TaskError> {
    pipeline_index.ok_or(TaskError::MissingPipeline(module))
}

/// Responses of `module`, served for the live dataset version.
pub async fn get_standard_task_result(
    manager: &TaskManager,
    module: SupportedModule,
    split: &SplitName,
    options: &ModuleOptions,
    last_update: u64,
) -> Result<Vec<ModuleResponse>, TaskError> {
    let result = manager.get_result(module, split, options, last_update).await?;
    Ok(result.responses.clone())
}

/// Metrics over the filtered split.
pub async fn get_metrics(
    manager: &TaskManager,
    split: &SplitName,
    named_filters: &NamedDatasetFilters,
    pipeline_index: Option<usize>,
) -> Result<MetricsApiResponse, TaskError> {
    let pipeline_index = require_pipeline_index(SupportedModule::Metrics, pipeline_index)?;
    let dataset = manager.dataset();
    let filters = named_filters.to_dataset_filters(&dataset.class_names())?;
    let options = ModuleOptions::new(filters, Some(pipeline_index));

    let responses = get_standard_task_result(
        manager,
        SupportedModule::Metrics,
        split,
        &options,
        dataset.last_update(),
    )
    .await?;

    first_metrics(&responses).map(MetricsApiResponse::from)
}

/// Metrics for each filter value, with the unfiltered metrics alongside.
pub async fn get_metrics_per_filter(
    manager: &TaskManager,
    split: &SplitName,
    pipeline_index: Option<usize>,
) -> Result<MetricsPerFilterApiResponse, TaskError> {
    let pipeline_index =
        require_pipeline_index(SupportedModule::MetricsPerFilter, pipeline_index)?;
    let options = ModuleOptions::for_pipeline(pipeline_index);
    let last_update = manager.dataset().last_update();

    let per_filter = get_standard_task_result(
        manager,
        SupportedModule::MetricsPerFilter,
        split,
        &options,
        last_update,
    )
    .await?;
    let overall =
        get_standard_task_result(manager, SupportedModule::Metrics, split, &options, last_update)
            .await?;

    let per_filter = per_filter
        .iter()
        .find_map(ModuleResponse::as_metrics_per_filter)
        .ok_or_else(|| unexpected_shape(SupportedModule::MetricsPerFilter))?;
    let overall = first_metrics(&overall)?;

    Ok(MetricsPerFilterApiResponse {
        metrics_per_filter: per_filter.metrics_per_filter.clone(),
        metrics_overall: vec![MetricsPerFilterValue::from_metrics("overall", overall)],
    })
}

fn first_metrics(responses: &[ModuleResponse]) -> Result<&MetricsModuleResponse, TaskError> {
    responses
        .iter()
        .find_map(ModuleResponse::as_metrics)
        .ok_or_else(|| unexpected_shape(SupportedModule::Metrics))
}

fn unexpected_shape(module: SupportedModule) -> TaskError {
    TaskError::Computation(format!("{} returned an unexpected response", module))
}
