use std::collections::BTreeMap;

use rayon::prelude::*;
use vantage_core::{DatasetFilters, DatasetSplit, FilterClause, ModuleOptions, Outcome, Utterance};

use super::metrics::compute_metrics;
use super::types::{MetricsPerFilterModuleResponse, MetricsPerFilterValue, ModuleResponse};
use super::{checked_pipeline, ComputeError, Module};

/// Metrics for every value of the label, prediction and outcome filters,
/// on top of whatever filters the options already carry.
pub struct MetricsPerFilterModule {
    options: ModuleOptions,
    ece_bins: usize,
}

impl MetricsPerFilterModule {
    pub fn new(options: ModuleOptions, ece_bins: usize) -> Self {
        Self {
            options,
            ece_bins: ece_bins.max(1),
        }
    }
}

impl Module for MetricsPerFilterModule {
    fn name(&self) -> &str {
        "metrics_per_filter"
    }

    fn requires_pipeline(&self) -> bool {
        true
    }

    fn options(&self) -> &ModuleOptions {
        &self.options
    }

    fn compute(&self, split: &DatasetSplit) -> Result<Vec<ModuleResponse>, ComputeError> {
        let pipeline = checked_pipeline(&self.options, split)?.ok_or(ComputeError::MissingPipeline)?;
        let base: Vec<&Utterance> = self
            .options
            .filters
            .apply(&split.utterances, Some(pipeline), split.rejection_class)
            .collect();

        let classes = 0..split.class_names.len();
        let dimensions: Vec<(&str, Vec<(String, FilterClause)>)> = vec![
            (
                "label",
                classes
                    .clone()
                    .map(|c| (split.class_name(c).to_string(), FilterClause::Label(c)))
                    .collect(),
            ),
            (
                "prediction",
                classes
                    .map(|c| (split.class_name(c).to_string(), FilterClause::Prediction(c)))
                    .collect(),
            ),
            (
                "outcome",
                Outcome::ALL
                    .into_iter()
                    .map(|o| (o.to_string(), FilterClause::Outcome(o)))
                    .collect(),
            ),
        ];

        let mut metrics_per_filter = BTreeMap::new();
        for (dimension, values) in dimensions {
            let mut per_value: Vec<MetricsPerFilterValue> = values
                .into_par_iter()
                .map(|(value_name, clause)| {
                    let filter = DatasetFilters::default().with(clause);
                    let rows: Vec<&Utterance> = base
                        .iter()
                        .copied()
                        .filter(|u| filter.matches(u, Some(pipeline), split.rejection_class))
                        .collect();
                    let metrics = compute_metrics(&rows, pipeline, split, self.ece_bins);
                    MetricsPerFilterValue::from_metrics(value_name, &metrics)
                })
                .collect();
            per_value.sort_by(|a, b| {
                b.utterance_count
                    .cmp(&a.utterance_count)
                    .then_with(|| a.filter_value.cmp(&b.filter_value))
            });
            metrics_per_filter.insert(dimension.to_string(), per_value);
        }

        Ok(vec![ModuleResponse::MetricsPerFilter(
            MetricsPerFilterModuleResponse { metrics_per_filter },
        )])
    }
}
