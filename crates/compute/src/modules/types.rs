use std::collections::BTreeMap;

use serde::Serialize;
use vantage_core::Outcome;

/// One confidence bin of a calibration curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub accuracy: f64,
    pub mean_confidence: f64,
}

/// Metrics over a (filtered) split for one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsModuleResponse {
    pub utterance_count: usize,
    pub outcome_count: BTreeMap<Outcome, usize>,
    /// Expected calibration error.
    pub ece: f64,
    pub calibration: Vec<CalibrationBin>,
    /// Accuracy and macro precision / recall / F1.
    pub custom_metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsPerFilterValue {
    pub filter_value: String,
    pub utterance_count: usize,
    pub outcome_count: BTreeMap<Outcome, usize>,
    pub ece: f64,
    pub custom_metrics: BTreeMap<String, f64>,
}

impl MetricsPerFilterValue {
    pub fn from_metrics(filter_value: impl Into<String>, metrics: &MetricsModuleResponse) -> Self {
        Self {
            filter_value: filter_value.into(),
            utterance_count: metrics.utterance_count,
            outcome_count: metrics.outcome_count.clone(),
            ece: metrics.ece,
            custom_metrics: metrics.custom_metrics.clone(),
        }
    }
}

/// Metrics broken down per value of each filter dimension
/// (`label`, `prediction`, `outcome`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsPerFilterModuleResponse {
    pub metrics_per_filter: BTreeMap<String, Vec<MetricsPerFilterValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassCount {
    pub class_name: String,
    pub label_count: usize,
    /// Present when a pipeline was selected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassDistributionResponse {
    pub utterance_count: usize,
    pub classes: Vec<ClassCount>,
}

/// Record produced by a module; serializes as the inner record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ModuleResponse {
    Metrics(MetricsModuleResponse),
    MetricsPerFilter(MetricsPerFilterModuleResponse),
    ClassDistribution(ClassDistributionResponse),
}

impl ModuleResponse {
    pub fn as_metrics(&self) -> Option<&MetricsModuleResponse> {
        match self {
            ModuleResponse::Metrics(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_metrics_per_filter(&self) -> Option<&MetricsPerFilterModuleResponse> {
        match self {
            ModuleResponse::MetricsPerFilter(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_class_distribution(&self) -> Option<&ClassDistributionResponse> {
        match self {
            ModuleResponse::ClassDistribution(c) => Some(c),
            _ => None,
        }
    }
}
