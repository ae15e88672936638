use vantage_core::{DatasetSplit, ModuleOptions};

use super::types::{ClassCount, ClassDistributionResponse, ModuleResponse};
use super::{checked_pipeline, ComputeError, Module};

/// Per-class label counts, plus prediction counts when a pipeline is selected.
pub struct ClassDistributionModule {
    options: ModuleOptions,
}

impl ClassDistributionModule {
    pub fn new(options: ModuleOptions) -> Self {
        Self { options }
    }
}

impl Module for ClassDistributionModule {
    fn name(&self) -> &str {
        "class_distribution"
    }

    fn requires_pipeline(&self) -> bool {
        false
    }

    fn options(&self) -> &ModuleOptions {
        &self.options
    }

    fn compute(&self, split: &DatasetSplit) -> Result<Vec<ModuleResponse>, ComputeError> {
        let pipeline = checked_pipeline(&self.options, split)?;
        let classes = split.class_names.len();
        let mut labels = vec![0usize; classes];
        let mut predictions = vec![0usize; classes];
        let mut utterance_count = 0;

        for u in self
            .options
            .filters
            .apply(&split.utterances, pipeline, split.rejection_class)
        {
            utterance_count += 1;
            labels[u.label] += 1;
            if let Some(p) = pipeline.and_then(|p| u.prediction(p)) {
                predictions[p.postprocessed_prediction] += 1;
            }
        }

        let classes = (0..classes)
            .map(|c| ClassCount {
                class_name: split.class_name(c).to_string(),
                label_count: labels[c],
                prediction_count: pipeline.map(|_| predictions[c]),
            })
            .collect();

        Ok(vec![ModuleResponse::ClassDistribution(ClassDistributionResponse {
            utterance_count,
            classes,
        })])
    }
}
