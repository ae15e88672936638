use std::collections::{BTreeMap, BTreeSet};

use vantage_core::{DatasetSplit, ModuleOptions, Outcome, Utterance};

use super::types::{CalibrationBin, MetricsModuleResponse, ModuleResponse};
use super::{checked_pipeline, ComputeError, Module};

/// Outcome counts, calibration error and classification metrics for one pipeline.
pub struct MetricsModule {
    options: ModuleOptions,
    ece_bins: usize,
}

impl MetricsModule {
    pub fn new(options: ModuleOptions, ece_bins: usize) -> Self {
        Self {
            options,
            ece_bins: ece_bins.max(1),
        }
    }
}

impl Module for MetricsModule {
    fn name(&self) -> &str {
        "metrics"
    }

    fn requires_pipeline(&self) -> bool {
        true
    }

    fn options(&self) -> &ModuleOptions {
        &self.options
    }

    fn compute(&self, split: &DatasetSplit) -> Result<Vec<ModuleResponse>, ComputeError> {
        let pipeline = checked_pipeline(&self.options, split)?.ok_or(ComputeError::MissingPipeline)?;
        let rows: Vec<&Utterance> = self
            .options
            .filters
            .apply(&split.utterances, Some(pipeline), split.rejection_class)
            .collect();
        if rows.is_empty() {
            return Err(ComputeError::EmptySubset);
        }
        Ok(vec![ModuleResponse::Metrics(compute_metrics(
            &rows,
            pipeline,
            split,
            self.ece_bins,
        ))])
    }
}

/// Metrics over an arbitrary row subset. Empty subsets yield all-zero metrics.
pub(crate) fn compute_metrics(
    rows: &[&Utterance],
    pipeline: usize,
    split: &DatasetSplit,
    ece_bins: usize,
) -> MetricsModuleResponse {
    let mut outcome_count: BTreeMap<Outcome, usize> =
        Outcome::ALL.into_iter().map(|o| (o, 0)).collect();

    // (label, postprocessed prediction) pairs for the classification metrics.
    let mut pairs = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(outcome) = row.outcome(pipeline, split.rejection_class) {
            *outcome_count.entry(outcome).or_default() += 1;
        }
        if let Some(p) = row.prediction(pipeline) {
            pairs.push((row.label, p.postprocessed_prediction));
        }
    }

    let (ece, calibration) = calibration(rows, pipeline, ece_bins);

    let mut custom_metrics = BTreeMap::new();
    let correct: usize = outcome_count
        .iter()
        .filter(|(o, _)| o.is_correct())
        .map(|(_, c)| *c)
        .sum();
    custom_metrics.insert("Accuracy".to_string(), ratio(correct, rows.len()));
    let (precision, recall, f1) = macro_scores(&pairs);
    custom_metrics.insert("Precision".to_string(), precision);
    custom_metrics.insert("Recall".to_string(), recall);
    custom_metrics.insert("F1".to_string(), f1);

    MetricsModuleResponse {
        utterance_count: rows.len(),
        outcome_count,
        ece,
        calibration,
        custom_metrics,
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Expected calibration error of the raw model prediction, with equal-width bins.
fn calibration(rows: &[&Utterance], pipeline: usize, bins: usize) -> (f64, Vec<CalibrationBin>) {
    let mut count = vec![0usize; bins];
    let mut correct = vec![0usize; bins];
    let mut confidence = vec![0.0f64; bins];

    for row in rows {
        let Some(p) = row.prediction(pipeline) else { continue };
        let bin = ((p.confidence * bins as f64) as usize).min(bins - 1);
        count[bin] += 1;
        confidence[bin] += p.confidence;
        if p.model_prediction == row.label {
            correct[bin] += 1;
        }
    }

    let total: usize = count.iter().sum();
    let mut ece = 0.0;
    let mut out = Vec::with_capacity(bins);
    for b in 0..bins {
        let accuracy = ratio(correct[b], count[b]);
        let mean_confidence = if count[b] == 0 { 0.0 } else { confidence[b] / count[b] as f64 };
        if total > 0 {
            ece += (accuracy - mean_confidence).abs() * count[b] as f64 / total as f64;
        }
        out.push(CalibrationBin {
            lower: b as f64 / bins as f64,
            upper: (b + 1) as f64 / bins as f64,
            count: count[b],
            accuracy,
            mean_confidence,
        });
    }
    (ece, out)
}

/// Macro-averaged precision, recall and F1 over every class seen as a label or prediction.
fn macro_scores(pairs: &[(usize, usize)]) -> (f64, f64, f64) {
    let classes: BTreeSet<usize> = pairs.iter().flat_map(|(l, p)| [*l, *p]).collect();
    if classes.is_empty() {
        return (0.0, 0.0, 0.0);
    }

    let (mut p_sum, mut r_sum, mut f_sum) = (0.0, 0.0, 0.0);
    for class in &classes {
        let tp = pairs.iter().filter(|(l, p)| l == class && p == class).count();
        let predicted = pairs.iter().filter(|(_, p)| p == class).count();
        let actual = pairs.iter().filter(|(l, _)| l == class).count();
        let precision = ratio(tp, predicted);
        let recall = ratio(tp, actual);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        p_sum += precision;
        r_sum += recall;
        f_sum += f1;
    }
    let n = classes.len() as f64;
    (p_sum / n, r_sum / n, f_sum / n)
}

#[cfg(test)]
mod tests {
    use vantage_core::{DatasetFilters, FilterClause};

    use super::*;
    use crate::modules::fixtures;

    fn metrics(options: ModuleOptions) -> Result<MetricsModuleResponse, ComputeError> {
        let module = MetricsModule::new(options, 20);
        let mut out = module.compute(&fixtures::split())?;
        match out.pop() {
            Some(ModuleResponse::Metrics(m)) => Ok(m),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn outcome_counts() {
        let m = metrics(ModuleOptions::for_pipeline(0)).unwrap();
        assert_eq!(m.utterance_count, 6);
        assert_eq!(m.outcome_count[&Outcome::CorrectAndPredicted], 3);
        assert_eq!(m.outcome_count[&Outcome::CorrectAndRejected], 1);
        assert_eq!(m.outcome_count[&Outcome::IncorrectAndRejected], 1);
        assert_eq!(m.outcome_count[&Outcome::IncorrectAndPredicted], 1);
    }

    #[test]
    fn classification_metrics() {
        let m = metrics(ModuleOptions::for_pipeline(0)).unwrap();
        let close = |a: f64, b: f64| (a - b).abs() < 1e-6;
        assert!(close(m.custom_metrics["Accuracy"], 4.0 / 6.0));
        assert!(close(m.custom_metrics["Precision"], 2.0 / 3.0));
        assert!(close(m.custom_metrics["Recall"], (2.0 / 3.0 + 0.5 + 1.0) / 3.0));
        assert!(close(m.custom_metrics["F1"], (0.8 + 0.5 + 2.0 / 3.0) / 3.0));
    }

    #[test]
    fn calibration_error() {
        let m = metrics(ModuleOptions::for_pipeline(0)).unwrap();
        assert!((m.ece - 2.05 / 6.0).abs() < 1e-6, "ece was {}", m.ece);
        assert_eq!(m.calibration.len(), 20);
        assert_eq!(m.calibration.iter().map(|b| b.count).sum::<usize>(), 6);
    }

    #[test]
    fn filters_narrow_the_subset() {
        let options = ModuleOptions::for_pipeline(0)
            .with_filters(DatasetFilters::default().with(FilterClause::Label(0)));
        let m = metrics(options).unwrap();
        assert_eq!(m.utterance_count, 3);
        assert_eq!(m.outcome_count[&Outcome::IncorrectAndPredicted], 1);
    }

    #[test]
    fn empty_subset_fails() {
        let options = ModuleOptions::for_pipeline(0)
            .with_filters(DatasetFilters::default().with(FilterClause::Utterance("zzz".into())));
        assert!(matches!(metrics(options), Err(ComputeError::EmptySubset)));
    }

    #[test]
    fn requires_pipeline() {
        assert!(matches!(
            metrics(ModuleOptions::default()),
            Err(ComputeError::MissingPipeline)
        ));
    }

    #[test]
    fn empty_rows_give_zero_metrics() {
        let split = fixtures::split();
        let m = compute_metrics(&[], 0, &split, 10);
        assert_eq!(m.utterance_count, 0);
        assert_eq!(m.ece, 0.0);
        assert_eq!(m.custom_metrics["Accuracy"], 0.0);
    }
}
