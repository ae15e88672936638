use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::dataset::{ClassId, Outcome, Utterance};
use crate::error::VantageError;

/// A single resolved predicate over an utterance.
///
/// The derived ordering (variant first, then value) is the canonical order
/// used wherever a filter set has to be compared or hashed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FilterClause {
    /// Utterance is labelled with this class.
    Label(ClassId),
    /// Selected pipeline predicts this class (after postprocessing).
    Prediction(ClassId),
    /// Selected pipeline's prediction has this outcome.
    Outcome(Outcome),
    /// Utterance text contains this substring (case-insensitive).
    Utterance(String),
}

impl FilterClause {
    fn kind(&self) -> u8 {
        match self {
            FilterClause::Label(_) => 0,
            FilterClause::Prediction(_) => 1,
            FilterClause::Outcome(_) => 2,
            FilterClause::Utterance(_) => 3,
        }
    }

    pub fn requires_pipeline(&self) -> bool {
        matches!(self, FilterClause::Prediction(_) | FilterClause::Outcome(_))
    }

    fn matches(
        &self,
        utterance: &Utterance,
        pipeline_index: Option<usize>,
        rejection_class: Option<ClassId>,
    ) -> bool {
        match self {
            FilterClause::Label(class) => utterance.label == *class,
            FilterClause::Prediction(class) => pipeline_index
                .and_then(|p| utterance.prediction(p))
                .is_some_and(|p| p.postprocessed_prediction == *class),
            FilterClause::Outcome(outcome) => pipeline_index
                .and_then(|p| utterance.outcome(p, rejection_class))
                .is_some_and(|o| o == *outcome),
            FilterClause::Utterance(needle) => {
                utterance.text.to_lowercase().contains(&needle.to_lowercase())
            }
        }
    }
}

/// Resolved filter set. Clauses of the same kind are OR-ed, kinds are AND-ed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetFilters {
    clauses: BTreeSet<FilterClause>,
}

impl DatasetFilters {
    pub fn from_clauses(clauses: impl IntoIterator<Item = FilterClause>) -> Self {
        Self {
            clauses: clauses.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, clause: FilterClause) {
        self.clauses.insert(clause);
    }

    pub fn with(mut self, clause: FilterClause) -> Self {
        self.insert(clause);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Clauses in canonical order.
    pub fn clauses(&self) -> impl Iterator<Item = &FilterClause> {
        self.clauses.iter()
    }

    pub fn requires_pipeline(&self) -> bool {
        self.clauses.iter().any(FilterClause::requires_pipeline)
    }

    pub fn matches(
        &self,
        utterance: &Utterance,
        pipeline_index: Option<usize>,
        rejection_class: Option<ClassId>,
    ) -> bool {
        let mut kind: Option<u8> = None;
        let mut kind_matched = true;
        // Clauses are sorted, so each kind forms one contiguous run.
        for clause in &self.clauses {
            if kind != Some(clause.kind()) {
                if !kind_matched {
                    return false;
                }
                kind = Some(clause.kind());
                kind_matched = false;
            }
            if !kind_matched && clause.matches(utterance, pipeline_index, rejection_class) {
                kind_matched = true;
            }
        }
        kind_matched
    }

    /// Utterances of `utterances` that pass every clause.
    pub fn apply<'a>(
        &'a self,
        utterances: &'a [Utterance],
        pipeline_index: Option<usize>,
        rejection_class: Option<ClassId>,
    ) -> impl Iterator<Item = &'a Utterance> + 'a {
        utterances
            .iter()
            .filter(move |u| self.matches(u, pipeline_index, rejection_class))
    }
}

/// Filters as supplied by a user: class and outcome names, not ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedDatasetFilters {
    #[serde(default)]
    pub label: Vec<String>,
    #[serde(default)]
    pub prediction: Vec<String>,
    #[serde(default)]
    pub outcome: Vec<String>,
    #[serde(default)]
    pub utterance: Option<String>,
}

impl NamedDatasetFilters {
    /// Resolve names against the dataset's class list.
    pub fn to_dataset_filters(&self, class_names: &[String]) -> Result<DatasetFilters, VantageError> {
        let mut filters = DatasetFilters::default();
        for name in &self.label {
            filters.insert(FilterClause::Label(resolve_class(name, class_names, "label")?));
        }
        for name in &self.prediction {
            filters.insert(FilterClause::Prediction(resolve_class(
                name,
                class_names,
                "prediction",
            )?));
        }
        for name in &self.outcome {
            let outcome = Outcome::ALL
                .into_iter()
                .find(|o| o.to_string() == *name)
                .ok_or_else(|| VantageError::InvalidFilter(format!("unknown outcome '{}'", name)))?;
            filters.insert(FilterClause::Outcome(outcome));
        }
        if let Some(text) = self.utterance.as_deref().filter(|t| !t.is_empty()) {
            filters.insert(FilterClause::Utterance(text.to_string()));
        }
        Ok(filters)
    }
}

fn resolve_class(name: &str, class_names: &[String], field: &str) -> Result<ClassId, VantageError> {
    class_names
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| VantageError::InvalidFilter(format!("unknown class '{}' in {} filter", name, field)))
}
