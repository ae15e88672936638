use std::fmt;

use serde::{Deserialize, Serialize};

use crate::filters::DatasetFilters;

/// Name of a dataset partition, e.g. `validation` or `train`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SplitName(String);

impl SplitName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SplitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SplitName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SplitName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Immutable configuration a module is built from.
///
/// Two option values compare equal whenever their filter sets hold the same
/// clauses and they select the same pipeline, no matter how they were built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleOptions {
    #[serde(default)]
    pub filters: DatasetFilters,
    #[serde(default)]
    pub pipeline_index: Option<usize>,
}

impl ModuleOptions {
    pub fn new(filters: DatasetFilters, pipeline_index: Option<usize>) -> Self {
        Self {
            filters,
            pipeline_index,
        }
    }

    /// Options with no filters for the given pipeline.
    pub fn for_pipeline(pipeline_index: usize) -> Self {
        Self {
            filters: DatasetFilters::default(),
            pipeline_index: Some(pipeline_index),
        }
    }

    pub fn with_filters(mut self, filters: DatasetFilters) -> Self {
        self.filters = filters;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterClause;

    #[test]
    fn split_name_serializes_as_plain_string() {
        let name = SplitName::from("validation");
        assert_eq!(serde_json::to_string(&name).unwrap(), "\"validation\"");
        assert_eq!(name.to_string(), "validation");
    }

    #[test]
    fn options_equal_regardless_of_clause_order() {
        let a = ModuleOptions::for_pipeline(0).with_filters(DatasetFilters::from_clauses([
            FilterClause::Label(2),
            FilterClause::Label(0),
        ]));
        let b = ModuleOptions::for_pipeline(0).with_filters(DatasetFilters::from_clauses([
            FilterClause::Label(0),
            FilterClause::Label(2),
        ]));
        assert_eq!(a, b);
    }

    #[test]
    fn pipeline_none_differs_from_some() {
        let none = ModuleOptions::default();
        let some = ModuleOptions::for_pipeline(0);
        assert_ne!(none, some);
    }
}
