use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};
use vantage_core::{FilterClause, ModuleOptions, SplitName};

use crate::modules::SupportedModule;

/// Canonical cache key for one module computation.
///
/// Filter clauses are stored in their canonical order, so keys built from
/// the same clause set compare and hash equal whatever order the clauses
/// were added in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConfigKey {
    module: SupportedModule,
    split: SplitName,
    filters: Vec<FilterClause>,
    pipeline_index: Option<usize>,
    dataset_version: u64,
}

impl ConfigKey {
    pub fn new(
        module: SupportedModule,
        split: &SplitName,
        options: &ModuleOptions,
        dataset_version: u64,
    ) -> Self {
        Self {
            module,
            split: split.clone(),
            filters: options.filters.clauses().cloned().collect(),
            pipeline_index: options.pipeline_index,
            dataset_version,
        }
    }

    pub fn module(&self) -> SupportedModule {
        self.module
    }

    pub fn split(&self) -> &SplitName {
        &self.split
    }

    pub fn pipeline_index(&self) -> Option<usize> {
        self.pipeline_index
    }

    pub fn dataset_version(&self) -> u64 {
        self.dataset_version
    }

    /// Stable hex SHA-256 of the key, for logs and external correlation.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.module.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.split.as_str().as_bytes());
        hasher.update([0]);
        // Serializing a Vec of plain enums cannot fail.
        hasher.update(serde_json::to_vec(&self.filters).unwrap_or_default());
        hasher.update([0]);
        match self.pipeline_index {
            Some(p) => hasher.update((p as u64 + 1).to_le_bytes()),
            None => hasher.update(0u64.to_le_bytes()),
        }
        hasher.update(self.dataset_version.to_le_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.module, self.split)?;
        if let Some(p) = self.pipeline_index {
            write!(f, "/p{}", p)?;
        }
        if !self.filters.is_empty() {
            f.write_str("[")?;
            for (i, clause) in self.filters.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                match clause {
                    FilterClause::Label(c) => write!(f, "label={}", c)?,
                    FilterClause::Prediction(c) => write!(f, "prediction={}", c)?,
                    FilterClause::Outcome(o) => write!(f, "outcome={}", o)?,
                    FilterClause::Utterance(text) => write!(f, "utterance~{:?}", text)?,
                }
            }
            f.write_str("]")?;
        }
        write!(f, "#v{}", self.dataset_version)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    use vantage_core::{DatasetFilters, NamedDatasetFilters, Outcome};

    use super::*;

    fn hash_of(key: &ConfigKey) -> u64 {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        h.finish()
    }

    fn split() -> SplitName {
        SplitName::from("validation")
    }

    #[test]
    fn equal_configs_give_equal_keys() {
        let opts = ModuleOptions::for_pipeline(0);
        let a = ConfigKey::new(SupportedModule::Metrics, &split(), &opts, 1);
        let b = ConfigKey::new(SupportedModule::Metrics, &split(), &opts.clone(), 1);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn filter_order_does_not_change_key() {
        let forward = DatasetFilters::from_clauses([
            FilterClause::Label(0),
            FilterClause::Outcome(Outcome::CorrectAndPredicted),
            FilterClause::Utterance("hi".into()),
        ]);
        let backward = DatasetFilters::from_clauses([
            FilterClause::Utterance("hi".into()),
            FilterClause::Outcome(Outcome::CorrectAndPredicted),
            FilterClause::Label(0),
        ]);
        let a = ConfigKey::new(
            SupportedModule::Metrics,
            &split(),
            &ModuleOptions::new(forward, Some(0)),
            3,
        );
        let b = ConfigKey::new(
            SupportedModule::Metrics,
            &split(),
            &ModuleOptions::new(backward, Some(0)),
            3,
        );
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn keys_built_through_different_paths_collide() {
        let classes = vec!["greet".to_string(), "bye".to_string()];
        let named = NamedDatasetFilters {
            label: vec!["bye".into(), "greet".into()],
            ..Default::default()
        };
        let resolved = named.to_dataset_filters(&classes).unwrap();
        let manual = DatasetFilters::default()
            .with(FilterClause::Label(0))
            .with(FilterClause::Label(1));
        let a = ConfigKey::new(SupportedModule::Metrics, &split(), &ModuleOptions::new(resolved, Some(0)), 1);
        let b = ConfigKey::new(SupportedModule::Metrics, &split(), &ModuleOptions::new(manual, Some(0)), 1);
        assert_eq!(a, b);
    }

    #[test]
    fn each_component_distinguishes_keys() {
        let base = ConfigKey::new(SupportedModule::Metrics, &split(), &ModuleOptions::for_pipeline(0), 1);
        let others = [
            ConfigKey::new(SupportedModule::MetricsPerFilter, &split(), &ModuleOptions::for_pipeline(0), 1),
            ConfigKey::new(SupportedModule::Metrics, &"train".into(), &ModuleOptions::for_pipeline(0), 1),
            ConfigKey::new(SupportedModule::Metrics, &split(), &ModuleOptions::for_pipeline(1), 1),
            ConfigKey::new(SupportedModule::Metrics, &split(), &ModuleOptions::default(), 1),
            ConfigKey::new(SupportedModule::Metrics, &split(), &ModuleOptions::for_pipeline(0), 2),
            ConfigKey::new(
                SupportedModule::Metrics,
                &split(),
                &ModuleOptions::for_pipeline(0)
                    .with_filters(DatasetFilters::default().with(FilterClause::Label(0))),
                1,
            ),
        ];
        for other in &others {
            assert_ne!(&base, other);
            assert_ne!(base.fingerprint(), other.fingerprint());
        }
    }

    #[test]
    fn display_is_compact() {
        let key = ConfigKey::new(SupportedModule::Metrics, &split(), &ModuleOptions::for_pipeline(0), 7);
        assert_eq!(key.to_string(), "metrics@validation/p0#v7");
    }

    #[test]
    fn display_spells_out_filters() {
        let with = |clause| {
            ConfigKey::new(
                SupportedModule::Metrics,
                &split(),
                &ModuleOptions::for_pipeline(0).with_filters(DatasetFilters::default().with(clause)),
                1,
            )
        };
        let by_label = with(FilterClause::Label(0));
        let by_outcome = with(FilterClause::Outcome(Outcome::CorrectAndRejected));
        let by_text = with(FilterClause::Utterance("hi".into()));

        assert_eq!(by_label.to_string(), "metrics@validation/p0[label=0]#v1");
        assert_eq!(
            by_outcome.to_string(),
            "metrics@validation/p0[outcome=CorrectAndRejected]#v1"
        );
        assert_eq!(by_text.to_string(), "metrics@validation/p0[utterance~\"hi\"]#v1");
        assert_ne!(by_label.to_string(), with(FilterClause::Label(1)).to_string());
    }
}
