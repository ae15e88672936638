use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::VantageError;
use crate::options::SplitName;

/// Index of a class in the dataset's class list.
pub type ClassId = usize;

/// How a prediction relates to its label, taking rejection into account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Outcome {
    CorrectAndPredicted,
    CorrectAndRejected,
    IncorrectAndRejected,
    IncorrectAndPredicted,
}

impl Outcome {
    pub const ALL: [Outcome; 4] = [
        Outcome::CorrectAndPredicted,
        Outcome::CorrectAndRejected,
        Outcome::IncorrectAndRejected,
        Outcome::IncorrectAndPredicted,
    ];

    /// Classify a single prediction against its label.
    pub fn classify(label: ClassId, prediction: ClassId, rejection_class: Option<ClassId>) -> Self {
        let rejected = rejection_class == Some(prediction);
        match (prediction == label, rejected) {
            (true, false) => Outcome::CorrectAndPredicted,
            (true, true) => Outcome::CorrectAndRejected,
            (false, true) => Outcome::IncorrectAndRejected,
            (false, false) => Outcome::IncorrectAndPredicted,
        }
    }

    pub fn is_correct(self) -> bool {
        matches!(self, Outcome::CorrectAndPredicted | Outcome::CorrectAndRejected)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::CorrectAndPredicted => write!(f, "CorrectAndPredicted"),
            Outcome::CorrectAndRejected => write!(f, "CorrectAndRejected"),
            Outcome::IncorrectAndRejected => write!(f, "IncorrectAndRejected"),
            Outcome::IncorrectAndPredicted => write!(f, "IncorrectAndPredicted"),
        }
    }
}

/// Output of one pipeline for one utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Class picked by the raw model.
    pub model_prediction: ClassId,
    /// Class after postprocessing (thresholding may map it to the rejection class).
    pub postprocessed_prediction: ClassId,
    /// Confidence of the model prediction, in `[0, 1]`.
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub id: usize,
    pub text: String,
    pub label: ClassId,
    /// One entry per pipeline, indexed by pipeline index.
    #[serde(default)]
    pub predictions: Vec<Prediction>,
}

impl Utterance {
    pub fn prediction(&self, pipeline_index: usize) -> Option<&Prediction> {
        self.predictions.get(pipeline_index)
    }

    pub fn outcome(&self, pipeline_index: usize, rejection_class: Option<ClassId>) -> Option<Outcome> {
        self.prediction(pipeline_index)
            .map(|p| Outcome::classify(self.label, p.postprocessed_prediction, rejection_class))
    }
}

/// Immutable snapshot of one dataset split, shared with running modules.
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub name: SplitName,
    pub class_names: Arc<[String]>,
    pub rejection_class: Option<ClassId>,
    pub pipeline_count: usize,
    pub utterances: Vec<Utterance>,
}

impl DatasetSplit {
    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    pub fn class_name(&self, class: ClassId) -> &str {
        self.class_names.get(class).map(String::as_str).unwrap_or("<unknown>")
    }
}

/// Read side of the dataset component.
///
/// `last_update` must grow monotonically and be bumped on every change to
/// content, labels or predictions.
pub trait DatasetSource: Send + Sync {
    fn last_update(&self) -> u64;

    /// Class names in class-id order.
    fn class_names(&self) -> Vec<String>;

    fn split(&self, name: &SplitName) -> Result<Arc<DatasetSplit>, VantageError>;
}

/// On-disk JSON layout understood by [`InMemoryDataset::load`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDocument {
    pub class_names: Vec<String>,
    #[serde(default)]
    pub rejection_class: Option<ClassId>,
    #[serde(default)]
    pub pipeline_count: usize,
    pub splits: BTreeMap<String, Vec<Utterance>>,
}

/// Process-local dataset with a version counter bumped on every mutation.
pub struct InMemoryDataset {
    class_names: Arc<[String]>,
    rejection_class: Option<ClassId>,
    pipeline_count: usize,
    splits: RwLock<HashMap<SplitName, Arc<DatasetSplit>>>,
    last_update: AtomicU64,
}

impl InMemoryDataset {
    pub fn new(
        class_names: Vec<String>,
        rejection_class: Option<ClassId>,
        pipeline_count: usize,
    ) -> Result<Self, VantageError> {
        if let Some(r) = rejection_class {
            if r >= class_names.len() {
                return Err(VantageError::InvalidDataset(format!(
                    "rejection class {} out of range for {} classes",
                    r,
                    class_names.len()
                )));
            }
        }
        Ok(Self {
            class_names: class_names.into(),
            rejection_class,
            pipeline_count,
            splits: RwLock::new(HashMap::new()),
            last_update: AtomicU64::new(0),
        })
    }

    pub fn from_document(doc: DatasetDocument) -> Result<Self, VantageError> {
        let dataset = Self::new(doc.class_names, doc.rejection_class, doc.pipeline_count)?;
        for (name, utterances) in doc.splits {
            dataset.replace_split(SplitName::from(name), utterances)?;
        }
        Ok(dataset)
    }

    pub fn from_json_str(json: &str) -> Result<Self, VantageError> {
        let doc: DatasetDocument = serde_json::from_str(json)?;
        Self::from_document(doc)
    }

    pub fn load(path: &Path) -> Result<Self, VantageError> {
        let raw = std::fs::read_to_string(path)?;
        let dataset = Self::from_json_str(&raw)?;
        info!(
            "Loaded dataset from {} ({} classes, {} pipelines)",
            path.display(),
            dataset.class_names.len(),
            dataset.pipeline_count
        );
        Ok(dataset)
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipeline_count
    }

    /// Replace (or create) a split. Returns the new dataset version.
    pub fn replace_split(
        &self,
        name: SplitName,
        utterances: Vec<Utterance>,
    ) -> Result<u64, VantageError> {
        self.validate(&name, &utterances)?;
        let split = Arc::new(DatasetSplit {
            name: name.clone(),
            class_names: Arc::clone(&self.class_names),
            rejection_class: self.rejection_class,
            pipeline_count: self.pipeline_count,
            utterances,
        });
        let mut splits = self
            .splits
            .write()
            .map_err(|e| VantageError::Other(format!("dataset write lock: {}", e)))?;
        splits.insert(name.clone(), split);
        let version = self.bump();
        debug!(split = %name, version, "Split replaced");
        Ok(version)
    }

    /// Edit a split in place (relabel, new predictions, ...). Returns the new version.
    pub fn update_split<F>(&self, name: &SplitName, edit: F) -> Result<u64, VantageError>
    where
        F: FnOnce(&mut Vec<Utterance>),
    {
        let mut utterances = self.split(name)?.utterances.clone();
        edit(&mut utterances);
        self.replace_split(name.clone(), utterances)
    }

    /// Record an out-of-band change (e.g. new pipeline outputs) without touching splits.
    pub fn touch(&self) -> u64 {
        self.bump()
    }

    fn bump(&self) -> u64 {
        self.last_update.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn validate(&self, name: &SplitName, utterances: &[Utterance]) -> Result<(), VantageError> {
        let classes = self.class_names.len();
        for u in utterances {
            if u.label >= classes {
                return Err(VantageError::InvalidDataset(format!(
                    "split {}: utterance {} has label {} but only {} classes exist",
                    name, u.id, u.label, classes
                )));
            }
            if u.predictions.len() != self.pipeline_count {
                return Err(VantageError::InvalidDataset(format!(
                    "split {}: utterance {} has {} predictions, expected {}",
                    name,
                    u.id,
                    u.predictions.len(),
                    self.pipeline_count
                )));
            }
            for p in &u.predictions {
                if p.model_prediction >= classes || p.postprocessed_prediction >= classes {
                    return Err(VantageError::InvalidDataset(format!(
                        "split {}: utterance {} predicts an unknown class",
                        name, u.id
                    )));
                }
                if !(0.0..=1.0).contains(&p.confidence) {
                    return Err(VantageError::InvalidDataset(format!(
                        "split {}: utterance {} has confidence {} outside [0, 1]",
                        name, u.id, p.confidence
                    )));
                }
            }
        }
        Ok(())
    }
}

impl DatasetSource for InMemoryDataset {
    fn last_update(&self) -> u64 {
        self.last_update.load(Ordering::SeqCst)
    }

    fn class_names(&self) -> Vec<String> {
        self.class_names.to_vec()
    }

    fn split(&self, name: &SplitName) -> Result<Arc<DatasetSplit>, VantageError> {
        let splits = self
            .splits
            .read()
            .map_err(|e| VantageError::Other(format!("dataset read lock: {}", e)))?;
        splits
            .get(name)
            .cloned()
            .ok_or_else(|| VantageError::SplitNotFound(name.to_string()))
    }
}
