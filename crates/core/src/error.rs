use thiserror::Error;

#[derive(Error, Debug)]
pub enum VantageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Dataset split not found: {0}")]
    SplitNotFound(String),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for VantageError {
    fn from(e: serde_json::Error) -> Self {
        VantageError::Serialize(e.to_string())
    }
}
