use thiserror::Error;

use crate::analysis::Stage;

// Main Review Error Type

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("Validation Error: {0}")]
    Validation(String),
    #[error("Analysis degraded during {stage}: {reason}")]
    AnalysisDegraded { stage: Stage, reason: String },
    #[error("Persistence Error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("The record was cancelled.")]
    Cancelled,
    #[error("Configuration Error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Image Error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Index {index} is out of range for a session of {len} records")]
    IndexOutOfRange { index: usize, len: usize },
}

impl ReviewError {
    pub fn degraded(stage: Stage, reason: impl Into<String>) -> Self {
        Self::AnalysisDegraded {
            stage,
            reason: reason.into(),
        }
    }

    /// Whether the error should ever reach the person reviewing the photos.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, ReviewError::Cancelled)
    }
}

// Persistence Error Type
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("Failed to encode entry: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("No stored image named {0}")]
    NotFound(String),
    #[error("Store rejected the entry: {0}")]
    Rejected(String),
}
