//! Error types for the composable-lipidomics library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum LipidError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed input ({context}): {reason}")]
    MalformedInput { context: String, reason: String },

    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    #[error("Sample annotation error: {0}")]
    UnmatchedSample(String),

    #[error("Internal standard not found: {0}")]
    MissingStandard(String),

    #[error("Invalid value {value} for feature '{feature}' in sample '{sample}' during {stage}")]
    InvalidValue {
        stage: String,
        feature: String,
        sample: String,
        value: f64,
    },

    #[error("Group '{group}' has {found} usable samples, at least {required} required")]
    InsufficientGroups {
        group: String,
        found: usize,
        required: usize,
    },

    #[error("Measure '{0}' not present in experiment")]
    MissingMeasure(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LipidError {
    /// Shorthand for a [`LipidError::MalformedInput`] with a context label.
    pub fn malformed(context: impl Into<String>, reason: impl Into<String>) -> Self {
        LipidError::MalformedInput {
            context: context.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, LipidError>;
