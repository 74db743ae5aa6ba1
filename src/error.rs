//! Error types for the hashing system
//!
//! Every failure the core can report is a distinct variant. Nothing is
//! coerced into a default value, and the core never retries.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for calibration, hashing and persistence
#[derive(Error, Debug)]
pub enum LshError {
    #[error(
        "Insufficient calibration data: need {required} distinct vectors, got {available}\nSuggestion: Provide at least 2 * bits vectors or lower the hash length"
    )]
    InsufficientData { required: usize, available: usize },

    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure every vector comes from the same feature extractor as the model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "No hyperplane model is available\nSuggestion: Run calibration or load a saved model before hashing"
    )]
    ModelNotFitted,

    #[error(
        "A hyperplane model has already been published\nSuggestion: Create a new engine to use a different model"
    )]
    ModelAlreadyPresent,

    #[error("Malformed input: {reason}\nSuggestion: Payloads must be a sequence of 32-bit floats")]
    MalformedInput { reason: String },

    #[error("Model artifact '{path}' is unusable: {reason}")]
    Persistence { path: PathBuf, reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("IO error: {0}\nSuggestion: Check disk space and file permissions")]
    Io(#[from] std::io::Error),
}

impl LshError {
    /// Get a stable status code for this error type.
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::InsufficientData { .. } => "INSUFFICIENT_DATA",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::ModelNotFitted => "MODEL_NOT_FITTED",
            Self::ModelAlreadyPresent => "MODEL_ALREADY_PRESENT",
            Self::MalformedInput { .. } => "MALFORMED_INPUT",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
            Self::InvalidConfig { .. } => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Persistence { .. } => vec![
                "Re-run 'planehash fit' to regenerate the model artifact",
                "Check that model_path points at a file written by 'planehash fit'",
            ],
            Self::ModelNotFitted => vec![
                "Set calibration_source to fit a new model",
                "Set model_path to an existing artifact to load it",
            ],
            Self::InsufficientData { .. } => {
                vec!["Lower 'bits' in planehash.toml or add calibration vectors"]
            }
            _ => vec![],
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Persistence {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for core operations
pub type LshResult<T> = Result<T, LshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_distinct() {
        let errors = [
            LshError::InsufficientData {
                required: 4,
                available: 3,
            },
            LshError::DimensionMismatch {
                expected: 4,
                actual: 3,
            },
            LshError::ModelNotFitted,
            LshError::ModelAlreadyPresent,
            LshError::MalformedInput {
                reason: "odd".to_string(),
            },
            LshError::persistence("m.bin", "truncated"),
            LshError::InvalidConfig {
                reason: "bits".to_string(),
            },
        ];

        let mut codes: Vec<_> = errors.iter().map(LshError::status_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_messages_carry_context() {
        let err = LshError::InsufficientData {
            required: 4,
            available: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("need 4"));
        assert!(msg.contains("got 3"));

        let err = LshError::persistence("/tmp/model.bin", "truncated");
        assert!(err.to_string().contains("/tmp/model.bin"));
        assert!(!err.recovery_suggestions().is_empty());
    }
}
