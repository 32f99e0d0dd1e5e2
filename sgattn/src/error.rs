//! Error types for the attention scorer

use thiserror::Error;

/// Result type alias for the scorer crate
pub type Result<T> = std::result::Result<T, ScoreError>;

/// Errors raised while loading weights or running the attention head
#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Missing tensor in weight blob: {0}")]
    MissingTensor(String),

    #[error("Invalid weight blob: {0}")]
    WeightFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScoreError {
    pub fn shape_mismatch<S: Into<String>>(what: S, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    pub fn weight_format<S: Into<String>>(msg: S) -> Self {
        Self::WeightFormat(msg.into())
    }
}
