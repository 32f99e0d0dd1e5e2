//! Error types for the anomaly detection pipeline

use thiserror::Error;

/// Result type alias for the anomaly detection library
pub type Result<T> = std::result::Result<T, AnomalyError>;

/// Errors that can occur while analysing a video or recording its evidence
#[derive(Error, Debug)]
pub enum AnomalyError {
    #[error("Video decode failed: {0}")]
    Decode(String),

    #[error("Invalid dimensions: expected {expected:?}, got {actual:?}")]
    InvalidDimensions {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Unsupported frame format: {0}")]
    UnsupportedFormat(String),

    #[error("Scorer error: {0}")]
    ShapeMismatch(#[from] sgattn::ScoreError),

    #[error("Feature extraction failed: {0}")]
    Extraction(String),

    #[error("Anchor service unavailable: {0}")]
    AnchorUnavailable(String),

    #[error("Failed to persist alert record: {0}")]
    RecordPersistFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl AnomalyError {
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    pub fn invalid_dimensions(expected: &[usize], actual: &[usize]) -> Self {
        Self::InvalidDimensions {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    pub fn unsupported_format<S: Into<String>>(msg: S) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    pub fn extraction<S: Into<String>>(msg: S) -> Self {
        Self::Extraction(msg.into())
    }

    pub fn anchor_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::AnchorUnavailable(msg.into())
    }

    pub fn record_persist<S: Into<String>>(msg: S) -> Self {
        Self::RecordPersistFailed(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }

    /// Only a failed anchor upload is worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::AnchorUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_anchor_failures_are_transient() {
        assert!(AnomalyError::anchor_unavailable("timeout").is_transient());
        assert!(!AnomalyError::record_persist("disk full").is_transient());
        assert!(!AnomalyError::decode("bad gif").is_transient());
        assert!(!AnomalyError::invalid_dimensions(&[224, 224], &[100, 100]).is_transient());
    }

    #[test]
    fn test_score_error_converts() {
        let err: AnomalyError = sgattn::ScoreError::MissingTensor("classifier.bias".into()).into();
        assert!(matches!(err, AnomalyError::ShapeMismatch(_)));
        assert!(err.to_string().contains("classifier.bias"));
    }
}
