//! Crime Detector
//!
//! Video anomaly detection for surveillance footage: decode a video, cut it
//! into fixed-length clips, score every clip crop with a self-guided
//! attention head, decide whether the video shows an anomaly and, when it
//! does, anchor the footage and record an alert.

pub mod aggregation;
pub mod anchor;
pub mod augment;
pub mod config;
pub mod error;
pub mod evidence;
pub mod evidence_pool;
pub mod extractor;
pub mod pipeline;
pub mod preprocessing;
pub mod store;
pub mod types;
pub mod video;

pub use aggregation::{CropReduction, Decision, DecisionPolicy, TemporalPolicy};
pub use anchor::{AnchorService, PinataAnchor};
pub use config::AnalyzerConfig;
pub use error::{AnomalyError, Result};
pub use evidence::{EvidenceOutcome, EvidencePipeline, EvidenceState};
pub use evidence_pool::{EvidenceJob, EvidencePool, EvidenceTicket};
pub use extractor::{FeatureExtractor, ProjectionExtractor, SegmentEmbedding};
#[cfg(feature = "onnx")]
pub use extractor::OnnxFeatureExtractor;
pub use pipeline::{AnalysisPipeline, AnalysisReport, PipelineTiming};
pub use preprocessing::{ClipPreprocessor, Normalization, Resize};
pub use store::{AlertStore, JsonLinesAlertStore, MemoryAlertStore};
pub use types::{
    AlertMetadata, AlertRecord, Clip, ContentIdentifier, CropVariant, ImageData, ImageFormat,
    RecordId, SegmentScores, SourceVideo,
};
pub use video::{AutoDecoder, DecodeHint, GifDecoder, VideoDecoder};

/// Get library version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
