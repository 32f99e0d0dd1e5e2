//! Analyzer configuration loaded from TOML
//!
//! Only `[model] variant` is required in practice: clip length, crop,
//! resize and normalization fall back to the variant's defaults.

use crate::aggregation::{DecisionPolicy, TemporalPolicy};
use crate::error::{AnomalyError, Result};
use crate::preprocessing::{ClipPreprocessor, Interpolation, MirrorAxis, Normalization, Resize};
use serde::{Deserialize, Serialize};
use sgattn::{ArchVariant, BranchFusion};
use std::path::{Path, PathBuf};

pub const PINATA_API_KEY_ENV: &str = "PINATA_API_KEY";
pub const PINATA_SECRET_API_KEY_ENV: &str = "PINATA_SECRET_API_KEY";
/// Upper bound on extra anchor attempts per alert
pub const MAX_ANCHOR_RETRIES: u32 = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub model: ModelConfig,
    pub preprocess: PreprocessConfig,
    pub decision: DecisionPolicy,
    pub evidence: EvidenceConfig,
    pub anchor: AnchorConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub variant: ArchVariant,
    /// Attention head weights (safetensors)
    pub weights_path: Option<PathBuf>,
    /// Backbone graph (ONNX)
    pub extractor_path: Option<PathBuf>,
    pub fusion: BranchFusion,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub clip_length: Option<usize>,
    pub crop_size: Option<u32>,
    /// Shortest-side resize target
    pub resize: Option<u32>,
    /// Ten-crop oversampling
    pub oversample: bool,
    pub mirror: MirrorAxis,
    pub interpolation: Interpolation,
    pub allow_upscale: bool,
    pub normalization: Option<Normalization>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    pub workers: usize,
    pub queue_depth: usize,
    pub anchor_retries: u32,
    /// JSON-lines alert store
    pub record_store: PathBuf,
    /// Remove the transient video once it is no longer needed
    pub delete_transient: bool,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_depth: 8,
            anchor_retries: 1,
            record_store: PathBuf::from("alerts.jsonl"),
            delete_transient: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    pub endpoint: String,
    pub gateway: String,
    pub timeout_secs: u64,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.pinata.cloud/pinning/pinFileToIPFS".to_string(),
            gateway: "https://gateway.pinata.cloud".to_string(),
            timeout_secs: 60,
        }
    }
}

impl AnalyzerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        log::info!("Loaded configuration from {} (variant {})", path.display(), config.model.variant);
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AnomalyError::config(format!("invalid TOML: {}", e)))
    }

    pub fn for_variant(variant: ArchVariant) -> Self {
        let mut config = Self::default();
        config.model.variant = variant;
        config
    }

    pub fn clip_length(&self) -> usize {
        self.preprocess
            .clip_length
            .unwrap_or_else(|| self.model.variant.clip_length())
    }

    pub fn crop_size(&self) -> u32 {
        self.preprocess
            .crop_size
            .unwrap_or_else(|| self.model.variant.backbone().crop_size())
    }

    pub fn resize(&self) -> u32 {
        self.preprocess
            .resize
            .unwrap_or_else(|| self.model.variant.backbone().resize())
    }

    pub fn normalization(&self) -> Normalization {
        self.preprocess
            .normalization
            .unwrap_or_else(|| Normalization::for_backbone(self.model.variant.backbone()))
    }

    pub fn preprocessor(&self) -> ClipPreprocessor {
        ClipPreprocessor::new(
            self.crop_size(),
            Resize::ShortestSide(self.resize()),
            self.normalization(),
        )
        .with_oversampling(self.preprocess.oversample)
        .with_mirror_axis(self.preprocess.mirror)
        .with_interpolation(self.preprocess.interpolation)
        .with_upscaling(self.preprocess.allow_upscale)
    }

    /// Startup validation; every rejection here would otherwise surface per request
    pub fn validate(&self) -> Result<()> {
        if self.clip_length() == 0 {
            return Err(AnomalyError::invalid_dimensions(&[1], &[0]));
        }

        let (crop, resize) = (self.crop_size(), self.resize());
        if crop == 0 || resize == 0 || crop > resize {
            return Err(AnomalyError::invalid_dimensions(
                &[resize as usize],
                &[crop as usize],
            ));
        }

        let threshold = self.decision.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AnomalyError::config(format!(
                "decision threshold must lie in [0, 1], got {}",
                threshold
            )));
        }

        if let TemporalPolicy::MovingAverage { window: 0 } = self.decision.temporal {
            return Err(AnomalyError::config("moving average window must be at least 1"));
        }

        if self.evidence.workers == 0 || self.evidence.queue_depth == 0 {
            return Err(AnomalyError::config(
                "evidence pool needs at least one worker and a non-empty queue",
            ));
        }

        if self.evidence.anchor_retries > MAX_ANCHOR_RETRIES {
            return Err(AnomalyError::config(format!(
                "anchor_retries must be at most {}, got {}",
                MAX_ANCHOR_RETRIES, self.evidence.anchor_retries
            )));
        }

        self.normalization().validate()?;
        Ok(())
    }
}
