//! Anomaly scorer on top of the self-guided attention branch

use crate::branch::SelfGuidedAttention;
use crate::error::{Result, ScoreError};
use crate::ops::{global_avg_pool3d, linear, sigmoid, softmax};
use crate::variant::ArchSpec;
use crate::weights::AttentionWeights;
use ndarray::{s, Array2, ArrayView5};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// How the classifier output and the head scores are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchFusion {
    /// Classifier probability only
    #[default]
    Main,
    /// Mean of the classifier probability and the anomalous head weight
    Mean,
}

/// Score for one batch item
#[derive(Debug, Clone)]
pub struct ScoreOutput {
    /// Anomaly probability in [0, 1]
    pub probability: f32,
    /// Softmax over (normal, anomalous) head scores
    pub head_weights: [f32; 2],
    /// Spatial attention `[H', W']`
    pub attention_map: Array2<f32>,
}

/// Maps a segment embedding `[B, C, T, H, W]` to one score per batch item.
///
/// Implementations hold immutable weights and are shared across threads.
pub trait Scorer: Send + Sync {
    fn score(&self, embedding: ArrayView5<f32>) -> Result<Vec<ScoreOutput>>;

    /// Geometry the scorer expects its input in
    fn spec(&self) -> &ArchSpec;

    fn name(&self) -> &str;
}

pub struct AttentionScorer {
    branch: SelfGuidedAttention,
    fusion: BranchFusion,
    name: String,
}

impl AttentionScorer {
    pub fn new(weights: Arc<AttentionWeights>, fusion: BranchFusion) -> Self {
        let name = format!(
            "self-guided-attention(C={}, k={})",
            weights.spec.in_channels, weights.spec.expand_k
        );
        Self {
            branch: SelfGuidedAttention::new(weights),
            fusion,
            name,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P, spec: ArchSpec, fusion: BranchFusion) -> Result<Self> {
        let weights = AttentionWeights::from_file(path, spec)?;
        Ok(Self::new(Arc::new(weights), fusion))
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn fusion(&self) -> BranchFusion {
        self.fusion
    }

    /// Score a single-item embedding
    pub fn score_one(&self, embedding: ArrayView5<f32>) -> Result<ScoreOutput> {
        if embedding.shape().first() != Some(&1) {
            return Err(ScoreError::shape_mismatch(
                "single-item batch",
                &[1],
                &embedding.shape()[..embedding.ndim().min(1)],
            ));
        }
        let mut outputs = self.score(embedding)?;
        outputs
            .pop()
            .ok_or_else(|| ScoreError::shape_mismatch("scorer output", &[1], &[0]))
    }
}

impl Scorer for AttentionScorer {
    fn score(&self, embedding: ArrayView5<f32>) -> Result<Vec<ScoreOutput>> {
        let weights = self.branch.weights();
        let out = self.branch.forward(embedding)?;

        let pooled = global_avg_pool3d(out.modulated().view());
        let logits = linear(
            pooled.view(),
            weights.classifier_weight.view(),
            weights.classifier_bias.view(),
        )?;

        let batch = logits.nrows();
        let mut results = Vec::with_capacity(batch);
        for b in 0..batch {
            let p_main = sigmoid(logits[[b, 0]]);
            let heads = softmax(&[out.head_scores[[b, 0]], out.head_scores[[b, 1]]]);
            let head_weights = [heads[0], heads[1]];

            let probability = match self.fusion {
                BranchFusion::Main => p_main,
                BranchFusion::Mean => (p_main + head_weights[1]) / 2.0,
            };

            results.push(ScoreOutput {
                probability: probability.clamp(0.0, 1.0),
                head_weights,
                attention_map: out.attention_map.slice(s![b, 0, 0, .., ..]).to_owned(),
            });
        }

        log::trace!("{} scored batch of {}", self.name, batch);
        Ok(results)
    }

    fn spec(&self) -> &ArchSpec {
        self.branch.spec()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
