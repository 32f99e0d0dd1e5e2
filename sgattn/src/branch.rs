//! Self-guided attention branch
//!
//! Projects the backbone feature map into `2k` attention heads, derives a
//! two-way head score from them and collapses the heads into a single
//! spatial attention map that re-weights the features.

use crate::error::Result;
use crate::ops::{conv3d, global_avg_pool3d, relu_inplace, sigmoid, Conv3dGeometry};
use crate::variant::ArchSpec;
use crate::weights::AttentionWeights;
use ndarray::{Array2, Array5, ArrayView5, Axis};
use std::sync::Arc;

/// Intermediate tensors of one forward pass
#[derive(Debug, Clone)]
pub struct BranchOutput {
    /// Rectified features after the strided convolution `[B, C, T', H', W']`
    pub features: Array5<f32>,
    /// Head scores `[B, 2]`, (normal, anomalous) before softmax
    pub head_scores: Array2<f32>,
    /// Sigmoid attention `[B, 1, 1, H', W']`
    pub attention_map: Array5<f32>,
}

impl BranchOutput {
    /// Residual attention: `features * attention + features`
    pub fn modulated(&self) -> Array5<f32> {
        &self.features * &self.attention_map + &self.features
    }
}

pub struct SelfGuidedAttention {
    weights: Arc<AttentionWeights>,
    entry: Conv3dGeometry,
}

impl SelfGuidedAttention {
    pub fn new(weights: Arc<AttentionWeights>) -> Self {
        let pad_t = weights.spec.temporal_padding;
        Self {
            weights,
            entry: Conv3dGeometry::new([1, 2, 2], [pad_t, 1, 1]),
        }
    }

    pub fn spec(&self) -> &ArchSpec {
        &self.weights.spec
    }

    pub fn weights(&self) -> &Arc<AttentionWeights> {
        &self.weights
    }

    pub fn forward(&self, input: ArrayView5<f32>) -> Result<BranchOutput> {
        let w = &self.weights;
        w.spec.validate_input(input.shape())?;

        let mut features = conv3d(
            input,
            w.conv_atten_weight.view(),
            w.conv_atten_bias.view(),
            self.entry,
        )?;
        relu_inplace(&mut features);

        let mut heads = conv3d(
            features.view(),
            w.att1_weight.view(),
            w.att1_bias.view(),
            Conv3dGeometry::POINTWISE,
        )?;
        relu_inplace(&mut heads);

        let head_scores = self.head_scores(&heads)?;

        let mut attention_map = conv3d(
            heads.view(),
            w.att3_weight.view(),
            w.att3_bias.view(),
            Conv3dGeometry::POINTWISE,
        )?;
        attention_map.mapv_inplace(sigmoid);

        Ok(BranchOutput {
            features,
            head_scores,
            attention_map,
        })
    }

    /// GAP over the mixed heads, viewed as `[B, 2, k]`, averaged over k
    fn head_scores(&self, heads: &Array5<f32>) -> Result<Array2<f32>> {
        let w = &self.weights;
        let mixed = conv3d(
            heads.view(),
            w.att2_weight.view(),
            w.att2_bias.view(),
            Conv3dGeometry::POINTWISE,
        )?;
        let pooled = global_avg_pool3d(mixed.view());

        let k = w.spec.expand_k;
        let batch = pooled.len_of(Axis(0));
        let mut scores = Array2::<f32>::zeros((batch, 2));
        for b in 0..batch {
            for group in 0..2 {
                let mut sum = 0.0f32;
                for j in 0..k {
                    sum += pooled[[b, group * k + j]];
                }
                scores[[b, group]] = sum / k as f32;
            }
        }
        Ok(scores)
    }
}
