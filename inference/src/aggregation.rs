//! Score aggregation and the alert decision rule

use crate::types::SegmentScores;
use serde::{Deserialize, Serialize};

/// How the crop-variant scores of one segment are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropReduction {
    #[default]
    Mean,
    Max,
}

impl CropReduction {
    /// Reduce crop scores; the result does not depend on their order
    pub fn reduce(&self, scores: &[f32]) -> f32 {
        if scores.is_empty() {
            return 0.0;
        }
        match self {
            Self::Max => scores.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            Self::Mean => {
                let mut sorted = scores.to_vec();
                sorted.sort_by(f32::total_cmp);
                sorted.iter().sum::<f32>() / sorted.len() as f32
            }
        }
    }
}

/// How segment scores become one video-level score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum TemporalPolicy {
    /// Highest segment score
    #[default]
    MaxSegment,
    /// Highest mean over any `window` consecutive segments
    MovingAverage { window: usize },
}

impl TemporalPolicy {
    pub fn aggregate(&self, segment_scores: &[f32]) -> f32 {
        if segment_scores.is_empty() {
            return 0.0;
        }
        match *self {
            Self::MaxSegment => segment_scores
                .iter()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max),
            Self::MovingAverage { window } => {
                let window = window.max(1);
                if segment_scores.len() < window {
                    return segment_scores.iter().sum::<f32>() / segment_scores.len() as f32;
                }
                segment_scores
                    .windows(window)
                    .map(|w| w.iter().sum::<f32>() / window as f32)
                    .fold(f32::NEG_INFINITY, f32::max)
            }
        }
    }
}

/// Video-level verdict; created once, never mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub alert: bool,
    pub video_score: f32,
    /// Reduced score per segment, in segment order
    pub segment_scores: Vec<f32>,
}

/// Threshold rule over aggregated scores, no state across videos
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionPolicy {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default)]
    pub crop_reduction: CropReduction,
    #[serde(default)]
    pub temporal: TemporalPolicy,
}

fn default_threshold() -> f32 {
    0.5
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            crop_reduction: CropReduction::default(),
            temporal: TemporalPolicy::default(),
        }
    }
}

impl DecisionPolicy {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Reduce crops per segment, aggregate over time, compare to threshold.
    ///
    /// Segments are ordered by index first, so the input order does not
    /// matter.
    pub fn decide(&self, scores: &[SegmentScores]) -> Decision {
        let mut ordered: Vec<&SegmentScores> = scores.iter().collect();
        ordered.sort_by_key(|s| s.segment);

        let segment_scores: Vec<f32> = ordered
            .iter()
            .map(|s| self.crop_reduction.reduce(&s.crop_scores))
            .collect();

        let video_score = self.temporal.aggregate(&segment_scores);
        let alert = !segment_scores.is_empty() && video_score >= self.threshold;

        Decision {
            alert,
            video_score,
            segment_scores,
        }
    }
}
