/// Analysis pipeline with preprocess, extract, score and aggregate stages
/// Crops run through the extractor and scorer in parallel and are put back in
/// (segment, crop) order before the decision is taken
use crate::aggregation::{Decision, DecisionPolicy};
use crate::config::AnalyzerConfig;
use crate::error::{AnomalyError, Result};
use crate::evidence::{EvidenceOutcome, EvidencePipeline};
use crate::extractor::{FeatureExtractor, SegmentEmbedding};
use crate::preprocessing::{to_rgb_image, ClipPreprocessor, PreparedCrop};
use crate::types::{AlertMetadata, CropVariant, ImageData, SegmentScores, SourceVideo};
use crate::video::{segment_clips, DecodeHint, VideoDecoder};
use image::RgbImage;
use rayon::prelude::*;
use serde::Serialize;
use sgattn::Scorer;
use std::sync::Arc;
use std::time::Instant;

/// Stage result that flows through the pipeline
#[derive(Clone)]
pub struct StageResult<T> {
    pub data: T,
    pub stage_name: String,
    pub duration_ms: f32,
}

/// Timing information for each pipeline stage
#[derive(Clone, Debug, Default, Serialize)]
pub struct PipelineTiming {
    pub decode_ms: f32,
    pub preprocess_ms: f32,
    pub extract_ms: f32,
    pub score_ms: f32,
    pub aggregate_ms: f32,
    pub total_ms: f32,
}

/// Score of one crop of one segment
#[derive(Clone, Debug, Serialize)]
pub struct CropScore {
    pub segment: usize,
    pub variant: CropVariant,
    pub probability: f32,
    /// Softmax weights of the (normal, anomalous) head groups
    pub head_weights: [f32; 2],
}

/// Outcome of analyzing one video
#[derive(Clone, Debug, Serialize)]
pub struct AnalysisReport {
    pub decision: Decision,
    /// Crop scores grouped per segment, in segment then crop order
    pub segment_scores: Vec<SegmentScores>,
    pub frames: usize,
    pub timing: PipelineTiming,
}

/// Pre-processing stage: frames to clips to normalized crop tensors
pub struct PreprocessStage {
    clip_length: usize,
    preprocessor: ClipPreprocessor,
}

impl PreprocessStage {
    pub fn new(clip_length: usize, preprocessor: ClipPreprocessor) -> Self {
        Self {
            clip_length,
            preprocessor,
        }
    }

    pub fn process(&self, frames: Vec<RgbImage>) -> Result<StageResult<Vec<PreparedCrop>>> {
        let start = Instant::now();
        let clips = segment_clips(frames, self.clip_length)?;

        let per_clip: Vec<Vec<PreparedCrop>> = clips
            .par_iter()
            .map(|clip| self.preprocessor.prepare(clip))
            .collect::<Result<_>>()?;
        let crops: Vec<PreparedCrop> = per_clip.into_iter().flatten().collect();

        log::debug!(
            "Prepared {} crops from {} clips",
            crops.len(),
            clips.len()
        );

        Ok(StageResult {
            data: crops,
            stage_name: "preprocess".to_string(),
            duration_ms: start.elapsed().as_secs_f32() * 1000.0,
        })
    }
}

/// Backbone stage: one embedding per crop
pub struct ExtractStage {
    extractor: Arc<dyn FeatureExtractor>,
}

impl ExtractStage {
    pub fn new(extractor: Arc<dyn FeatureExtractor>) -> Self {
        Self { extractor }
    }

    pub fn process(
        &self,
        crops: Vec<PreparedCrop>,
    ) -> Result<StageResult<Vec<(usize, CropVariant, SegmentEmbedding)>>> {
        let start = Instant::now();
        let embeddings = crops
            .into_par_iter()
            .map(|crop| -> Result<(usize, CropVariant, SegmentEmbedding)> {
                let embedding = self.extractor.embed(crop.tensor.view())?;
                Ok((crop.segment, crop.variant, embedding))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(StageResult {
            data: embeddings,
            stage_name: format!("extract[{}]", self.extractor.name()),
            duration_ms: start.elapsed().as_secs_f32() * 1000.0,
        })
    }
}

/// Attention scorer stage
pub struct ScoreStage {
    scorer: Arc<dyn Scorer>,
}

impl ScoreStage {
    pub fn new(scorer: Arc<dyn Scorer>) -> Self {
        Self { scorer }
    }

    pub fn process(
        &self,
        embeddings: Vec<(usize, CropVariant, SegmentEmbedding)>,
    ) -> Result<StageResult<Vec<CropScore>>> {
        let start = Instant::now();
        let mut scores = embeddings
            .into_par_iter()
            .map(|(segment, variant, embedding)| -> Result<CropScore> {
                self.scorer.spec().validate_input(embedding.shape())?;
                let output = self
                    .scorer
                    .score(embedding.view())?
                    .into_iter()
                    .next()
                    .ok_or_else(|| AnomalyError::other("scorer returned no output"))?;
                Ok(CropScore {
                    segment,
                    variant,
                    probability: output.probability,
                    head_weights: output.head_weights,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        scores.sort_by_key(|s| (s.segment, s.variant.index()));

        Ok(StageResult {
            data: scores,
            stage_name: format!("score[{}]", self.scorer.name()),
            duration_ms: start.elapsed().as_secs_f32() * 1000.0,
        })
    }
}

/// Aggregation stage: crop scores to a video-level decision
pub struct AggregateStage {
    policy: DecisionPolicy,
}

impl AggregateStage {
    pub fn new(policy: DecisionPolicy) -> Self {
        Self { policy }
    }

    /// Expects scores sorted by (segment, crop)
    pub fn process(&self, scores: &[CropScore]) -> StageResult<(Decision, Vec<SegmentScores>)> {
        let start = Instant::now();

        let mut segments: Vec<SegmentScores> = Vec::new();
        for score in scores {
            match segments.last_mut() {
                Some(last) if last.segment == score.segment => last.crop_scores.push(score.probability),
                _ => segments.push(SegmentScores::single(score.segment, score.probability)),
            }
        }

        let decision = self.policy.decide(&segments);

        StageResult {
            data: (decision, segments),
            stage_name: "aggregate".to_string(),
            duration_ms: start.elapsed().as_secs_f32() * 1000.0,
        }
    }
}

/// Complete analysis pipeline; holds no per-video state, so one instance can
/// serve concurrent callers
pub struct AnalysisPipeline {
    preprocess: PreprocessStage,
    extract: ExtractStage,
    score: ScoreStage,
    aggregate: AggregateStage,
}

impl AnalysisPipeline {
    /// Validates the configuration and scorer geometry before any video is seen
    pub fn new(
        config: &AnalyzerConfig,
        extractor: Arc<dyn FeatureExtractor>,
        scorer: Arc<dyn Scorer>,
    ) -> Result<Self> {
        config.validate()?;
        let spec = *scorer.spec();
        spec.validate()?;

        let variant_spec = config.model.variant.spec();
        if spec != variant_spec {
            log::warn!(
                "Scorer geometry {:?} differs from {} defaults {:?}",
                spec,
                config.model.variant,
                variant_spec
            );
        }

        log::info!(
            "Analysis pipeline: variant {}, clip length {}, crop {}, {} crop(s) per clip, extractor {}, scorer {}",
            config.model.variant,
            config.clip_length(),
            config.crop_size(),
            config.preprocessor().variants().len(),
            extractor.name(),
            scorer.name()
        );

        Ok(Self {
            preprocess: PreprocessStage::new(config.clip_length(), config.preprocessor()),
            extract: ExtractStage::new(extractor),
            score: ScoreStage::new(scorer),
            aggregate: AggregateStage::new(config.decision),
        })
    }

    /// Analyze decoded RGB frames
    pub fn analyze_frames(&self, frames: Vec<RgbImage>) -> Result<AnalysisReport> {
        let start_total = Instant::now();
        let frame_count = frames.len();

        let preprocess_result = self.preprocess.process(frames)?;
        let preprocess_time = preprocess_result.duration_ms;

        let extract_result = self.extract.process(preprocess_result.data)?;
        let extract_time = extract_result.duration_ms;

        let score_result = self.score.process(extract_result.data)?;
        let score_time = score_result.duration_ms;

        let aggregate_result = self.aggregate.process(&score_result.data);
        let aggregate_time = aggregate_result.duration_ms;
        let (decision, segment_scores) = aggregate_result.data;

        let total_time = start_total.elapsed().as_secs_f32() * 1000.0;

        log::debug!(
            "Pipeline timing - Preprocess: {:.1}ms, {}: {:.1}ms, {}: {:.1}ms, Aggregate: {:.1}ms, Total: {:.1}ms",
            preprocess_time,
            extract_result.stage_name,
            extract_time,
            score_result.stage_name,
            score_time,
            aggregate_time,
            total_time
        );
        log::info!(
            "Decision: alert={} score={:.4} over {} segments ({} frames)",
            decision.alert,
            decision.video_score,
            segment_scores.len(),
            frame_count
        );

        Ok(AnalysisReport {
            decision,
            segment_scores,
            frames: frame_count,
            timing: PipelineTiming {
                decode_ms: 0.0,
                preprocess_ms: preprocess_time,
                extract_ms: extract_time,
                score_ms: score_time,
                aggregate_ms: aggregate_time,
                total_ms: total_time,
            },
        })
    }

    /// Analyze raw frames in any supported pixel format.
    ///
    /// Every frame is converted before any scoring, so one malformed buffer
    /// fails the whole video with `UnsupportedFormat`.
    pub fn analyze_raw_frames(&self, frames: Vec<ImageData>) -> Result<AnalysisReport> {
        let start = Instant::now();
        let rgb = frames
            .par_iter()
            .map(to_rgb_image)
            .collect::<Result<Vec<RgbImage>>>()?;
        let convert_time = start.elapsed().as_secs_f32() * 1000.0;

        let mut report = self.analyze_frames(rgb)?;
        report.timing.decode_ms = convert_time;
        report.timing.total_ms += convert_time;
        Ok(report)
    }

    /// Decode then analyze
    pub fn analyze_bytes(
        &self,
        bytes: &[u8],
        hint: &DecodeHint,
        decoder: &dyn VideoDecoder,
    ) -> Result<AnalysisReport> {
        let start = Instant::now();
        let frames = decoder.decode(bytes, hint)?;
        let decode_time = start.elapsed().as_secs_f32() * 1000.0;

        let mut report = self.analyze_frames(frames)?;
        report.timing.decode_ms = decode_time;
        report.timing.total_ms += decode_time;
        Ok(report)
    }

    /// Analyze `source` and hand the decision to the evidence pipeline.
    ///
    /// Runs to completion on the calling thread; a failed analysis leaves the
    /// source file untouched.
    pub fn analyze_and_record(
        &self,
        hint: &DecodeHint,
        decoder: &dyn VideoDecoder,
        source: SourceVideo,
        metadata: &AlertMetadata,
        evidence: &EvidencePipeline,
    ) -> Result<(AnalysisReport, EvidenceOutcome)> {
        let report = self.analyze_bytes(&source.bytes, hint, decoder)?;
        let outcome = evidence.process(&report.decision, source, metadata)?;
        Ok((report, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ProjectionExtractor;
    use crate::store::MemoryAlertStore;
    use crate::types::ImageFormat;
    use image::Rgb;
    use sgattn::{ArchSpec, AttentionScorer, AttentionWeights, BranchFusion};

    fn small_spec() -> ArchSpec {
        ArchSpec {
            in_channels: 4,
            feature_t: 4,
            feature_hw: 4,
            temporal_padding: 1,
            expand_k: 2,
        }
    }

    fn small_config(oversample: bool) -> AnalyzerConfig {
        let mut config = AnalyzerConfig::default();
        config.preprocess.clip_length = Some(4);
        config.preprocess.crop_size = Some(16);
        config.preprocess.resize = Some(20);
        config.preprocess.oversample = oversample;
        config
    }

    fn small_pipeline(oversample: bool) -> AnalysisPipeline {
        let spec = small_spec();
        let extractor = Arc::new(ProjectionExtractor::new(spec, 1));
        let weights = Arc::new(AttentionWeights::seeded(spec, 2).unwrap());
        let scorer = Arc::new(AttentionScorer::new(weights, BranchFusion::Main));
        AnalysisPipeline::new(&small_config(oversample), extractor, scorer).unwrap()
    }

    fn frames(count: usize, width: u32, height: u32) -> Vec<RgbImage> {
        (0..count)
            .map(|i| RgbImage::from_fn(width, height, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, (i * 20) as u8])))
            .collect()
    }

    #[test]
    fn test_segments_and_crops_are_ordered() {
        let report = small_pipeline(true).analyze_frames(frames(10, 24, 20)).unwrap();

        assert_eq!(report.frames, 10);
        assert_eq!(report.segment_scores.len(), 3);
        for (i, segment) in report.segment_scores.iter().enumerate() {
            assert_eq!(segment.segment, i);
            assert_eq!(segment.crop_scores.len(), CropVariant::COUNT);
            assert!(segment.crop_scores.iter().all(|p| (0.0..=1.0).contains(p)));
        }
        assert_eq!(report.decision.segment_scores.len(), 3);
    }

    #[test]
    fn test_raw_frames_match_rgb_frames() {
        let pipeline = small_pipeline(false);
        let rgb = frames(8, 20, 20);
        let bgr: Vec<ImageData> = rgb
            .iter()
            .map(|frame| {
                let data = frame.pixels().flat_map(|p| [p[2], p[1], p[0]]).collect();
                ImageData::new(data, 20, 20, ImageFormat::BGR)
            })
            .collect();

        let expected = pipeline.analyze_frames(rgb).unwrap();
        let report = pipeline.analyze_raw_frames(bgr).unwrap();
        assert_eq!(report.frames, 8);
        assert_eq!(report.segment_scores, expected.segment_scores);
    }

    #[test]
    fn test_short_raw_buffer_is_unsupported() {
        let mut raw: Vec<ImageData> = frames(4, 20, 20).into_iter().map(ImageData::from_rgb_image).collect();
        raw[2].data.truncate(20 * 20 * 3 - 1);

        let err = small_pipeline(false).analyze_raw_frames(raw).unwrap_err();
        assert!(matches!(err, AnomalyError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let pipeline = small_pipeline(false);
        let first = pipeline.analyze_frames(frames(8, 20, 20)).unwrap();
        let second = pipeline.analyze_frames(frames(8, 20, 20)).unwrap();
        assert_eq!(first.decision, second.decision);
        assert_eq!(first.segment_scores, second.segment_scores);
    }

    #[test]
    fn test_oversized_crop_fails_before_scoring() {
        let err = small_pipeline(false).analyze_frames(frames(4, 12, 12)).unwrap_err();
        assert!(matches!(err, AnomalyError::InvalidDimensions { .. }));
    }

    #[test]
    fn test_extractor_scorer_mismatch_is_shape_error() {
        let spec = small_spec();
        let other = ArchSpec {
            in_channels: 6,
            ..spec
        };
        let extractor = Arc::new(ProjectionExtractor::new(other, 1));
        let scorer = Arc::new(AttentionScorer::new(
            Arc::new(AttentionWeights::seeded(spec, 2).unwrap()),
            BranchFusion::Main,
        ));
        let pipeline = AnalysisPipeline::new(&small_config(false), extractor, scorer).unwrap();
        let err = pipeline.analyze_frames(frames(4, 20, 20)).unwrap_err();
        assert!(matches!(err, AnomalyError::ShapeMismatch(_)));
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let spec = small_spec();
        let mut config = small_config(false);
        config.decision.threshold = 1.5;
        let result = AnalysisPipeline::new(
            &config,
            Arc::new(ProjectionExtractor::new(spec, 1)),
            Arc::new(AttentionScorer::new(
                Arc::new(AttentionWeights::seeded(spec, 2).unwrap()),
                BranchFusion::Main,
            )),
        );
        assert!(matches!(result, Err(AnomalyError::Config(_))));
    }

    #[test]
    fn test_analyze_and_record_discards_undecodable_input() {
        let pipeline = small_pipeline(false);
        let store = Arc::new(MemoryAlertStore::new());
        struct NoAnchor;
        impl crate::anchor::AnchorService for NoAnchor {
            fn anchor(&self, _: &str, _: &[u8]) -> Result<crate::types::ContentIdentifier> {
                Err(AnomalyError::anchor_unavailable("offline"))
            }
            fn gateway_url(&self, cid: &crate::types::ContentIdentifier) -> String {
                cid.to_string()
            }
        }
        let evidence = EvidencePipeline::new(Arc::new(NoAnchor), store.clone());
        let result = pipeline.analyze_and_record(
            &DecodeHint::Gif,
            &crate::video::GifDecoder,
            SourceVideo::in_memory("broken.gif", b"not a gif".to_vec()),
            &AlertMetadata::default(),
            &evidence,
        );
        assert!(matches!(result, Err(AnomalyError::Decode(_))));
        assert!(store.is_empty());
    }
}
