//! Feature extractor interface for video backbones
//!
//! The pipeline works with any backbone (ONNX graph, projection stand-in,
//! test doubles) as long as it implements this interface. Extractors are pure:
//! no state changes between calls, so crops may be embedded in any order.

use crate::error::{AnomalyError, Result};
use ndarray::{s, Array1, Array2, Array5, ArrayView5};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sgattn::ArchSpec;

/// Backbone feature map for one clip crop, `[1, C, T, H, W]`
#[derive(Debug, Clone)]
pub struct SegmentEmbedding {
    features: Array5<f32>,
}

impl SegmentEmbedding {
    pub fn new(features: Array5<f32>) -> Result<Self> {
        if features.shape()[0] != 1 {
            return Err(AnomalyError::invalid_dimensions(
                &[1],
                &[features.shape()[0]],
            ));
        }
        Ok(Self { features })
    }

    pub fn view(&self) -> ArrayView5<'_, f32> {
        self.features.view()
    }

    pub fn shape(&self) -> &[usize] {
        self.features.shape()
    }

    pub fn into_inner(self) -> Array5<f32> {
        self.features
    }
}

/// Common interface for clip feature extractors
pub trait FeatureExtractor: Send + Sync {
    /// Embed a normalized `[1, 3, L, S, S]` clip tensor
    fn embed(&self, clip: ArrayView5<f32>) -> Result<SegmentEmbedding>;

    /// Get the extractor name (for logging/debugging)
    fn name(&self) -> &str;
}

/// Weight-free stand-in backbone.
///
/// Average-pools the clip onto the `[T, H, W]` feature grid of an
/// [`ArchSpec`] and lifts the three colour channels to `C` channels with a
/// fixed seeded projection followed by ReLU.
pub struct ProjectionExtractor {
    spec: ArchSpec,
    projection: Array2<f32>,
    bias: Array1<f32>,
}

impl ProjectionExtractor {
    pub fn new(spec: ArchSpec, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let projection =
            Array2::from_shape_simple_fn((spec.in_channels, 3), || rng.gen_range(-1.0..1.0));
        let bias = Array1::from_shape_simple_fn(spec.in_channels, || rng.gen_range(-0.1..0.1));
        Self {
            spec,
            projection,
            bias,
        }
    }

    pub fn spec(&self) -> &ArchSpec {
        &self.spec
    }

    /// Adaptive average pool along one axis: bin `i` covers
    /// `[floor(i*n/out), ceil((i+1)*n/out))`
    fn bin(i: usize, n: usize, out: usize) -> (usize, usize) {
        let start = i * n / out;
        let end = ((i + 1) * n).div_ceil(out);
        (start, end.max(start + 1).min(n))
    }
}

impl FeatureExtractor for ProjectionExtractor {
    fn embed(&self, clip: ArrayView5<f32>) -> Result<SegmentEmbedding> {
        let (batch, channels, length, height, width) = clip.dim();
        if batch != 1 || channels != 3 || length == 0 || height == 0 || width == 0 {
            return Err(AnomalyError::invalid_dimensions(
                &[1, 3, length.max(1), height.max(1), width.max(1)],
                clip.shape(),
            ));
        }

        let (t_out, hw_out) = (self.spec.feature_t, self.spec.feature_hw);
        let mut pooled = Array5::<f32>::zeros((1, 3, t_out, hw_out, hw_out));
        for t in 0..t_out {
            let (t0, t1) = Self::bin(t, length, t_out);
            for y in 0..hw_out {
                let (y0, y1) = Self::bin(y, height, hw_out);
                for x in 0..hw_out {
                    let (x0, x1) = Self::bin(x, width, hw_out);
                    for c in 0..3 {
                        let window = clip.slice(s![0, c, t0..t1, y0..y1, x0..x1]);
                        pooled[[0, c, t, y, x]] = window.mean().unwrap_or(0.0);
                    }
                }
            }
        }

        let mut features = Array5::<f32>::zeros((1, self.spec.in_channels, t_out, hw_out, hw_out));
        for ((_, oc, t, y, x), value) in features.indexed_iter_mut() {
            let mut acc = self.bias[oc];
            for c in 0..3 {
                acc += self.projection[[oc, c]] * pooled[[0, c, t, y, x]];
            }
            *value = acc.max(0.0);
        }

        SegmentEmbedding::new(features)
    }

    fn name(&self) -> &str {
        "projection"
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxFeatureExtractor;

#[cfg(feature = "onnx")]
mod onnx {
    use super::{FeatureExtractor, SegmentEmbedding};
    use crate::error::{AnomalyError, Result};
    use log::info;
    use ndarray::{ArrayView5, Ix5};
    use ort::{
        session::{builder::GraphOptimizationLevel, Session},
        value::TensorRef,
    };
    use std::path::Path;
    use std::sync::Mutex;

    /// Backbone exported to ONNX, e.g. an I3D or C3D trunk cut at the
    /// attention input
    pub struct OnnxFeatureExtractor {
        session: Mutex<Session>,
        name: String,
    }

    impl OnnxFeatureExtractor {
        pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
            let model_path = model_path.as_ref();
            info!("Loading backbone graph {}", model_path.display());

            let session = Session::builder()
                .map_err(|e| AnomalyError::extraction(e.to_string()))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| AnomalyError::extraction(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e| AnomalyError::extraction(format!("Failed to load model: {}", e)))?;

            let name = model_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "onnx".to_string());

            Ok(Self {
                session: Mutex::new(session),
                name,
            })
        }
    }

    impl FeatureExtractor for OnnxFeatureExtractor {
        fn embed(&self, clip: ArrayView5<f32>) -> Result<SegmentEmbedding> {
            let input = clip.as_standard_layout().into_owned().into_dyn();
            let tensor_ref = TensorRef::from_array_view(&input)
                .map_err(|e| AnomalyError::extraction(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| AnomalyError::extraction("backbone session lock poisoned"))?;

            let outputs = session
                .run(ort::inputs![tensor_ref])
                .map_err(|e| AnomalyError::extraction(e.to_string()))?;

            let features = outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| AnomalyError::extraction(e.to_string()))?
                .into_owned()
                .into_dimensionality::<Ix5>()
                .map_err(|e| AnomalyError::extraction(format!("backbone output is not 5D: {}", e)))?;

            SegmentEmbedding::new(features)
        }

        fn name(&self) -> &str {
            &self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ArchSpec {
        ArchSpec {
            in_channels: 6,
            feature_t: 4,
            feature_hw: 3,
            temporal_padding: 1,
            expand_k: 2,
        }
    }

    fn clip(value: f32) -> Array5<f32> {
        Array5::from_shape_fn((1, 3, 8, 12, 12), |(_, c, t, y, x)| {
            value + c as f32 * 0.1 + t as f32 * 0.01 + (x + y) as f32 * 0.001
        })
    }

    #[test]
    fn test_projection_output_geometry() {
        let extractor = ProjectionExtractor::new(spec(), 0);
        let embedding = extractor.embed(clip(0.5).view()).unwrap();
        assert_eq!(embedding.shape(), &[1, 6, 4, 3, 3]);
        assert!(embedding.view().iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_projection_is_pure() {
        let extractor = ProjectionExtractor::new(spec(), 5);
        let x = clip(0.2);
        let first = extractor.embed(x.view()).unwrap().into_inner();
        let _ = extractor.embed(clip(-3.0).view()).unwrap();
        let again = extractor.embed(x.view()).unwrap().into_inner();
        assert_eq!(first, again);
    }

    #[test]
    fn test_adaptive_bins_cover_input() {
        assert_eq!(ProjectionExtractor::bin(0, 16, 4), (0, 4));
        assert_eq!(ProjectionExtractor::bin(3, 16, 4), (12, 16));
        assert_eq!(ProjectionExtractor::bin(1, 7, 3), (2, 5));
        // Fewer inputs than bins still yields a non-empty window
        assert_eq!(ProjectionExtractor::bin(2, 2, 4), (1, 2));
    }

    #[test]
    fn test_rejects_non_rgb_clip() {
        let extractor = ProjectionExtractor::new(spec(), 0);
        let gray = Array5::<f32>::zeros((1, 1, 8, 12, 12));
        assert!(matches!(
            extractor.embed(gray.view()),
            Err(AnomalyError::InvalidDimensions { .. })
        ));
    }
}
