//! Weight blob loading for the attention head
//!
//! Weights are stored as safetensors (f32, little-endian) using the parameter
//! names of the trained module, e.g. `Conv_Atten.0.weight`.

use crate::error::{Result, ScoreError};
use crate::variant::ArchSpec;
use ndarray::{Array, Array1, Array2, Array5, Dimension, IntoDimension};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::path::Path;

pub const CONV_ATTEN_WEIGHT: &str = "Conv_Atten.0.weight";
pub const CONV_ATTEN_BIAS: &str = "Conv_Atten.0.bias";
pub const ATT1_WEIGHT: &str = "Att_1.0.weight";
pub const ATT1_BIAS: &str = "Att_1.0.bias";
pub const ATT2_WEIGHT: &str = "Att_2.weight";
pub const ATT2_BIAS: &str = "Att_2.bias";
pub const ATT3_WEIGHT: &str = "Att_3.0.weight";
pub const ATT3_BIAS: &str = "Att_3.0.bias";
pub const CLASSIFIER_WEIGHT: &str = "classifier.weight";
pub const CLASSIFIER_BIAS: &str = "classifier.bias";

/// Learned parameters of one attention head, immutable after load
#[derive(Debug, Clone)]
pub struct AttentionWeights {
    pub spec: ArchSpec,
    pub conv_atten_weight: Array5<f32>,
    pub conv_atten_bias: Array1<f32>,
    pub att1_weight: Array5<f32>,
    pub att1_bias: Array1<f32>,
    pub att2_weight: Array5<f32>,
    pub att2_bias: Array1<f32>,
    pub att3_weight: Array5<f32>,
    pub att3_bias: Array1<f32>,
    pub classifier_weight: Array2<f32>,
    pub classifier_bias: Array1<f32>,
}

impl AttentionWeights {
    /// Load from a safetensors file on disk
    pub fn from_file<P: AsRef<Path>>(path: P, spec: ArchSpec) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let weights = Self::from_safetensors_bytes(&bytes, spec)?;
        log::info!(
            "Loaded attention weights from {} ({} tensors, C={}, heads={})",
            path.display(),
            Self::tensor_names().len(),
            spec.in_channels,
            spec.num_heads()
        );
        Ok(weights)
    }

    /// Parse an in-memory safetensors blob and check every shape against `spec`
    pub fn from_safetensors_bytes(bytes: &[u8], spec: ArchSpec) -> Result<Self> {
        spec.validate()?;

        let tensors = SafeTensors::deserialize(bytes)
            .map_err(|e| ScoreError::weight_format(format!("failed to parse safetensors: {}", e)))?;

        let shapes = Shapes::for_spec(&spec);

        Ok(Self {
            spec,
            conv_atten_weight: read_tensor(&tensors, CONV_ATTEN_WEIGHT, shapes.conv_atten)?,
            conv_atten_bias: read_tensor(&tensors, CONV_ATTEN_BIAS, [spec.in_channels])?,
            att1_weight: read_tensor(&tensors, ATT1_WEIGHT, shapes.att1)?,
            att1_bias: read_tensor(&tensors, ATT1_BIAS, [spec.num_heads()])?,
            att2_weight: read_tensor(&tensors, ATT2_WEIGHT, shapes.att2)?,
            att2_bias: read_tensor(&tensors, ATT2_BIAS, [spec.num_heads()])?,
            att3_weight: read_tensor(&tensors, ATT3_WEIGHT, shapes.att3)?,
            att3_bias: read_tensor(&tensors, ATT3_BIAS, [1usize])?,
            classifier_weight: read_tensor(
                &tensors,
                CLASSIFIER_WEIGHT,
                [1, spec.in_channels],
            )?,
            classifier_bias: read_tensor(&tensors, CLASSIFIER_BIAS, [1usize])?,
        })
    }

    /// Deterministic synthetic weights, uniform in ±1/sqrt(fan_in) per layer
    pub fn seeded(spec: ArchSpec, seed: u64) -> Result<Self> {
        spec.validate()?;

        let mut rng = StdRng::seed_from_u64(seed);
        let shapes = Shapes::for_spec(&spec);
        let heads = spec.num_heads();
        let c = spec.in_channels;

        let conv_fan_in = c * 27;
        let att3_fan_in = heads * spec.attention_t();

        Ok(Self {
            spec,
            conv_atten_weight: uniform(&mut rng, shapes.conv_atten, conv_fan_in),
            conv_atten_bias: uniform(&mut rng, [c], conv_fan_in),
            att1_weight: uniform(&mut rng, shapes.att1, c),
            att1_bias: uniform(&mut rng, [heads], c),
            att2_weight: uniform(&mut rng, shapes.att2, heads),
            att2_bias: uniform(&mut rng, [heads], heads),
            att3_weight: uniform(&mut rng, shapes.att3, att3_fan_in),
            att3_bias: uniform(&mut rng, [1usize], att3_fan_in),
            classifier_weight: uniform(&mut rng, [1, c], c),
            classifier_bias: uniform(&mut rng, [1usize], c),
        })
    }

    /// Serialize back to a safetensors blob
    pub fn to_safetensors_bytes(&self) -> Result<Vec<u8>> {
        let entries: Vec<(&str, Vec<usize>, Vec<u8>)> = vec![
            tensor_entry(CONV_ATTEN_WEIGHT, &self.conv_atten_weight),
            tensor_entry(CONV_ATTEN_BIAS, &self.conv_atten_bias),
            tensor_entry(ATT1_WEIGHT, &self.att1_weight),
            tensor_entry(ATT1_BIAS, &self.att1_bias),
            tensor_entry(ATT2_WEIGHT, &self.att2_weight),
            tensor_entry(ATT2_BIAS, &self.att2_bias),
            tensor_entry(ATT3_WEIGHT, &self.att3_weight),
            tensor_entry(ATT3_BIAS, &self.att3_bias),
            tensor_entry(CLASSIFIER_WEIGHT, &self.classifier_weight),
            tensor_entry(CLASSIFIER_BIAS, &self.classifier_bias),
        ];

        let mut views = Vec::with_capacity(entries.len());
        for (name, shape, data) in &entries {
            let view = TensorView::new(Dtype::F32, shape.clone(), data)
                .map_err(|e| ScoreError::weight_format(format!("tensor {}: {}", name, e)))?;
            views.push((*name, view));
        }

        safetensors::serialize(views, &None)
            .map_err(|e| ScoreError::weight_format(format!("failed to serialize weights: {}", e)))
    }

    pub fn tensor_names() -> [&'static str; 10] {
        [
            CONV_ATTEN_WEIGHT,
            CONV_ATTEN_BIAS,
            ATT1_WEIGHT,
            ATT1_BIAS,
            ATT2_WEIGHT,
            ATT2_BIAS,
            ATT3_WEIGHT,
            ATT3_BIAS,
            CLASSIFIER_WEIGHT,
            CLASSIFIER_BIAS,
        ]
    }
}

/// Expected 5D kernel shapes for a geometry
struct Shapes {
    conv_atten: [usize; 5],
    att1: [usize; 5],
    att2: [usize; 5],
    att3: [usize; 5],
}

impl Shapes {
    fn for_spec(spec: &ArchSpec) -> Self {
        let c = spec.in_channels;
        let heads = spec.num_heads();
        Self {
            conv_atten: [c, c, 3, 3, 3],
            att1: [heads, c, 1, 1, 1],
            att2: [heads, heads, 1, 1, 1],
            att3: [1, heads, spec.attention_t(), 1, 1],
        }
    }
}

fn read_tensor<Sh: IntoDimension>(
    tensors: &SafeTensors<'_>,
    name: &str,
    expected: Sh,
) -> Result<Array<f32, Sh::Dim>> {
    let expected = expected.into_dimension();
    let view = tensors
        .tensor(name)
        .map_err(|_| ScoreError::MissingTensor(name.to_string()))?;

    if view.dtype() != Dtype::F32 {
        return Err(ScoreError::weight_format(format!(
            "tensor {} has dtype {:?}, expected F32",
            name,
            view.dtype()
        )));
    }
    if view.shape() != expected.slice() {
        return Err(ScoreError::shape_mismatch(name, expected.slice(), view.shape()));
    }

    let values: Vec<f32> = view
        .data()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Array::from_shape_vec(expected.clone(), values)
        .map_err(|e| ScoreError::weight_format(format!("tensor {}: {}", name, e)))
}

fn uniform<Sh: IntoDimension>(rng: &mut StdRng, shape: Sh, fan_in: usize) -> Array<f32, Sh::Dim> {
    let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
    Array::from_shape_simple_fn(shape.into_dimension(), || rng.gen_range(-bound..bound))
}

fn tensor_entry<'a, D: Dimension>(name: &'a str, array: &Array<f32, D>) -> (&'a str, Vec<usize>, Vec<u8>) {
    let data = array.iter().flat_map(|v| v.to_le_bytes()).collect();
    (name, array.shape().to_vec(), data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn small_spec() -> ArchSpec {
        ArchSpec {
            in_channels: 6,
            feature_t: 4,
            feature_hw: 4,
            temporal_padding: 0,
            expand_k: 2,
        }
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let a = AttentionWeights::seeded(small_spec(), 7).unwrap();
        let b = AttentionWeights::seeded(small_spec(), 7).unwrap();
        let c = AttentionWeights::seeded(small_spec(), 8).unwrap();

        assert_eq!(a.conv_atten_weight, b.conv_atten_weight);
        assert_eq!(a.classifier_weight, b.classifier_weight);
        assert_ne!(a.conv_atten_weight, c.conv_atten_weight);
        assert_eq!(a.att3_weight.shape(), &[1, 4, 2, 1, 1]);
    }

    #[test]
    fn test_safetensors_reload_matches() {
        let weights = AttentionWeights::seeded(small_spec(), 1).unwrap();
        let bytes = weights.to_safetensors_bytes().unwrap();
        let loaded = AttentionWeights::from_safetensors_bytes(&bytes, small_spec()).unwrap();

        assert_eq!(loaded.att1_weight, weights.att1_weight);
        assert_eq!(loaded.att3_bias, weights.att3_bias);
        assert_eq!(loaded.classifier_bias, weights.classifier_bias);
    }

    #[test]
    fn test_wrong_variant_is_shape_mismatch() {
        let weights = AttentionWeights::seeded(small_spec(), 1).unwrap();
        let bytes = weights.to_safetensors_bytes().unwrap();

        let mut other = small_spec();
        other.in_channels = 8;
        let err = AttentionWeights::from_safetensors_bytes(&bytes, other).unwrap_err();
        assert!(matches!(err, ScoreError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_missing_tensor_reported_by_name() {
        let data = vec![0u8; 4];
        let view = TensorView::new(Dtype::F32, vec![1], &data).unwrap();
        let mut map = HashMap::new();
        map.insert(CONV_ATTEN_BIAS.to_string(), view);
        let bytes = safetensors::serialize(map, &None).unwrap();

        let err = AttentionWeights::from_safetensors_bytes(&bytes, small_spec()).unwrap_err();
        match err {
            ScoreError::MissingTensor(name) => assert_eq!(name, CONV_ATTEN_WEIGHT),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_garbage_blob_is_format_error() {
        let err = AttentionWeights::from_safetensors_bytes(b"not a blob", small_spec()).unwrap_err();
        assert!(matches!(err, ScoreError::WeightFormat(_)));
    }
}
