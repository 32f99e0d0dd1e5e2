//! Architecture variants and the tensor geometry they imply

use crate::error::{Result, ScoreError};
use serde::{Deserialize, Serialize};

/// Pretrained backbone that produced the segment features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backbone {
    C3D,
    I3D,
}

impl Backbone {
    /// Channel count of the backbone's feature map
    pub fn feature_channels(&self) -> usize {
        match self {
            Self::C3D => 512,
            Self::I3D => 832,
        }
    }

    /// Spatial crop fed to the backbone
    pub fn crop_size(&self) -> u32 {
        match self {
            Self::C3D => 112,
            Self::I3D => 224,
        }
    }

    /// Shortest-side resize applied before cropping
    pub fn resize(&self) -> u32 {
        match self {
            Self::C3D => 128,
            Self::I3D => 256,
        }
    }

    /// Per-channel RGB mean, in the value range the backbone was trained on
    pub fn mean(&self) -> [f32; 3] {
        match self {
            Self::C3D => [90.25, 97.66, 101.41],
            Self::I3D => [0.45, 0.45, 0.45],
        }
    }

    pub fn std(&self) -> [f32; 3] {
        match self {
            Self::C3D => [1.0, 1.0, 1.0],
            Self::I3D => [0.225, 0.225, 0.225],
        }
    }

    /// Whether pixel values are divided by 255 before normalization
    pub fn unit_scale(&self) -> bool {
        matches!(self, Self::I3D)
    }

    /// Temporal padding of the first attention convolution
    fn temporal_padding(&self) -> usize {
        match self {
            Self::C3D => 0,
            Self::I3D => 1,
        }
    }
}

/// Named scorer configuration: dataset the head was trained on plus backbone.
///
/// Serialized as its canonical name; deserialized through `FromStr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ArchVariant {
    UcfC3d,
    UcfI3d,
    ShtC3d,
    ShtI3d,
}

impl ArchVariant {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UcfC3d => "UCF_C3D",
            Self::UcfI3d => "UCF_I3D",
            Self::ShtC3d => "SHT_C3D",
            Self::ShtI3d => "SHT_I3D",
        }
    }

    pub fn backbone(&self) -> Backbone {
        match self {
            Self::UcfC3d | Self::ShtC3d => Backbone::C3D,
            Self::UcfI3d | Self::ShtI3d => Backbone::I3D,
        }
    }

    /// Expansion factor k; the attention stage uses 2k heads
    pub fn expand_k(&self) -> usize {
        match self {
            Self::UcfC3d | Self::UcfI3d => 8,
            Self::ShtC3d | Self::ShtI3d => 4,
        }
    }

    /// Frames per clip fed to the backbone
    pub fn clip_length(&self) -> usize {
        16
    }

    pub fn spec(&self) -> ArchSpec {
        let backbone = self.backbone();
        ArchSpec {
            in_channels: backbone.feature_channels(),
            feature_t: 4,
            feature_hw: 14,
            temporal_padding: backbone.temporal_padding(),
            expand_k: self.expand_k(),
        }
    }

    pub fn all() -> Vec<Self> {
        vec![Self::UcfC3d, Self::UcfI3d, Self::ShtC3d, Self::ShtI3d]
    }
}

impl std::str::FromStr for ArchVariant {
    type Err = ScoreError;

    /// Parse from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ucf_c3d" => Ok(Self::UcfC3d),
            "ucf_i3d" => Ok(Self::UcfI3d),
            "sht_c3d" => Ok(Self::ShtC3d),
            "sht_i3d" => Ok(Self::ShtI3d),
            other => Err(ScoreError::weight_format(format!(
                "unknown architecture variant '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for ArchVariant {
    type Error = ScoreError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ArchVariant> for String {
    fn from(variant: ArchVariant) -> Self {
        variant.name().to_string()
    }
}

impl Default for ArchVariant {
    fn default() -> Self {
        Self::UcfI3d
    }
}

impl std::fmt::Display for ArchVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Tensor geometry of one attention head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchSpec {
    /// Feature channels C
    pub in_channels: usize,
    /// Temporal extent T of the incoming feature map
    pub feature_t: usize,
    /// Nominal spatial extent of the incoming feature map (H = W)
    pub feature_hw: usize,
    /// Temporal padding of the 3x3x3 attention convolution
    pub temporal_padding: usize,
    pub expand_k: usize,
}

impl ArchSpec {
    pub fn num_heads(&self) -> usize {
        2 * self.expand_k
    }

    /// Temporal extent T' after the strided 3x3x3 convolution
    pub fn attention_t(&self) -> usize {
        (self.feature_t + 2 * self.temporal_padding).saturating_sub(2)
    }

    /// Spatial extent after the stride-2 convolution
    pub fn attention_hw(&self, input_hw: usize) -> usize {
        (input_hw + 1) / 2
    }

    /// Reject geometry that cannot produce a non-empty attention map
    pub fn validate(&self) -> Result<()> {
        if self.in_channels == 0 || self.expand_k == 0 || self.feature_hw == 0 {
            return Err(ScoreError::weight_format(format!(
                "degenerate architecture: {:?}",
                self
            )));
        }
        if self.attention_t() == 0 {
            return Err(ScoreError::shape_mismatch(
                "attention temporal extent",
                &[1],
                &[self.attention_t()],
            ));
        }
        Ok(())
    }

    /// Check a `[B, C, T, H, W]` input shape against this geometry
    pub fn validate_input(&self, shape: &[usize]) -> Result<()> {
        if shape.len() != 5 {
            return Err(ScoreError::shape_mismatch(
                "feature map rank",
                &[5],
                &[shape.len()],
            ));
        }
        let (c, t, h, w) = (shape[1], shape[2], shape[3], shape[4]);
        if c != self.in_channels || t != self.feature_t || h == 0 || w == 0 || shape[0] == 0 {
            return Err(ScoreError::shape_mismatch(
                "feature map [B, C, T, H, W]",
                &[shape[0].max(1), self.in_channels, self.feature_t, h.max(1), w.max(1)],
                shape,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_geometry() {
        let c3d = ArchVariant::UcfC3d.spec();
        assert_eq!(c3d.in_channels, 512);
        assert_eq!(c3d.attention_t(), 2);
        assert_eq!(c3d.num_heads(), 16);

        let i3d = ArchVariant::ShtI3d.spec();
        assert_eq!(i3d.in_channels, 832);
        assert_eq!(i3d.attention_t(), 4);
        assert_eq!(i3d.num_heads(), 8);
        assert_eq!(i3d.attention_hw(14), 7);
        assert_eq!(i3d.attention_hw(7), 4);
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("UCF_C3D".parse::<ArchVariant>().unwrap(), ArchVariant::UcfC3d);
        assert_eq!("sht_i3d".parse::<ArchVariant>().unwrap(), ArchVariant::ShtI3d);
        assert!("r18".parse::<ArchVariant>().is_err());
        for variant in ArchVariant::all() {
            assert_eq!(variant.name().parse::<ArchVariant>().unwrap(), variant);
        }
    }

    #[test]
    fn test_deserialize_case_insensitive() {
        use serde::de::value::{Error as ValueError, StrDeserializer};
        use serde::de::IntoDeserializer;

        let parse = |name: &str| {
            let de: StrDeserializer<'_, ValueError> = name.into_deserializer();
            ArchVariant::deserialize(de)
        };
        assert_eq!(parse("Ucf_I3d").unwrap(), ArchVariant::UcfI3d);
        assert_eq!(parse("SHT_C3D").unwrap(), ArchVariant::ShtC3d);
        assert!(parse("ucf_r50").is_err());
        assert_eq!(String::from(ArchVariant::ShtI3d), "SHT_I3D");
    }

    #[test]
    fn test_validate_input() {
        let spec = ArchVariant::UcfI3d.spec();
        assert!(spec.validate_input(&[2, 832, 4, 14, 14]).is_ok());
        assert!(spec.validate_input(&[1, 832, 4, 3, 5]).is_ok());
        assert!(spec.validate_input(&[1, 512, 4, 14, 14]).is_err());
        assert!(spec.validate_input(&[1, 832, 2, 14, 14]).is_err());
        assert!(spec.validate_input(&[832, 4, 14, 14]).is_err());
    }

    #[test]
    fn test_degenerate_spec_rejected() {
        let spec = ArchSpec {
            in_channels: 8,
            feature_t: 1,
            feature_hw: 4,
            temporal_padding: 0,
            expand_k: 2,
        };
        assert!(spec.validate().is_err());
    }
}
