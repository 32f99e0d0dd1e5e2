//! Core data types for the anomaly detection pipeline

use crate::error::{AnomalyError, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Image format for input frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageFormat {
    RGB,
    BGR,
    RGBA,
    BGRA,
    Grayscale,
}

/// Raw frame as handed over by a decoder or caller
#[derive(Debug, Clone)]
pub struct ImageData {
    /// Raw pixel data
    pub data: Vec<u8>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Pixel format
    pub format: ImageFormat,
}

impl ImageData {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: ImageFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
        }
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, ImageFormat::RGB)
    }

    /// Get number of channels
    pub fn channels(&self) -> u32 {
        match self.format {
            ImageFormat::RGB | ImageFormat::BGR => 3,
            ImageFormat::RGBA | ImageFormat::BGRA => 4,
            ImageFormat::Grayscale => 1,
        }
    }

    /// Validate image data consistency
    pub fn validate(&self) -> bool {
        let expected_size = self.width as usize * self.height as usize * self.channels() as usize;
        self.data.len() == expected_size
    }
}

/// Fixed-length run of equally sized RGB frames, one inference unit
#[derive(Debug, Clone)]
pub struct Clip {
    /// Position of the clip in the video
    pub segment: usize,
    frames: Vec<RgbImage>,
}

impl Clip {
    /// Fails with `InvalidDimensions` when frames disagree on size
    pub fn new(segment: usize, frames: Vec<RgbImage>) -> Result<Self> {
        let first = frames
            .first()
            .ok_or_else(|| AnomalyError::invalid_dimensions(&[1], &[0]))?
            .dimensions();

        for frame in &frames[1..] {
            let dims = frame.dimensions();
            if dims != first {
                return Err(AnomalyError::invalid_dimensions(
                    &[first.1 as usize, first.0 as usize],
                    &[dims.1 as usize, dims.0 as usize],
                ));
            }
        }

        Ok(Self { segment, frames })
    }

    pub fn frames(&self) -> &[RgbImage] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// (width, height) shared by every frame
    pub fn dimensions(&self) -> (u32, u32) {
        self.frames[0].dimensions()
    }
}

/// Spatial sub-region used for multi-crop oversampling.
///
/// Indices 0..5 are the plain crops, 5..10 their mirrored counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CropVariant {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
    MirroredTopLeft,
    MirroredTopRight,
    MirroredBottomLeft,
    MirroredBottomRight,
    MirroredCenter,
}

impl CropVariant {
    pub const COUNT: usize = 10;

    pub fn all() -> [Self; Self::COUNT] {
        [
            Self::TopLeft,
            Self::TopRight,
            Self::BottomLeft,
            Self::BottomRight,
            Self::Center,
            Self::MirroredTopLeft,
            Self::MirroredTopRight,
            Self::MirroredBottomLeft,
            Self::MirroredBottomRight,
            Self::MirroredCenter,
        ]
    }

    pub fn index(&self) -> usize {
        match self {
            Self::TopLeft => 0,
            Self::TopRight => 1,
            Self::BottomLeft => 2,
            Self::BottomRight => 3,
            Self::Center => 4,
            Self::MirroredTopLeft => 5,
            Self::MirroredTopRight => 6,
            Self::MirroredBottomLeft => 7,
            Self::MirroredBottomRight => 8,
            Self::MirroredCenter => 9,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::all().get(index).copied()
    }

    pub fn is_mirrored(&self) -> bool {
        self.index() >= 5
    }

    /// The same region without mirroring
    pub fn base(&self) -> Self {
        Self::all()[self.index() % 5]
    }
}

/// Crop scores of one temporal segment, indexed by crop variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentScores {
    pub segment: usize,
    pub crop_scores: Vec<f32>,
}

impl SegmentScores {
    pub fn new(segment: usize, crop_scores: Vec<f32>) -> Self {
        Self {
            segment,
            crop_scores,
        }
    }

    /// Single-crop segment
    pub fn single(segment: usize, score: f32) -> Self {
        Self::new(segment, vec![score])
    }
}

/// Content identifier returned by the anchor service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentIdentifier(pub String);

impl ContentIdentifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<base>/ipfs/<cid>`
    pub fn gateway_url(&self, base: &str) -> String {
        format!("{}/ipfs/{}", base.trim_end_matches('/'), self.0)
    }
}

impl std::fmt::Display for ContentIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned by the alert record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied context attached to an alert
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertMetadata {
    pub location: String,
    pub date: String,
    pub time: String,
    pub coordinates: String,
}

/// Persisted consequence of a positive decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub alert: bool,
    /// Gateway URL of the anchored footage, or the retained local path
    pub footage_url: String,
    pub location: String,
    pub anomaly_date: String,
    pub anomaly_time: String,
    pub coordinates: String,
    /// Set by downstream consumers once a contract has been created
    pub created_contract: bool,
    pub evidence_anchored: bool,
    pub video_score: f32,
}

impl AlertRecord {
    pub fn new(metadata: &AlertMetadata, footage_url: String, anchored: bool, video_score: f32) -> Self {
        Self {
            alert: true,
            footage_url,
            location: metadata.location.clone(),
            anomaly_date: metadata.date.clone(),
            anomaly_time: metadata.time.clone(),
            coordinates: metadata.coordinates.clone(),
            created_contract: false,
            evidence_anchored: anchored,
            video_score,
        }
    }
}

/// The footage under analysis: its bytes plus the transient file holding them
#[derive(Debug, Clone)]
pub struct SourceVideo {
    pub name: String,
    pub bytes: Vec<u8>,
    /// Transient copy on disk, removed once it is no longer needed
    pub transient_path: Option<PathBuf>,
}

impl SourceVideo {
    pub fn in_memory<S: Into<String>>(name: S, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            transient_path: None,
        }
    }

    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let bytes = std::fs::read(&path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        Ok(Self {
            name,
            bytes,
            transient_path: Some(path),
        })
    }

    /// Where the footage can be found when it was not anchored
    pub fn local_reference(&self) -> String {
        match &self.transient_path {
            Some(path) => format!("file://{}", path.display()),
            None => format!("local:{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_data_validation() {
        let ok = ImageData::new(vec![0; 2 * 3 * 4], 2, 3, ImageFormat::RGBA);
        assert!(ok.validate());
        let bad = ImageData::new(vec![0; 5], 2, 3, ImageFormat::RGB);
        assert!(!bad.validate());
    }

    #[test]
    fn test_clip_rejects_mixed_sizes() {
        let frames = vec![RgbImage::new(4, 4), RgbImage::new(4, 5)];
        assert!(matches!(
            Clip::new(0, frames),
            Err(AnomalyError::InvalidDimensions { .. })
        ));
        assert!(Clip::new(0, Vec::new()).is_err());

        let clip = Clip::new(3, vec![RgbImage::new(8, 6); 4]).unwrap();
        assert_eq!(clip.len(), 4);
        assert_eq!(clip.dimensions(), (8, 6));
        assert_eq!(clip.segment, 3);
    }

    #[test]
    fn test_crop_variant_indexing() {
        for (i, variant) in CropVariant::all().iter().enumerate() {
            assert_eq!(variant.index(), i);
            assert_eq!(CropVariant::from_index(i), Some(*variant));
        }
        assert_eq!(CropVariant::from_index(10), None);
        assert!(CropVariant::MirroredCenter.is_mirrored());
        assert_eq!(CropVariant::MirroredBottomLeft.base(), CropVariant::BottomLeft);
    }

    #[test]
    fn test_alert_record_field_names() {
        let metadata = AlertMetadata {
            location: "Gate 4".into(),
            date: "2024-03-01".into(),
            time: "22:14".into(),
            coordinates: "40.7,-74.0".into(),
        };
        let record = AlertRecord::new(&metadata, "https://gw/ipfs/Qm1".into(), true, 0.9);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["footageUrl"], "https://gw/ipfs/Qm1");
        assert_eq!(json["anomalyDate"], "2024-03-01");
        assert_eq!(json["anomalyTime"], "22:14");
        assert_eq!(json["createdContract"], false);
        assert_eq!(json["evidenceAnchored"], true);
        assert_eq!(json["alert"], true);
    }

    #[test]
    fn test_gateway_url() {
        let cid = ContentIdentifier("QmXyz".into());
        assert_eq!(cid.gateway_url("https://gateway.pinata.cloud/"), "https://gateway.pinata.cloud/ipfs/QmXyz");
    }
}
