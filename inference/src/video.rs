//! Video ingestion: raw bytes to RGB frames, frames to fixed-length clips

use crate::error::{AnomalyError, Result};
use crate::types::Clip;
use image::codecs::gif::GifDecoder as GifFrames;
use image::{AnimationDecoder, DynamicImage, RgbImage};
use std::io::Cursor;

#[cfg(feature = "opencv")]
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{VideoCapture, CAP_ANY},
};

/// Container/codec hint supplied with the raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeHint {
    Gif,
    /// Any container OpenCV can open, named by extension (e.g. "mp4")
    Container(String),
}

impl DecodeHint {
    /// Hint from a file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "gif" => Self::Gif,
            other => Self::Container(other.to_string()),
        }
    }

    pub fn from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        path.as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or_else(|| Self::Container(String::new()))
    }
}

/// Turns encoded video bytes into RGB frames
pub trait VideoDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], hint: &DecodeHint) -> Result<Vec<RgbImage>>;

    fn name(&self) -> &str;
}

/// Animated GIF decoding through the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct GifDecoder;

impl VideoDecoder for GifDecoder {
    fn decode(&self, bytes: &[u8], hint: &DecodeHint) -> Result<Vec<RgbImage>> {
        if let DecodeHint::Container(ext) = hint {
            return Err(AnomalyError::decode(format!(
                "GIF decoder cannot read '{}' containers",
                ext
            )));
        }

        let decoder = GifFrames::new(Cursor::new(bytes))
            .map_err(|e| AnomalyError::decode(format!("malformed GIF: {}", e)))?;
        let frames = decoder
            .into_frames()
            .collect_frames()
            .map_err(|e| AnomalyError::decode(format!("failed to read GIF frames: {}", e)))?;

        let frames: Vec<RgbImage> = frames
            .into_iter()
            .map(|frame| DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8())
            .collect();

        if frames.is_empty() {
            return Err(AnomalyError::decode("GIF contains no frames"));
        }
        log::debug!("Decoded {} GIF frames", frames.len());
        Ok(frames)
    }

    fn name(&self) -> &str {
        "gif"
    }
}

/// Picks a decoder by hint: GIF natively, everything else through OpenCV
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDecoder;

impl VideoDecoder for AutoDecoder {
    fn decode(&self, bytes: &[u8], hint: &DecodeHint) -> Result<Vec<RgbImage>> {
        match hint {
            DecodeHint::Gif => GifDecoder.decode(bytes, hint),
            #[cfg(feature = "opencv")]
            DecodeHint::Container(_) => OpenCvDecoder.decode(bytes, hint),
            #[cfg(not(feature = "opencv"))]
            DecodeHint::Container(ext) => Err(AnomalyError::decode(format!(
                "no decoder for '{}' containers (build with the `opencv` feature)",
                ext
            ))),
        }
    }

    fn name(&self) -> &str {
        "auto"
    }
}

#[cfg(feature = "opencv")]
/// Container decoding through OpenCV's `VideoCapture`
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCvDecoder;

#[cfg(feature = "opencv")]
impl OpenCvDecoder {
    fn mat_to_rgb_image(mat: &Mat) -> Result<RgbImage> {
        let width = mat.cols() as u32;
        let height = mat.rows() as u32;

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(
            mat,
            &mut rgb_mat,
            imgproc::COLOR_BGR2RGB,
            0,
            opencv::core::AlgorithmHint::ALGO_HINT_DEFAULT,
        )
            .map_err(|e| AnomalyError::decode(format!("failed to convert BGR to RGB: {}", e)))?;

        let data = rgb_mat
            .data_bytes()
            .map_err(|e| AnomalyError::decode(format!("failed to read frame data: {}", e)))?
            .to_vec();

        RgbImage::from_vec(width, height, data)
            .ok_or_else(|| AnomalyError::decode("frame buffer size mismatch"))
    }
}

#[cfg(feature = "opencv")]
impl VideoDecoder for OpenCvDecoder {
    fn decode(&self, bytes: &[u8], hint: &DecodeHint) -> Result<Vec<RgbImage>> {
        let ext = match hint {
            DecodeHint::Container(ext) if !ext.is_empty() => ext.clone(),
            DecodeHint::Container(_) => "mp4".to_string(),
            DecodeHint::Gif => "gif".to_string(),
        };

        // VideoCapture only reads from paths
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = std::env::temp_dir().join(format!(
            "crime_detector_{}_{}.{}",
            std::process::id(),
            nanos,
            ext
        ));
        std::fs::write(&path, bytes)?;

        let result = (|| {
            let path_str = path.to_string_lossy();
            let mut cap = VideoCapture::from_file(&path_str, CAP_ANY)
                .map_err(|e| AnomalyError::decode(format!("failed to open video: {}", e)))?;
            if !cap
                .is_opened()
                .map_err(|e| AnomalyError::decode(format!("video check failed: {}", e)))?
            {
                return Err(AnomalyError::decode("video could not be opened"));
            }

            let mut frames = Vec::new();
            let mut mat = Mat::default();
            while cap
                .read(&mut mat)
                .map_err(|e| AnomalyError::decode(format!("frame read failed: {}", e)))?
            {
                if mat.empty() {
                    break;
                }
                frames.push(Self::mat_to_rgb_image(&mat)?);
            }
            Ok(frames)
        })();

        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("Failed to remove decode scratch file {}: {}", path.display(), e);
        }

        let frames = result?;
        if frames.is_empty() {
            return Err(AnomalyError::decode("video contains no frames"));
        }
        log::debug!("Decoded {} frames via OpenCV", frames.len());
        Ok(frames)
    }

    fn name(&self) -> &str {
        "opencv"
    }
}

/// Split frames into consecutive clips of `clip_length`.
///
/// A trailing partial clip is padded with copies of its last frame.
pub fn segment_clips(frames: Vec<RgbImage>, clip_length: usize) -> Result<Vec<Clip>> {
    if frames.is_empty() {
        return Err(AnomalyError::decode("video contains no frames"));
    }
    if clip_length == 0 {
        return Err(AnomalyError::invalid_dimensions(&[1], &[0]));
    }

    let mut clips = Vec::with_capacity(frames.len().div_ceil(clip_length));
    let mut frames = frames.into_iter().peekable();
    let mut segment = 0;

    while frames.peek().is_some() {
        let mut chunk: Vec<RgbImage> = frames.by_ref().take(clip_length).collect();
        if let Some(last) = chunk.last().cloned() {
            chunk.resize(clip_length, last);
        }
        clips.push(Clip::new(segment, chunk)?);
        segment += 1;
    }

    Ok(clips)
}
