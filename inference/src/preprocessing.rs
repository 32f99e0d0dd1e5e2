//! Clip preprocessing: resize, crop variants, tensor layout and normalization
//!
//! Everything here is deterministic. Seeded training-time transforms live in
//! [`crate::augment`].

use crate::error::{AnomalyError, Result};
use crate::types::{Clip, CropVariant, ImageData, ImageFormat};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array5, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sgattn::Backbone;

/// Resampling filter used when resizing frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
    Bicubic,
    Lanczos,
}

impl Interpolation {
    pub fn filter(&self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Bilinear => FilterType::Triangle,
            Self::Bicubic => FilterType::CatmullRom,
            Self::Lanczos => FilterType::Lanczos3,
        }
    }
}

/// Resize target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resize {
    /// Scale the shorter side to this length, keeping aspect ratio
    ShortestSide(u32),
    /// Exact (width, height)
    Exact(u32, u32),
}

impl Resize {
    /// Output (width, height) for a frame of the given size
    pub fn target(&self, width: u32, height: u32) -> (u32, u32) {
        match *self {
            Self::Exact(w, h) => (w, h),
            Self::ShortestSide(size) => {
                if width <= height {
                    let oh = (size as u64 * height as u64 / width.max(1) as u64) as u32;
                    (size, oh)
                } else {
                    let ow = (size as u64 * width as u64 / height.max(1) as u64) as u32;
                    (ow, size)
                }
            }
        }
    }
}

/// Axis used to build the mirrored crop variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorAxis {
    #[default]
    Horizontal,
    Vertical,
}

/// Per-channel `(x * scale - mean) / std`, scale being 1/255 or 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Divide raw 0..255 values by 255 before normalizing
    #[serde(default)]
    pub scale_to_unit: bool,
}

impl Normalization {
    pub fn for_backbone(backbone: Backbone) -> Self {
        Self {
            mean: backbone.mean(),
            std: backbone.std(),
            scale_to_unit: backbone.unit_scale(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.std.iter().any(|&s| s <= 0.0 || !s.is_finite()) {
            return Err(AnomalyError::config(format!(
                "normalization std must be positive, got {:?}",
                self.std
            )));
        }
        Ok(())
    }

    fn scale(&self) -> f32 {
        if self.scale_to_unit {
            1.0 / 255.0
        } else {
            1.0
        }
    }

    /// Normalize a `[B, 3, T, H, W]` tensor in place
    pub fn normalize(&self, tensor: &mut Array5<f32>) {
        let scale = self.scale();
        for (c, mut channel) in tensor.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, std) = (self.mean[c % 3], self.std[c % 3]);
            channel.mapv_inplace(|v| (v * scale - mean) / std);
        }
    }

    /// Inverse of [`Normalization::normalize`]
    pub fn denormalize(&self, tensor: &mut Array5<f32>) {
        let scale = self.scale();
        for (c, mut channel) in tensor.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, std) = (self.mean[c % 3], self.std[c % 3]);
            channel.mapv_inplace(|v| (v * std + mean) / scale);
        }
    }
}

/// Convert any supported frame format to RGB
pub fn to_rgb_image(image: &ImageData) -> Result<RgbImage> {
    if !image.validate() {
        return Err(AnomalyError::unsupported_format(format!(
            "{:?} frame of {}x{} needs {} bytes, got {}",
            image.format,
            image.width,
            image.height,
            image.width as usize * image.height as usize * image.channels() as usize,
            image.data.len()
        )));
    }

    let rgb: Vec<u8> = match image.format {
        ImageFormat::RGB => image.data.clone(),
        ImageFormat::BGR => image
            .data
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        ImageFormat::RGBA => image
            .data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        ImageFormat::BGRA => image
            .data
            .chunks_exact(4)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        ImageFormat::Grayscale => image.data.iter().flat_map(|&v| [v, v, v]).collect(),
    };

    RgbImage::from_raw(image.width, image.height, rgb)
        .ok_or_else(|| AnomalyError::unsupported_format("failed to build RGB buffer"))
}

/// Resize a frame; shortest-side resizing is a no-op when already matching
pub fn resize(frame: &RgbImage, target: Resize, interpolation: Interpolation) -> Result<RgbImage> {
    let (w, h) = frame.dimensions();
    let (ow, oh) = target.target(w, h);
    if ow == 0 || oh == 0 {
        return Err(AnomalyError::invalid_dimensions(&[1, 1], &[oh as usize, ow as usize]));
    }
    if (ow, oh) == (w, h) {
        return Ok(frame.clone());
    }
    Ok(imageops::resize(frame, ow, oh, interpolation.filter()))
}

/// Crop the window at (top, left) of size (height, width)
pub fn crop(frame: &RgbImage, top: u32, left: u32, height: u32, width: u32) -> Result<RgbImage> {
    let (w, h) = frame.dimensions();
    if height == 0 || width == 0 || top + height > h || left + width > w {
        return Err(AnomalyError::invalid_dimensions(
            &[(top + height) as usize, (left + width) as usize],
            &[h as usize, w as usize],
        ));
    }
    if (top, left, height, width) == (0, 0, h, w) {
        return Ok(frame.clone());
    }
    Ok(imageops::crop_imm(frame, left, top, width, height).to_image())
}

/// Centered crop, offsets rounded to nearest
pub fn center_crop(frame: &RgbImage, height: u32, width: u32) -> Result<RgbImage> {
    let (w, h) = frame.dimensions();
    if height > h || width > w {
        return Err(AnomalyError::invalid_dimensions(
            &[height as usize, width as usize],
            &[h as usize, w as usize],
        ));
    }
    let top = ((h - height) as f32 / 2.0).round_ties_even() as u32;
    let left = ((w - width) as f32 / 2.0).round_ties_even() as u32;
    crop(frame, top, left, height, width)
}

pub fn mirror(frame: &RgbImage, axis: MirrorAxis) -> RgbImage {
    match axis {
        MirrorAxis::Horizontal => imageops::flip_horizontal(frame),
        MirrorAxis::Vertical => imageops::flip_vertical(frame),
    }
}

/// One of the ten oversampling crops of a square `size` window
pub fn crop_variant(frame: &RgbImage, variant: CropVariant, size: u32, axis: MirrorAxis) -> Result<RgbImage> {
    let mirrored;
    let source = if variant.is_mirrored() {
        mirrored = mirror(frame, axis);
        &mirrored
    } else {
        frame
    };

    let (w, h) = source.dimensions();
    if size > w || size > h {
        return Err(AnomalyError::invalid_dimensions(
            &[size as usize, size as usize],
            &[h as usize, w as usize],
        ));
    }

    match variant.base() {
        CropVariant::TopLeft => crop(source, 0, 0, size, size),
        CropVariant::TopRight => crop(source, 0, w - size, size, size),
        CropVariant::BottomLeft => crop(source, h - size, 0, size, size),
        CropVariant::BottomRight => crop(source, h - size, w - size, size, size),
        _ => center_crop(source, size, size),
    }
}

/// Four corners and center, in `CropVariant` order
pub fn five_crop(frame: &RgbImage, size: u32) -> Result<Vec<RgbImage>> {
    CropVariant::all()[..5]
        .iter()
        .map(|&v| crop_variant(frame, v, size, MirrorAxis::Horizontal))
        .collect()
}

/// Five crops of the frame followed by the five crops of its mirror
pub fn ten_crop(frame: &RgbImage, size: u32, axis: MirrorAxis) -> Result<Vec<RgbImage>> {
    let mut crops = five_crop(frame, size)?;
    crops.extend(five_crop(&mirror(frame, axis), size)?);
    Ok(crops)
}

/// `L` frames of `H x W x 3` -> `[1, 3, L, H, W]`, raw 0..255 values
pub fn clip_to_tensor(frames: &[RgbImage]) -> Result<Array5<f32>> {
    let first = frames
        .first()
        .ok_or_else(|| AnomalyError::invalid_dimensions(&[1], &[0]))?;
    let (w, h) = first.dimensions();

    let mut tensor = Array5::<f32>::zeros((1, 3, frames.len(), h as usize, w as usize));
    for (t, frame) in frames.iter().enumerate() {
        if frame.dimensions() != (w, h) {
            let (fw, fh) = frame.dimensions();
            return Err(AnomalyError::invalid_dimensions(
                &[h as usize, w as usize],
                &[fh as usize, fw as usize],
            ));
        }
        for (x, y, pixel) in frame.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, t, y as usize, x as usize]] = pixel[c] as f32;
            }
        }
    }
    Ok(tensor)
}

/// One crop of one clip, ready for the feature extractor
#[derive(Debug, Clone)]
pub struct PreparedCrop {
    pub segment: usize,
    pub variant: CropVariant,
    /// Normalized `[1, 3, L, S, S]`
    pub tensor: Array5<f32>,
}

/// Turns a clip into the crop tensors the backbone consumes
#[derive(Debug, Clone)]
pub struct ClipPreprocessor {
    crop_size: u32,
    resize: Resize,
    interpolation: Interpolation,
    oversample: bool,
    mirror_axis: MirrorAxis,
    allow_upscale: bool,
    normalization: Normalization,
}

impl ClipPreprocessor {
    pub fn new(crop_size: u32, resize: Resize, normalization: Normalization) -> Self {
        Self {
            crop_size,
            resize,
            interpolation: Interpolation::default(),
            oversample: false,
            mirror_axis: MirrorAxis::default(),
            allow_upscale: false,
            normalization,
        }
    }

    pub fn with_oversampling(mut self, oversample: bool) -> Self {
        self.oversample = oversample;
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn with_mirror_axis(mut self, axis: MirrorAxis) -> Self {
        self.mirror_axis = axis;
        self
    }

    /// Let the resize step enlarge frames smaller than the target
    pub fn with_upscaling(mut self, allow: bool) -> Self {
        self.allow_upscale = allow;
        self
    }

    pub fn crop_size(&self) -> u32 {
        self.crop_size
    }

    pub fn normalization(&self) -> &Normalization {
        &self.normalization
    }

    /// Crop variants produced per clip
    pub fn variants(&self) -> Vec<CropVariant> {
        if self.oversample {
            CropVariant::all().to_vec()
        } else {
            vec![CropVariant::Center]
        }
    }

    fn resize_frame(&self, frame: &RgbImage) -> Result<RgbImage> {
        let (w, h) = frame.dimensions();
        let (ow, oh) = self.resize.target(w, h);
        if !self.allow_upscale && (ow > w || oh > h) {
            return Err(AnomalyError::invalid_dimensions(
                &[oh as usize, ow as usize],
                &[h as usize, w as usize],
            ));
        }
        resize(frame, self.resize, self.interpolation)
    }

    /// Resize, crop (1 or 10 variants), lay out as a tensor and normalize.
    ///
    /// Fails with `InvalidDimensions` without producing any crop when the
    /// crop window does not fit the (resized) frame.
    pub fn prepare(&self, clip: &Clip) -> Result<Vec<PreparedCrop>> {
        let resized: Vec<RgbImage> = clip
            .frames()
            .par_iter()
            .map(|frame| self.resize_frame(frame))
            .collect::<Result<_>>()?;

        let (w, h) = resized[0].dimensions();
        if self.crop_size > w || self.crop_size > h {
            return Err(AnomalyError::invalid_dimensions(
                &[self.crop_size as usize, self.crop_size as usize],
                &[h as usize, w as usize],
            ));
        }

        self.variants()
            .into_iter()
            .map(|variant| {
                let crops: Vec<RgbImage> = resized
                    .iter()
                    .map(|frame| crop_variant(frame, variant, self.crop_size, self.mirror_axis))
                    .collect::<Result<_>>()?;
                let mut tensor = clip_to_tensor(&crops)?;
                self.normalization.normalize(&mut tensor);
                Ok(PreparedCrop {
                    segment: clip.segment,
                    variant,
                    tensor,
                })
            })
            .collect()
    }
}
