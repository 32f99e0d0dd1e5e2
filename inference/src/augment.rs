//! Seeded clip augmentation for training-time data paths
//!
//! Each transform samples its parameters once per clip from the caller's
//! random source and applies them to every frame, so the same seed always
//! yields the same clip.

use crate::error::{AnomalyError, Result};
use crate::preprocessing::{crop, resize, Interpolation, Resize};
use image::imageops;
use image::{Rgb, RgbImage};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};

/// A transform over a whole clip
pub trait ClipTransform: Send + Sync {
    fn apply(&self, clip: Vec<RgbImage>, rng: &mut dyn RngCore) -> Result<Vec<RgbImage>>;
}

/// Applies transforms in sequence
#[derive(Default)]
pub struct Compose {
    transforms: Vec<Box<dyn ClipTransform>>,
}

impl Compose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then<T: ClipTransform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl ClipTransform for Compose {
    fn apply(&self, mut clip: Vec<RgbImage>, rng: &mut dyn RngCore) -> Result<Vec<RgbImage>> {
        for transform in &self.transforms {
            clip = transform.apply(clip, rng)?;
        }
        Ok(clip)
    }
}

fn clip_dims(clip: &[RgbImage]) -> Result<(u32, u32)> {
    clip.first()
        .map(|f| f.dimensions())
        .ok_or_else(|| AnomalyError::invalid_dimensions(&[1], &[0]))
}

fn check_range(name: &str, range: (f32, f32), bounds: (f32, f32)) -> Result<()> {
    if !(bounds.0 <= range.0 && range.0 <= range.1 && range.1 <= bounds.1) {
        return Err(AnomalyError::config(format!(
            "{} range {:?} must be ordered and within {:?}",
            name, range, bounds
        )));
    }
    Ok(())
}

fn sample(rng: &mut dyn RngCore, range: (f32, f32)) -> f32 {
    if range.0 >= range.1 {
        range.0
    } else {
        rng.gen_range(range.0..range.1)
    }
}

/// Crop the same random window out of every frame
#[derive(Debug, Clone, Copy)]
pub struct RandomCrop {
    pub height: u32,
    pub width: u32,
}

impl RandomCrop {
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }
}

impl ClipTransform for RandomCrop {
    fn apply(&self, clip: Vec<RgbImage>, rng: &mut dyn RngCore) -> Result<Vec<RgbImage>> {
        let (w, h) = clip_dims(&clip)?;
        if self.width > w || self.height > h {
            return Err(AnomalyError::invalid_dimensions(
                &[self.height as usize, self.width as usize],
                &[h as usize, w as usize],
            ));
        }
        let top = rng.gen_range(0..=h - self.height);
        let left = rng.gen_range(0..=w - self.width);
        clip.iter()
            .map(|frame| crop(frame, top, left, self.height, self.width))
            .collect()
    }
}

/// Random area/aspect crop resized to a fixed output size
#[derive(Debug, Clone, Copy)]
pub struct RandomResizedCrop {
    /// Output (width, height)
    pub size: (u32, u32),
    /// Fraction of the frame area
    pub scale: (f32, f32),
    /// Width / height
    pub ratio: (f32, f32),
    pub interpolation: Interpolation,
}

impl RandomResizedCrop {
    pub fn new(size: u32) -> Self {
        Self {
            size: (size, size),
            scale: (0.08, 1.0),
            ratio: (3.0 / 4.0, 4.0 / 3.0),
            interpolation: Interpolation::Bilinear,
        }
    }

    pub fn with_scale(mut self, scale: (f32, f32)) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_ratio(mut self, ratio: (f32, f32)) -> Self {
        self.ratio = ratio;
        self
    }

    /// Window (top, left, height, width): 10 sampling attempts, then a
    /// centered window clamped to the nearest allowed aspect ratio
    pub fn get_params(&self, width: u32, height: u32, rng: &mut dyn RngCore) -> (u32, u32, u32, u32) {
        let area = width as f32 * height as f32;
        let log_ratio = (self.ratio.0.ln(), self.ratio.1.ln());

        for _ in 0..10 {
            let target_area = sample(rng, self.scale) * area;
            let aspect = sample(rng, log_ratio).exp();

            let w = (target_area * aspect).sqrt().round() as u32;
            let h = (target_area / aspect).sqrt().round() as u32;

            if w > 0 && w <= width && h > 0 && h <= height {
                let top = rng.gen_range(0..=height - h);
                let left = rng.gen_range(0..=width - w);
                return (top, left, h, w);
            }
        }

        let in_ratio = width as f32 / height as f32;
        let (min_ratio, max_ratio) = (self.ratio.0.min(self.ratio.1), self.ratio.0.max(self.ratio.1));
        let (w, h) = if in_ratio < min_ratio {
            (width, ((width as f32 / min_ratio).round() as u32).clamp(1, height))
        } else if in_ratio > max_ratio {
            (((height as f32 * max_ratio).round() as u32).clamp(1, width), height)
        } else {
            (width, height)
        };
        ((height - h) / 2, (width - w) / 2, h, w)
    }
}

impl ClipTransform for RandomResizedCrop {
    fn apply(&self, clip: Vec<RgbImage>, rng: &mut dyn RngCore) -> Result<Vec<RgbImage>> {
        check_range("scale", self.scale, (0.0, f32::INFINITY))?;
        check_range("ratio", self.ratio, (f32::MIN_POSITIVE, f32::INFINITY))?;

        let (w, h) = clip_dims(&clip)?;
        let (top, left, ch, cw) = self.get_params(w, h, rng);
        let target = Resize::Exact(self.size.0, self.size.1);

        clip.iter()
            .map(|frame| resize(&crop(frame, top, left, ch, cw)?, target, self.interpolation))
            .collect()
    }
}

/// Mirror the whole clip left-right with probability `p`
#[derive(Debug, Clone, Copy)]
pub struct RandomHorizontalFlip {
    pub p: f64,
}

impl ClipTransform for RandomHorizontalFlip {
    fn apply(&self, clip: Vec<RgbImage>, rng: &mut dyn RngCore) -> Result<Vec<RgbImage>> {
        if rng.gen_bool(self.p.clamp(0.0, 1.0)) {
            Ok(clip.iter().map(imageops::flip_horizontal).collect())
        } else {
            Ok(clip)
        }
    }
}

/// Mirror the whole clip top-bottom with probability `p`
#[derive(Debug, Clone, Copy)]
pub struct RandomVerticalFlip {
    pub p: f64,
}

impl ClipTransform for RandomVerticalFlip {
    fn apply(&self, clip: Vec<RgbImage>, rng: &mut dyn RngCore) -> Result<Vec<RgbImage>> {
        if rng.gen_bool(self.p.clamp(0.0, 1.0)) {
            Ok(clip.iter().map(imageops::flip_vertical).collect())
        } else {
            Ok(clip)
        }
    }
}

fn apply_lut(frame: &RgbImage, table: &[u8; 256]) -> RgbImage {
    let mut out = frame.clone();
    for pixel in out.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = table[*c as usize];
        }
    }
    out
}

fn lut(f: impl Fn(f32) -> f32) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = f(i as f32).clamp(0.0, 255.0) as u8;
    }
    table
}

pub fn adjust_brightness(frame: &RgbImage, factor: f32) -> RgbImage {
    apply_lut(frame, &lut(|v| v * factor))
}

/// Contrast around a fixed pivot of 74
pub fn adjust_contrast(frame: &RgbImage, factor: f32) -> RgbImage {
    apply_lut(frame, &lut(|v| (v - 74.0) * factor + 74.0))
}

/// Saturation via the 3x3 mixing matrix `(1 - s) + 3s * I`, scaled by 1/3
pub fn adjust_saturation(frame: &RgbImage, factor: f32) -> RgbImage {
    let diag = 1.0 + 2.0 * factor;
    let off = 1.0 - factor;
    let mut out = frame.clone();
    for pixel in out.pixels_mut() {
        let [r, g, b] = pixel.0.map(f32::from);
        let mix = |a: f32, x: f32, y: f32| ((a * diag + (x + y) * off) / 3.0).clamp(0.0, 255.0) as u8;
        pixel.0 = [mix(r, g, b), mix(g, r, b), mix(b, r, g)];
    }
    out
}

/// Rotate the hue channel by `factor` of a full turn; `factor` in [-0.5, 0.5]
pub fn adjust_hue(frame: &RgbImage, factor: f32) -> Result<RgbImage> {
    if !(-0.5..=0.5).contains(&factor) {
        return Err(AnomalyError::config(format!(
            "hue factor {} is not in [-0.5, 0.5]",
            factor
        )));
    }
    let mut out = frame.clone();
    for pixel in out.pixels_mut() {
        let (h, s, v) = rgb_to_hsv(pixel.0);
        pixel.0 = hsv_to_rgb((h + factor).rem_euclid(1.0), s, v);
    }
    Ok(out)
}

fn rgb_to_hsv(rgb: [u8; 3]) -> (f32, f32, f32) {
    let [r, g, b] = rgb.map(|c| c as f32 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match sector as i32 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    [r, g, b].map(|c| (c * 255.0).round().clamp(0.0, 255.0) as u8)
}

/// Luma (0.299, 0.587, 0.114) replicated over three channels
pub fn to_grayscale(frame: &RgbImage) -> RgbImage {
    let mut out = frame.clone();
    for pixel in out.pixels_mut() {
        let [r, g, b] = pixel.0.map(f32::from);
        let luma = (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8;
        pixel.0 = [luma; 3];
    }
    out
}

/// 2x3 affine matrix mapping source to destination coordinates
type Affine = [[f32; 3]; 2];

/// Inverse-map every destination pixel and sample bilinearly, zero outside
fn warp_affine(frame: &RgbImage, matrix: &Affine) -> Result<RgbImage> {
    let [[a, b, c], [d, e, f]] = *matrix;
    let det = a * e - b * d;
    if det.abs() < f32::EPSILON {
        return Err(AnomalyError::config("affine transform is not invertible"));
    }
    let (ia, ib, id, ie) = (e / det, -b / det, -d / det, a / det);

    let (w, h) = frame.dimensions();
    Ok(RgbImage::from_fn(w, h, |x, y| {
        let dx = x as f32 - c;
        let dy = y as f32 - f;
        let sx = ia * dx + ib * dy;
        let sy = id * dx + ie * dy;
        bilinear(frame, sx, sy)
    }))
}

fn bilinear(frame: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = frame.dimensions();
    let x0 = x.floor();
    let y0 = y.floor();
    let (fx, fy) = (x - x0, y - y0);

    let fetch = |xi: f32, yi: f32| -> [f32; 3] {
        if xi < 0.0 || yi < 0.0 || xi >= w as f32 || yi >= h as f32 {
            [0.0; 3]
        } else {
            frame.get_pixel(xi as u32, yi as u32).0.map(f32::from)
        }
    };

    let p00 = fetch(x0, y0);
    let p10 = fetch(x0 + 1.0, y0);
    let p01 = fetch(x0, y0 + 1.0);
    let p11 = fetch(x0 + 1.0, y0 + 1.0);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Rotate counter-clockwise by `degrees` about the frame center, same size
pub fn rotate(frame: &RgbImage, degrees: f32) -> Result<RgbImage> {
    let (w, h) = frame.dimensions();
    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
    let (sin, cos) = degrees.to_radians().sin_cos();
    let matrix = [
        [cos, sin, (1.0 - cos) * cx - sin * cy],
        [-sin, cos, sin * cx + (1.0 - cos) * cy],
    ];
    warp_affine(frame, &matrix)
}

/// Rotation, scale and shear about the center followed by a translation
pub fn affine(frame: &RgbImage, degrees: f32, translate: (f32, f32), scale: f32, shear: f32) -> Result<RgbImage> {
    if scale <= 0.0 {
        return Err(AnomalyError::config("affine scale must be positive"));
    }
    let (w, h) = frame.dimensions();
    let (cx, cy) = (w as f32 * 0.5 + 0.5, h as f32 * 0.5 + 0.5);
    let angle = degrees.to_radians();
    let shear = shear.to_radians();

    let (a, b) = (angle.cos() * scale, -(angle + shear).sin() * scale);
    let (d, e) = (angle.sin() * scale, (angle + shear).cos() * scale);
    // T * C * RSS * C^-1
    let matrix = [
        [a, b, translate.0 + cx - a * cx - b * cy],
        [d, e, translate.1 + cy - d * cx - e * cy],
    ];
    warp_affine(frame, &matrix)
}

/// Brightness, contrast, saturation and hue jitter in a random order
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorJitter {
    pub brightness: Option<(f32, f32)>,
    pub contrast: Option<(f32, f32)>,
    pub saturation: Option<(f32, f32)>,
    pub hue: Option<(f32, f32)>,
}

#[derive(Debug, Clone, Copy)]
enum ColorOp {
    Brightness(f32),
    Contrast(f32),
    Saturation(f32),
    Hue(f32),
}

impl ColorJitter {
    /// Symmetric jitter strengths; factors are sampled from `1 ± v` (hue `± v`)
    pub fn new(brightness: f32, contrast: f32, saturation: f32, hue: f32) -> Result<Self> {
        let around_one = |name: &str, v: f32| -> Result<Option<(f32, f32)>> {
            if v < 0.0 {
                return Err(AnomalyError::config(format!("{} must be non negative", name)));
            }
            Ok((v > 0.0).then(|| ((1.0 - v).max(0.0), 1.0 + v)))
        };
        if !(0.0..=0.5).contains(&hue) {
            return Err(AnomalyError::config("hue jitter must lie in [0, 0.5]"));
        }
        Ok(Self {
            brightness: around_one("brightness", brightness)?,
            contrast: around_one("contrast", contrast)?,
            saturation: around_one("saturation", saturation)?,
            hue: (hue > 0.0).then_some((-hue, hue)),
        })
    }

    fn sample_ops(&self, rng: &mut dyn RngCore) -> Vec<ColorOp> {
        let mut ops = Vec::with_capacity(4);
        if let Some(range) = self.brightness {
            ops.push(ColorOp::Brightness(sample(rng, range)));
        }
        if let Some(range) = self.contrast {
            ops.push(ColorOp::Contrast(sample(rng, range)));
        }
        if let Some(range) = self.saturation {
            ops.push(ColorOp::Saturation(sample(rng, range)));
        }
        if let Some(range) = self.hue {
            ops.push(ColorOp::Hue(sample(rng, range)));
        }
        ops.shuffle(rng);
        ops
    }
}

impl ClipTransform for ColorJitter {
    fn apply(&self, clip: Vec<RgbImage>, rng: &mut dyn RngCore) -> Result<Vec<RgbImage>> {
        if let Some(range) = self.hue {
            check_range("hue", range, (-0.5, 0.5))?;
        }
        let ops = self.sample_ops(rng);
        clip.into_iter()
            .map(|mut frame| -> Result<RgbImage> {
                for op in &ops {
                    frame = match *op {
                        ColorOp::Brightness(f) => adjust_brightness(&frame, f),
                        ColorOp::Contrast(f) => adjust_contrast(&frame, f),
                        ColorOp::Saturation(f) => adjust_saturation(&frame, f),
                        ColorOp::Hue(f) => adjust_hue(&frame, f)?,
                    };
                }
                Ok(frame)
            })
            .collect()
    }
}

/// Rotate the clip by an angle drawn from `degrees`
#[derive(Debug, Clone, Copy)]
pub struct RandomRotation {
    pub degrees: (f32, f32),
}

impl RandomRotation {
    pub fn new(degrees: f32) -> Self {
        let d = degrees.abs();
        Self { degrees: (-d, d) }
    }
}

impl ClipTransform for RandomRotation {
    fn apply(&self, clip: Vec<RgbImage>, rng: &mut dyn RngCore) -> Result<Vec<RgbImage>> {
        let angle = sample(rng, self.degrees);
        clip.iter().map(|frame| rotate(frame, angle)).collect()
    }
}

/// Random rotation, translation (fraction of size), scale and shear
#[derive(Debug, Clone, Copy)]
pub struct RandomAffine {
    pub degrees: (f32, f32),
    pub translate: Option<(f32, f32)>,
    pub scale: Option<(f32, f32)>,
    pub shear: Option<(f32, f32)>,
}

impl RandomAffine {
    pub fn new(degrees: f32) -> Self {
        let d = degrees.abs();
        Self {
            degrees: (-d, d),
            translate: None,
            scale: None,
            shear: None,
        }
    }
}

impl ClipTransform for RandomAffine {
    fn apply(&self, clip: Vec<RgbImage>, rng: &mut dyn RngCore) -> Result<Vec<RgbImage>> {
        let (w, h) = clip_dims(&clip)?;
        let angle = sample(rng, self.degrees);
        let translate = match self.translate {
            Some((fx, fy)) => {
                let max_dx = (fx * w as f32).round();
                let max_dy = (fy * h as f32).round();
                (sample(rng, (-max_dx, max_dx)).round(), sample(rng, (-max_dy, max_dy)).round())
            }
            None => (0.0, 0.0),
        };
        let scale = self.scale.map(|r| sample(rng, r)).unwrap_or(1.0);
        let shear = self.shear.map(|r| sample(rng, r)).unwrap_or(0.0);

        clip.iter()
            .map(|frame| affine(frame, angle, translate, scale, shear))
            .collect()
    }
}

/// Convert the clip to grayscale with probability `p`
#[derive(Debug, Clone, Copy)]
pub struct RandomGrayscale {
    pub p: f64,
}

impl ClipTransform for RandomGrayscale {
    fn apply(&self, clip: Vec<RgbImage>, rng: &mut dyn RngCore) -> Result<Vec<RgbImage>> {
        if rng.gen_bool(self.p.clamp(0.0, 1.0)) {
            Ok(clip.iter().map(to_grayscale).collect())
        } else {
            Ok(clip)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn clip(n: usize) -> Vec<RgbImage> {
        (0..n)
            .map(|i| {
                RgbImage::from_fn(32, 24, |x, y| {
                    Rgb([(x * 7 + i as u32) as u8, (y * 9) as u8, ((x + y) * 3) as u8])
                })
            })
            .collect()
    }

    fn pipeline() -> Compose {
        Compose::new()
            .then(RandomResizedCrop::new(16))
            .then(RandomHorizontalFlip { p: 0.5 })
            .then(ColorJitter::new(0.4, 0.4, 0.4, 0.1).unwrap())
            .then(RandomRotation::new(10.0))
            .then(RandomGrayscale { p: 0.2 })
    }

    #[test]
    fn test_same_seed_same_clip() {
        let a = pipeline().apply(clip(4), &mut StdRng::seed_from_u64(17)).unwrap();
        let b = pipeline().apply(clip(4), &mut StdRng::seed_from_u64(17)).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|f| f.dimensions() == (16, 16)));
    }

    #[test]
    fn test_random_crop_shared_across_frames() {
        let frames = vec![clip(1).remove(0); 3];
        let out = RandomCrop::new(10, 12)
            .apply(frames, &mut StdRng::seed_from_u64(3))
            .unwrap();
        assert_eq!(out[0].dimensions(), (12, 10));
        assert_eq!(out[0], out[1]);
        assert_eq!(out[1], out[2]);

        let err = RandomCrop::new(30, 12).apply(clip(1), &mut StdRng::seed_from_u64(3));
        assert!(matches!(err, Err(AnomalyError::InvalidDimensions { .. })));
    }

    #[test]
    fn test_resized_crop_fallback_clamps_aspect() {
        // No sampled window fits: scale far above the frame area
        let transform = RandomResizedCrop::new(8).with_scale((50.0, 60.0));
        let mut rng = StdRng::seed_from_u64(0);

        // Wide frame: height kept, width clamped to 4/3 of it
        assert_eq!(transform.get_params(100, 30, &mut rng), (0, 30, 30, 40));
        // Tall frame: width kept, height clamped to 4/3 of it
        assert_eq!(transform.get_params(30, 100, &mut rng), (30, 0, 40, 30));
        // Aspect within range: whole frame
        assert_eq!(transform.get_params(40, 36, &mut rng), (0, 0, 36, 40));
    }

    #[test]
    fn test_resized_crop_window_fits() {
        let transform = RandomResizedCrop::new(8);
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..50 {
            let (top, left, h, w) = transform.get_params(64, 48, &mut rng);
            assert!(h > 0 && w > 0);
            assert!(top + h <= 48 && left + w <= 64);
        }
    }

    #[test]
    fn test_resized_crop_window_on_huge_frame() {
        // 70000 * 70000 does not fit in a u32
        let transform = RandomResizedCrop::new(8).with_scale((0.5, 0.6));
        let mut rng = StdRng::seed_from_u64(5);
        let (top, left, h, w) = transform.get_params(70_000, 70_000, &mut rng);

        assert!(top + h <= 70_000 && left + w <= 70_000);
        let fraction = (h as f64 * w as f64) / (70_000.0 * 70_000.0);
        assert!((0.45..0.65).contains(&fraction), "area fraction {}", fraction);
    }

    #[test]
    fn test_brightness_and_contrast_luts() {
        let frame = RgbImage::from_pixel(1, 1, Rgb([100, 200, 74]));
        assert_eq!(adjust_brightness(&frame, 1.5).get_pixel(0, 0), &Rgb([150, 255, 111]));
        assert_eq!(adjust_contrast(&frame, 2.0).get_pixel(0, 0), &Rgb([126, 255, 74]));
    }

    #[test]
    fn test_saturation_zero_is_gray_and_one_is_identity() {
        let frame = RgbImage::from_pixel(1, 1, Rgb([30, 60, 90]));
        assert_eq!(adjust_saturation(&frame, 0.0).get_pixel(0, 0), &Rgb([60, 60, 60]));
        assert_eq!(adjust_saturation(&frame, 1.0).get_pixel(0, 0), &Rgb([30, 60, 90]));
    }

    #[test]
    fn test_hue_bounds_and_rotation() {
        let frame = RgbImage::from_pixel(1, 1, Rgb([255, 0, 0]));
        assert!(adjust_hue(&frame, 0.6).is_err());
        assert_eq!(adjust_hue(&frame, 0.0).unwrap(), frame);
        let shifted = adjust_hue(&frame, 1.0 / 3.0).unwrap();
        assert_eq!(shifted.get_pixel(0, 0), &Rgb([0, 255, 0]));
        assert!(ColorJitter::new(0.0, 0.0, 0.0, 0.7).is_err());
    }

    #[test]
    fn test_zero_rotation_is_identity() {
        let frame = clip(1).remove(0);
        assert_eq!(rotate(&frame, 0.0).unwrap(), frame);
        assert_eq!(affine(&frame, 0.0, (0.0, 0.0), 1.0, 0.0).unwrap(), frame);
    }

    #[test]
    fn test_affine_translation_shifts_pixels() {
        let frame = clip(1).remove(0);
        let shifted = affine(&frame, 0.0, (2.0, 0.0), 1.0, 0.0).unwrap();
        assert_eq!(shifted.get_pixel(5, 3), frame.get_pixel(3, 3));
        assert_eq!(shifted.get_pixel(0, 3), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_grayscale() {
        let frame = RgbImage::from_pixel(1, 1, Rgb([255, 0, 0]));
        assert_eq!(to_grayscale(&frame).get_pixel(0, 0), &Rgb([76, 76, 76]));

        let always = RandomGrayscale { p: 1.0 };
        let out = always.apply(clip(2), &mut StdRng::seed_from_u64(1)).unwrap();
        assert!(out.iter().all(|f| f.pixels().all(|p| p[0] == p[1] && p[1] == p[2])));
    }
}
