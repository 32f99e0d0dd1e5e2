use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use crime_detector::aggregation::DecisionPolicy;
use crime_detector::preprocessing::{ten_crop, ClipPreprocessor, MirrorAxis, Normalization, Resize};
use crime_detector::types::{Clip, SegmentScores};
use image::{Rgb, RgbImage};
use rand::Rng;
use sgattn::Backbone;

/// Create test frame with realistic content
fn create_test_frame(width: u32, height: u32, shift: u32) -> RgbImage {
    let mut image = RgbImage::new(width, height);

    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let r = (((x + shift) as f32 / width as f32) * 255.0) as u8;
        let g = ((y as f32 / height as f32) * 255.0) as u8;
        let b = ((x.wrapping_mul(y)) % 255) as u8;
        *pixel = Rgb([r, g, b]);
    }

    let mut rng = rand::thread_rng();
    for _ in 0..(width * height / 100) {
        let x = rng.gen_range(0..width);
        let y = rng.gen_range(0..height);
        image.put_pixel(x, y, Rgb([rng.gen(), rng.gen(), rng.gen()]));
    }

    image
}

fn create_test_clip(length: usize, width: u32, height: u32) -> Clip {
    let frames = (0..length as u32)
        .map(|i| create_test_frame(width, height, i))
        .collect();
    Clip::new(0, frames).unwrap()
}

fn bench_clip_preprocessor(c: &mut Criterion) {
    let mut group = c.benchmark_group("clip_preprocessor");
    group.sample_size(20);

    let clip = create_test_clip(16, 320, 240);
    group.throughput(Throughput::Elements(clip.len() as u64));

    for backbone in [Backbone::C3D, Backbone::I3D] {
        for oversample in [false, true] {
            let preprocessor = ClipPreprocessor::new(
                backbone.crop_size(),
                Resize::ShortestSide(backbone.resize()),
                Normalization::for_backbone(backbone),
            )
            .with_oversampling(oversample);

            let id = format!("{:?}/{}", backbone, if oversample { "ten_crop" } else { "center" });
            group.bench_with_input(BenchmarkId::new("prepare", id), &clip, |b, clip| {
                b.iter(|| preprocessor.prepare(black_box(clip)).unwrap())
            });
        }
    }

    group.finish();
}

fn bench_ten_crop(c: &mut Criterion) {
    let frame = create_test_frame(256, 256, 0);
    c.bench_function("ten_crop_224", |b| {
        b.iter(|| ten_crop(black_box(&frame), 224, MirrorAxis::Horizontal).unwrap())
    });
}

fn bench_decision(c: &mut Criterion) {
    let mut group = c.benchmark_group("decision");
    let policy = DecisionPolicy::default();
    let mut rng = rand::thread_rng();

    for segments in [32usize, 512] {
        let scores: Vec<SegmentScores> = (0..segments)
            .map(|i| SegmentScores::new(i, (0..10).map(|_| rng.gen_range(0.0..1.0)).collect()))
            .collect();
        group.bench_with_input(BenchmarkId::new("segments", segments), &scores, |b, scores| {
            b.iter(|| policy.decide(black_box(scores)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_clip_preprocessor, bench_ten_crop, bench_decision);
criterion_main!(benches);
