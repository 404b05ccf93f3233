use criterion::{black_box, criterion_group, criterion_main, Criterion};
use marker_track_core::GrayImage;
use marker_track_detect::{
    refine_center, DetectionMethod, DetectionRequest, MarkerDetector, RefineParams,
};
use nalgebra::Point2;

fn disk_frame() -> GrayImage {
    GrayImage::from_fn(640, 480, |x, y| {
        let d = ((x as f64 - 321.3).powi(2) + (y as f64 - 238.6).powi(2)).sqrt();
        let t = (5.0 - d + 0.5).clamp(0.0, 1.0);
        (210.0 - 170.0 * t).round() as u8
    })
}

fn bench_detect(c: &mut Criterion) {
    let frame = disk_frame();
    let detector = MarkerDetector::default();
    let mut group = c.benchmark_group("detect");
    for method in [
        DetectionMethod::DarkContour,
        DetectionMethod::DarkContourRefined,
        DetectionMethod::Blob,
        DetectionMethod::Corner,
    ] {
        let request = DetectionRequest {
            center: Point2::new(319.0, 240.0),
            search_radius: 15,
            size: 5.0,
            threshold_offset: 8.0,
            method,
        };
        group.bench_function(format!("method_{}", method.code()), |b| {
            b.iter(|| detector.detect(black_box(&frame), black_box(&request)))
        });
    }
    group.finish();
}

fn bench_refine(c: &mut Criterion) {
    let frame = disk_frame();
    let params = RefineParams::default();
    c.bench_function("refine_center", |b| {
        b.iter(|| {
            refine_center(
                black_box(&frame),
                Point2::new(320.6, 239.1),
                5.5,
                true,
                &params,
            )
        })
    });
}

criterion_group!(benches, bench_detect, bench_refine);
criterion_main!(benches);
