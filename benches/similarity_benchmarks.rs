//! Benchmarks for crop comparison and face normalization

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use deception_detection::{
    constants::{MESH_CHIN, MESH_FOREHEAD, MESH_LEFT_EYE, MESH_NUM_LANDMARKS, MESH_RIGHT_EYE},
    alignment::{align_and_crop, CropMargins},
    landmarks::FaceLandmarks,
    similarity::structural_similarity,
};
use opencv::core::{Mat, Point2f, Scalar, CV_8UC1, CV_8UC3};
use opencv::prelude::*;

fn noisy_gray(size: i32) -> Mat {
    let mut mat = Mat::new_rows_cols_with_default(size, size, CV_8UC1, Scalar::all(0.0)).unwrap();
    for y in 0..size {
        for x in 0..size {
            *mat.at_2d_mut::<u8>(y, x).unwrap() = rand::random::<u8>();
        }
    }
    mat
}

fn benchmark_ssim(c: &mut Criterion) {
    let mut group = c.benchmark_group("structural_similarity");

    for size in [64, 128, 256] {
        let a = noisy_gray(size);
        let b = noisy_gray(size);
        group.bench_with_input(BenchmarkId::new("crop_size", size), &size, |bench, _| {
            bench.iter(|| black_box(structural_similarity(black_box(&a), black_box(&b)).unwrap()));
        });
    }

    group.finish();
}

fn benchmark_align_and_crop(c: &mut Criterion) {
    let mut group = c.benchmark_group("align_and_crop");

    let mut points = vec![Point2f::new(0.5, 0.5); MESH_NUM_LANDMARKS];
    points[MESH_LEFT_EYE] = Point2f::new(0.36, 0.42);
    points[MESH_RIGHT_EYE] = Point2f::new(0.64, 0.38);
    points[MESH_FOREHEAD] = Point2f::new(0.5, 0.2);
    points[MESH_CHIN] = Point2f::new(0.5, 0.8);
    let landmarks = FaceLandmarks::new(points).unwrap();
    let margins = CropMargins::default();

    for (width, height) in [(640, 480), (1280, 720), (1920, 1080)] {
        let frame = Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(128.0)).unwrap();
        group.bench_with_input(
            BenchmarkId::new("resolution", format!("{width}x{height}")),
            &frame,
            |bench, frame| {
                bench.iter(|| black_box(align_and_crop(black_box(frame), &landmarks, &margins, 128).unwrap()));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_ssim, benchmark_align_and_crop);
criterion_main!(benches);
