// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the pixel operations in scanwerk-document, run on a
// synthetic 600x800 grayscale page.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{DynamicImage, GrayImage, Luma};

use scanwerk_document::ImageProcessor;

fn synthetic_page() -> DynamicImage {
    // Light background with dark horizontal "text" bands.
    let img = GrayImage::from_fn(600, 800, |x, y| {
        if (y / 12) % 3 == 0 && x > 40 && x < 560 {
            Luma([40u8])
        } else {
            Luma([230u8])
        }
    });
    DynamicImage::ImageLuma8(img)
}

fn bench_threshold(c: &mut Criterion) {
    let page = synthetic_page();
    c.bench_function("threshold (600x800)", |b| {
        b.iter(|| {
            let result = ImageProcessor::from_dynamic(black_box(page.clone())).threshold(50.0);
            black_box(result.into_dynamic());
        });
    });
}

fn bench_unsharp(c: &mut Criterion) {
    let page = synthetic_page();
    c.bench_function("unsharp (600x800)", |b| {
        b.iter(|| {
            let result =
                ImageProcessor::from_dynamic(black_box(page.clone())).unsharp(1.0, 100.0, 5);
            black_box(result.into_dynamic());
        });
    });
}

criterion_group!(benches, bench_threshold, bench_unsharp);
criterion_main!(benches);
