use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use tileworks_media::{DEFAULT_QUALITY, PresetTable, generate_variant};

fn source_image(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 3 % 256) as u8, ((x ^ y) % 256) as u8])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .expect("encode bench source");
    buf
}

/// One upload rendered into each storefront preset.
fn bench_presets(c: &mut Criterion) {
    let presets = PresetTable::standard();
    let upload = source_image(2600, 1800);

    let mut group = c.benchmark_group("variant_generation");
    group.sample_size(10);
    group.throughput(Throughput::Bytes(upload.len() as u64));

    for name in ["products", "collections", "details", "slides"] {
        group.bench_with_input(BenchmarkId::from_parameter(name), name, |b, name| {
            b.iter(|| {
                generate_variant(&presets, black_box(&upload), name, DEFAULT_QUALITY)
                    .expect("generate")
            });
        });
    }
    group.finish();
}

/// Sources below the target box only pay for decode + re-encode.
fn bench_small_source(c: &mut Criterion) {
    let presets = PresetTable::standard();
    let upload = source_image(320, 200);

    c.bench_function("variant_generation/no_upscale", |b| {
        b.iter(|| generate_variant(&presets, black_box(&upload), "products", DEFAULT_QUALITY))
    });
}

criterion_group!(benches, bench_presets, bench_small_source);
criterion_main!(benches);
