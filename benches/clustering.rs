use criterion::{black_box, criterion_group, criterion_main, Criterion};

use palette_transfer::rng::XorShift64;
use palette_transfer::{
    dbscan_cluster, hybrid_cluster, kmeans_cluster, resynthesize_image, Point,
};

fn synthetic_points(n: usize, seed: u64) -> Vec<Point> {
    let mut rng = XorShift64::new(seed);
    (0..n)
        .map(|_| {
            Point::new(
                rng.next_below(256) as f32,
                rng.next_below(256) as f32,
                rng.next_below(256) as f32,
            )
        })
        .collect()
}

fn synthetic_pixels(n: usize, seed: u64) -> Vec<u32> {
    let mut rng = XorShift64::new(seed);
    (0..n).map(|_| (rng.next_u64() & 0x00FF_FFFF) as u32).collect()
}

fn bench_kmeans(c: &mut Criterion) {
    let points = synthetic_points(20_000, 1);
    c.bench_function("kmeans 20k k=16", |b| {
        b.iter(|| kmeans_cluster(black_box(&points), 16, 30, 0.1, 42).unwrap())
    });
}

fn bench_dbscan(c: &mut Criterion) {
    let points = synthetic_points(20_000, 2);
    c.bench_function("dbscan 20k eps=12", |b| {
        b.iter(|| dbscan_cluster(black_box(&points), 12.0, 4).unwrap())
    });
}

fn bench_hybrid(c: &mut Criterion) {
    let points = synthetic_points(100_000, 3);
    c.bench_function("hybrid 100k k=16", |b| {
        b.iter(|| hybrid_cluster(black_box(&points), 16, 256, 12.0, 4, 50, 0.1, 42).unwrap())
    });
}

fn bench_resynthesize(c: &mut Criterion) {
    let pixels = synthetic_pixels(512 * 512, 4);
    let target = synthetic_points(64, 5);
    let source = synthetic_points(64, 6);
    c.bench_function("resynthesize 512x512 k=64", |b| {
        b.iter(|| {
            resynthesize_image(black_box(&pixels), 512, 512, &target, &source).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_kmeans,
    bench_dbscan,
    bench_hybrid,
    bench_resynthesize
);
criterion_main!(benches);
