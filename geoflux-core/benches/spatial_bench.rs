//! Spatial index benchmarks
//!
//! Compares bulk-loaded and incrementally built k-d trees on build time and
//! radius/rectangle query latency.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geoflux_core::spatial::{Bound, KdTree, SpatialPoint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_points(count: usize) -> Vec<(SpatialPoint, u32)> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count as u32)
        .filter_map(|row| {
            let coords = vec![rng.gen_range(0.0..1000.0), rng.gen_range(0.0..1000.0)];
            SpatialPoint::new(coords).map(|p| (p, row))
        })
        .collect()
}

fn incremental(points: &[(SpatialPoint, u32)]) -> KdTree {
    let mut tree = KdTree::new(2);
    for (point, row) in points {
        tree.insert(point.clone(), *row);
    }
    tree
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("kdtree_build");
    for size in [1_000, 10_000, 100_000] {
        let points = random_points(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("bulk", size), &points, |b, points| {
            b.iter(|| KdTree::bulk_load(2, black_box(points.clone())))
        });
        group.bench_with_input(BenchmarkId::new("incremental", size), &points, |b, points| {
            b.iter(|| incremental(black_box(points)))
        });
    }
    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let points = random_points(100_000);
    let bulk = KdTree::bulk_load(2, points.clone());
    let inserted = incremental(&points);

    let bounds = [
        ("radius_small", Bound::radius(vec![500.0, 500.0], 10.0)),
        ("radius_large", Bound::radius(vec![500.0, 500.0], 200.0)),
        (
            "rectangle",
            Bound::rectangular(vec![100.0, 100.0], vec![300.0, 250.0]),
        ),
        (
            "polygon",
            Bound::polygon(vec![100.0, 400.0, 250.0], vec![100.0, 150.0, 450.0]),
        ),
    ];

    let mut group = c.benchmark_group("kdtree_query");
    for (name, bound) in &bounds {
        group.bench_with_input(BenchmarkId::new("bulk", name), bound, |b, bound| {
            b.iter(|| bulk.query(black_box(bound)))
        });
        group.bench_with_input(BenchmarkId::new("incremental", name), bound, |b, bound| {
            b.iter(|| inserted.query(black_box(bound)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_query);
criterion_main!(benches);
