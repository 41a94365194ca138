//! Benchmarks for the localization solve.
//!
//! Run with: cargo bench --package droneloc-server

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use droneloc_core::config::{GridBounds, SolverConfig};
use droneloc_core::geometry::Vec3;
use droneloc_server::localization::{coarse_search, nelder_mead, predicted_intensity, ErrorModel, Observation, SearchBox};

fn observations() -> Vec<Observation> {
    let target = Vec3::new(10.3, 9.6, 5.2);
    let nodes = [
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(20.0, 0.0, 1.0),
        Vec3::new(0.0, 20.0, 1.0),
        Vec3::new(20.0, 20.0, 1.0),
    ];
    let raw: Vec<f64> = nodes.iter().map(|n| predicted_intensity(&target, n, 0.5)).collect();
    let total: f64 = raw.iter().sum();
    nodes
        .iter()
        .zip(raw)
        .enumerate()
        .map(|(i, (n, p))| Observation {
            node_id: i as u32 + 1,
            position: *n,
            share: p / total,
            direction: (target - *n).normalized(),
        })
        .collect()
}

fn bench_coarse(c: &mut Criterion) {
    let obs = observations();
    let model = ErrorModel::new(&obs, 0.5, 0.3);
    let bounds = GridBounds::default();
    let mut group = c.benchmark_group("coarse_search");
    group.sample_size(20);
    for step in [2.0f64, 1.0, 0.5] {
        group.bench_with_input(BenchmarkId::from_parameter(step), &step, |b, &step| {
            b.iter(|| black_box(coarse_search(&model, &bounds, step)));
        });
    }
    group.finish();
}

fn bench_refine(c: &mut Criterion) {
    let obs = observations();
    let model = ErrorModel::new(&obs, 0.5, 0.3);
    let solver = SolverConfig::default();
    let coarse = coarse_search(&model, &solver.bounds, solver.step);
    let cell = SearchBox::cell(coarse.point, solver.step, solver.bounds.min(), solver.bounds.max());
    c.bench_function("nelder_mead_200", |b| {
        b.iter(|| black_box(nelder_mead(&model, coarse, &cell, solver.step, 200)));
    });
}

criterion_group!(benches, bench_coarse, bench_refine);
criterion_main!(benches);
