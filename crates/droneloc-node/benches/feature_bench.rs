//! Benchmarks for the per-node feature pipeline.
//!
//! Run with: cargo bench --package droneloc-node

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array2;

use droneloc_core::config::{DetectionConfig, SamplingConfig};
use droneloc_core::MicArrayGeometry;
use droneloc_node::features::goertzel;
use droneloc_node::{DirectionEstimator, FeatureExtractor, SampleSource, SimulatedSampler};

fn bench_extractor(c: &mut Criterion) {
    let mut group = c.benchmark_group("feature_extractor");
    for block_samples in [86usize, 128, 860] {
        let mut sampler = SimulatedSampler::with_seed(860, 4, 0.02, 1).expect("sampler");
        let block = sampler.read_block(block_samples).expect("block");
        let mut fx = FeatureExtractor::new(
            1,
            MicArrayGeometry::tetrahedron(),
            &SamplingConfig::default(),
            &DetectionConfig::default(),
            vec![0.05; 4],
        );
        group.throughput(Throughput::Elements(block_samples as u64));
        group.bench_with_input(BenchmarkId::from_parameter(block_samples), &block, |b, block| {
            b.iter(|| black_box(fx.push(block.view(), Utc::now())));
        });
    }
    group.finish();
}

fn bench_goertzel(c: &mut Criterion) {
    let window: Array2<f32> = Array2::from_shape_fn((1, 1376), |(_, i)| (i as f32 * 0.877).sin());
    c.bench_function("goertzel_1376", |b| {
        b.iter(|| black_box(goertzel(window.row(0), black_box(120.0), 860.0)));
    });
}

fn bench_direction(c: &mut Criterion) {
    let est = DirectionEstimator::new(MicArrayGeometry::tetrahedron());
    let weights = [0.4, 0.1, 0.05, 0.2];
    c.bench_function("direction_estimate", |b| {
        b.iter(|| black_box(est.estimate(black_box(&weights))));
    });
}

criterion_group!(benches, bench_extractor, bench_goertzel, bench_direction);
criterion_main!(benches);
