//! Benchmarks for coreset selection and flat search.
//!
//! These are the two loops that dominate a run: selection is O(n*k) over
//! the projected bank at train time, and every test patch pays one
//! brute-force scan at score time.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use patchfind::coreset::select_coreset;
use patchfind::projection::SparseRandomProjection;
use patchfind::FlatL2Index;

fn random_bank(n: usize, dim: usize) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect())
        .collect()
}

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("coreset_selection");
    for &n in &[1_000usize, 4_000] {
        let bank = random_bank(n, 64);
        let k = n / 100;
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &bank, |b, bank| {
            b.iter(|| select_coreset(black_box(bank), k, 0).unwrap());
        });
    }
    group.finish();
}

fn bench_projection(c: &mut Criterion) {
    let bank = random_bank(2_000, 512);
    let proj = SparseRandomProjection::fit(bank.len(), 512, 0.9, 42).unwrap();
    c.bench_function("sparse_projection_transform_all", |b| {
        b.iter(|| proj.transform_all(black_box(&bank)).unwrap());
    });
}

fn bench_flat_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("flat_search");
    for &n in &[1_000usize, 10_000] {
        let bank = random_bank(n, 128);
        let mut index = FlatL2Index::new(128).unwrap();
        for v in &bank {
            index.add(v).unwrap();
        }
        let query = random_bank(1, 128).remove(0);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &index, |b, index| {
            b.iter(|| index.search(black_box(&query), 9).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_selection, bench_projection, bench_flat_search);
criterion_main!(benches);
