//! Benchmarks for the Z2n periodogram engine.
//!
//! Run with: cargo bench --package z2n
//!
//! ## Benchmark Categories
//!
//! - **Kernel**: single-bin power for growing event counts and harmonics
//! - **Engine**: full spectra, sequential against parallel
//! - **Region**: refining a window of an existing spectrum
//! - **Store**: splices in memory and in a mapped scratch file

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;
use z2n::{
    z2n_power, BackingStore, CancelToken, EngineConfig, FrequencyGrid, PeriodogramEngine,
    RegionRecompute, ResourceConfig, ResourceGuard, TimeSeries,
};

/// Pulsed arrival times: one event per 10 s period with a small jitter.
fn generate_events(count: usize) -> TimeSeries {
    let times = (0..count as u64)
        .map(|k| k as f64 * 10.0 + ((k * 7919) % 100) as f64 / 1000.0)
        .collect();
    TimeSeries::new(times).unwrap()
}

fn in_memory() -> ResourceGuard {
    ResourceGuard::new(ResourceConfig::default().with_budget(u64::MAX))
}

fn bench_kernel(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel");

    for count in [1_000usize, 10_000, 100_000] {
        let series = generate_events(count);
        let norm = series.normalization().unwrap();
        group.throughput(Throughput::Elements(count as u64));
        for harmonics in [1u32, 4] {
            group.bench_with_input(
                BenchmarkId::new(format!("h{harmonics}"), count),
                &series,
                |b, series| {
                    b.iter(|| z2n_power(black_box(series.times()), black_box(0.1), harmonics, norm))
                },
            );
        }
    }

    group.finish();
}

fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    group.sample_size(10);

    let series = generate_events(2_000);
    let grid = FrequencyGrid::from_oversample(&series, 0.05, 0.15, 5.0).unwrap();
    let cancel = CancelToken::new();
    group.throughput(Throughput::Elements(grid.bin_count() as u64));

    let sequential =
        PeriodogramEngine::new(EngineConfig::default().with_min_bins_for_parallel(usize::MAX))
            .unwrap();
    let parallel = PeriodogramEngine::default();

    group.bench_function("sequential", |b| {
        b.iter(|| {
            sequential
                .periodogram(&series, &grid, &in_memory(), &cancel)
                .unwrap()
        })
    });
    group.bench_function("parallel", |b| {
        b.iter(|| {
            parallel
                .periodogram(&series, &grid, &in_memory(), &cancel)
                .unwrap()
        })
    });

    let temp_dir = TempDir::new().unwrap();
    let disk = ResourceGuard::new(
        ResourceConfig::default()
            .with_budget(0)
            .with_scratch_dir(temp_dir.path()),
    );
    group.bench_function("parallel_disk_backed", |b| {
        b.iter(|| parallel.periodogram(&series, &grid, &disk, &cancel).unwrap())
    });

    group.finish();
}

fn bench_region(c: &mut Criterion) {
    let series = generate_events(2_000);
    let engine = PeriodogramEngine::default();
    let cancel = CancelToken::new();
    let grid = FrequencyGrid::build(0.05, 0.15, 1e-4).unwrap();
    let spectrum = engine
        .periodogram(&series, &grid, &in_memory(), &cancel)
        .unwrap();
    let snapshot = spectrum.snapshot();
    let recompute = RegionRecompute::default();

    c.bench_function("region_refine_1k_bins", |b| {
        b.iter_batched(
            || {
                z2n::Spectrum::from_parts(
                    snapshot.bins.clone(),
                    snapshot.power.clone(),
                    1,
                    series.len(),
                )
                .unwrap()
            },
            |mut spectrum| {
                recompute
                    .recompute(&engine, &series, &mut spectrum, 0.099, 0.101, 2e-6, &cancel)
                    .unwrap()
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_store_splice(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_splice");
    let temp_dir = TempDir::new().unwrap();
    let replacement = vec![1.0; 1_000];

    for disk_backed in [false, true] {
        let name = if disk_backed { "mapped" } else { "memory" };
        group.bench_function(name, |b| {
            b.iter_batched(
                || BackingStore::allocate(1_000_000, disk_backed, temp_dir.path()).unwrap(),
                |mut store| {
                    store
                        .splice(500_000, 500_010, black_box(&replacement))
                        .unwrap();
                    store
                },
                criterion::BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_kernel,
    bench_engine,
    bench_region,
    bench_store_splice
);
criterion_main!(benches);
