//! Z²ₙ power computation over a frequency grid.
//!
//! For every bin `f` and harmonic `h` the engine folds the arrival times
//! into phases `φᵢ = frac(tᵢ·f)·2π·h` and sums their sines and cosines. The
//! power of the bin is `2/N · Σₕ (Sₕ² + Cₕ²)`.
//!
//! Bins are independent. Above [`EngineConfig::min_bins_for_parallel`] the
//! store is split into disjoint batches that a rayon pool fills in
//! parallel; every bin goes through the same [`z2n_power`] kernel, so
//! sequential, parallel and region runs agree bit for bit.
//!
//! # Example
//!
//! ```rust,ignore
//! use z2n::{CancelToken, FrequencyGrid, PeriodogramEngine, ResourceGuard, TimeSeries};
//!
//! let series = TimeSeries::new(times)?;
//! let grid = FrequencyGrid::from_oversample(&series, 1e-4, 1e-2, 5.0)?;
//! let engine = PeriodogramEngine::default();
//! let guard = ResourceGuard::default();
//! let spectrum = engine.periodogram(&series, &grid, &guard, &CancelToken::new())?;
//! ```

mod cancel;

pub use cancel::CancelToken;

use crate::error::{Result, Z2nError};
use crate::grid::FrequencyGrid;
use crate::resource::ResourceGuard;
use crate::series::TimeSeries;
use crate::spectrum::Spectrum;
use crate::store::BackingStore;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Default number of bins handed to a worker at a time.
pub const DEFAULT_BATCH_SIZE: usize = 4096;

/// Default spectrum length below which the engine stays on one thread.
pub const DEFAULT_MIN_BINS_FOR_PARALLEL: usize = 8192;

/// Configuration for the periodogram engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker threads. `0` uses rayon's global pool.
    pub threads: usize,
    /// Spectra shorter than this are computed sequentially.
    pub min_bins_for_parallel: usize,
    /// Bins per batch; cancellation is checked between batches.
    pub batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            min_bins_for_parallel: DEFAULT_MIN_BINS_FOR_PARALLEL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl EngineConfig {
    /// Sets the number of worker threads.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the parallelism threshold.
    pub fn with_min_bins_for_parallel(mut self, bins: usize) -> Self {
        self.min_bins_for_parallel = bins;
        self
    }

    /// Sets the batch size (clamped to at least one bin).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Computes Z²ₙ spectra.
#[derive(Debug)]
pub struct PeriodogramEngine {
    config: EngineConfig,
    pool: Option<ThreadPool>,
}

impl Default for PeriodogramEngine {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            pool: None,
        }
    }
}

impl PeriodogramEngine {
    /// Creates an engine, spawning a dedicated pool when `config.threads > 0`.
    ///
    /// # Errors
    ///
    /// Returns `Z2nError::OutOfResources` if the worker threads cannot be
    /// spawned.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let pool = if config.threads > 0 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(config.threads)
                .thread_name(|i| format!("z2n-worker-{i}"))
                .build()
                .map_err(|e| Z2nError::OutOfResources {
                    requested_bytes: 0,
                    reason: format!("spawn {} workers: {e}", config.threads),
                })?;
            Some(pool)
        } else {
            None
        };
        Ok(Self { config, pool })
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Allocates a spectrum for `grid` through `guard` and fills it.
    pub fn periodogram(
        &self,
        series: &TimeSeries,
        grid: &FrequencyGrid,
        guard: &ResourceGuard,
        cancel: &CancelToken,
    ) -> Result<Spectrum> {
        if series.is_empty() {
            return Err(Z2nError::EmptySeries);
        }
        let mut spectrum = Spectrum::allocate(grid, series, guard)?;
        self.compute(series, grid, spectrum.power_store_mut(), cancel)?;
        Ok(spectrum)
    }

    /// Writes the power of every bin of `grid` into `store`.
    ///
    /// On cancellation the bins finished so far hold valid values, a
    /// disk-backed store is flushed, and `Z2nError::Cancelled` is returned.
    ///
    /// # Errors
    ///
    /// - `Z2nError::EmptySeries` if the series has no events
    /// - `Z2nError::InvalidHarmonics` if the grid sums no harmonics
    /// - `Z2nError::IndexOutOfBounds` if `store` does not match the grid
    /// - `Z2nError::Cancelled` if `cancel` fires before the last batch
    pub fn compute(
        &self,
        series: &TimeSeries,
        grid: &FrequencyGrid,
        store: &mut BackingStore,
        cancel: &CancelToken,
    ) -> Result<()> {
        if series.is_empty() {
            return Err(Z2nError::EmptySeries);
        }
        if grid.harmonics() < 1 {
            return Err(Z2nError::InvalidHarmonics(grid.harmonics()));
        }
        let total_bins = grid.bin_count();
        if store.len() != total_bins {
            return Err(Z2nError::IndexOutOfBounds {
                lo: 0,
                hi: total_bins,
                len: store.len(),
            });
        }

        let kernel = Kernel {
            times: series.times(),
            grid,
            normalization: series.normalization()?,
        };
        let started = Instant::now();
        debug!(
            "Computing {} bins over [{}, {}) with {} harmonics from {} events",
            total_bins,
            grid.fmin(),
            grid.fmax(),
            grid.harmonics(),
            series.len()
        );

        let completed_bins = self.fill(&kernel, store.as_mut_slice(), cancel);
        if completed_bins < total_bins {
            if let Err(e) = store.flush() {
                warn!("Failed to flush cancelled spectrum: {:?}", e);
            }
            warn!(
                "Periodogram cancelled after {}/{} bins",
                completed_bins, total_bins
            );
            return Err(Z2nError::Cancelled {
                completed_bins,
                total_bins,
            });
        }

        info!(
            "Computed {} bins in {:?} ({})",
            total_bins,
            started.elapsed(),
            if store.is_disk_backed() {
                "disk-backed"
            } else {
                "in memory"
            }
        );
        Ok(())
    }

    /// Fills `out` batch by batch, returning the number of bins written.
    fn fill(&self, kernel: &Kernel<'_>, out: &mut [f64], cancel: &CancelToken) -> usize {
        let batch_size = self.config.batch_size.max(1);
        let harmonics = kernel.grid.harmonics() as usize;
        let completed = AtomicUsize::new(0);

        let run_batch = |sums: &mut Vec<(f64, f64)>, index: usize, chunk: &mut [f64]| {
            if cancel.is_cancelled() {
                return Err(());
            }
            kernel.fill(index * batch_size, chunk, sums);
            completed.fetch_add(chunk.len(), Ordering::Relaxed);
            Ok(())
        };

        let sequential = out.len() < self.config.min_bins_for_parallel;
        // Err(()) only signals a stop at the cancel token
        let outcome: std::result::Result<(), ()> = if sequential {
            let mut sums = vec![(0.0, 0.0); harmonics];
            out.chunks_mut(batch_size)
                .enumerate()
                .try_for_each(|(index, chunk)| run_batch(&mut sums, index, chunk))
        } else {
            let mut parallel = || {
                out.par_chunks_mut(batch_size)
                    .enumerate()
                    .try_for_each_init(
                        || vec![(0.0, 0.0); harmonics],
                        |sums, (index, chunk)| run_batch(sums, index, chunk),
                    )
            };
            match &self.pool {
                Some(pool) => pool.install(parallel),
                None => parallel(),
            }
        };

        let completed_bins = completed.load(Ordering::Relaxed);
        if outcome.is_err() {
            debug!(
                "Cancel token tripped, stopping batches at {} bins",
                completed_bins
            );
        }
        completed_bins
    }
}

/// Everything a worker needs to evaluate bins.
struct Kernel<'a> {
    times: &'a [f64],
    grid: &'a FrequencyGrid,
    normalization: f64,
}

impl Kernel<'_> {
    fn fill(&self, offset: usize, chunk: &mut [f64], sums: &mut [(f64, f64)]) {
        for (i, slot) in chunk.iter_mut().enumerate() {
            let frequency = self.grid.frequency_at(offset + i);
            *slot = harmonic_sum(self.times, frequency, sums) * self.normalization;
        }
    }
}

/// Z²ₙ power of a single frequency.
///
/// `normalization` is `2/N` for `N` events; it is passed in so callers
/// computing many bins pay for it once.
pub fn z2n_power(times: &[f64], frequency: f64, harmonics: u32, normalization: f64) -> f64 {
    let mut sums = vec![(0.0, 0.0); harmonics as usize];
    harmonic_sum(times, frequency, &mut sums) * normalization
}

/// Unoptimized Z²ₙ power, evaluated harmonic by harmonic straight from the
/// definition. Used to cross-check [`z2n_power`].
pub fn z2n_power_reference(
    times: &[f64],
    frequency: f64,
    harmonics: u32,
    normalization: f64,
) -> f64 {
    let mut total = 0.0;
    for h in 1..=harmonics {
        let mut sin_sum = 0.0;
        let mut cos_sum = 0.0;
        for &t in times {
            let phase = t * frequency;
            let phi = (phase - phase.floor()) * TAU * h as f64;
            sin_sum += phi.sin();
            cos_sum += phi.cos();
        }
        total += sin_sum * sin_sum + cos_sum * cos_sum;
    }
    total * normalization
}

/// `Σₕ (Sₕ² + Cₕ²)` with one pass over the events; `sums` holds one
/// accumulator pair per harmonic.
#[inline]
fn harmonic_sum(times: &[f64], frequency: f64, sums: &mut [(f64, f64)]) -> f64 {
    sums.fill((0.0, 0.0));
    for &t in times {
        let phase = t * frequency;
        let base = (phase - phase.floor()) * TAU;
        for (h, (sin_sum, cos_sum)) in sums.iter_mut().enumerate() {
            let (sin, cos) = (base * (h + 1) as f64).sin_cos();
            *sin_sum += sin;
            *cos_sum += cos;
        }
    }
    sums.iter().map(|(s, c)| s * s + c * c).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> TimeSeries {
        TimeSeries::new(vec![
            1.90508838e8,
            1.90508838e8,
            1.90508839e8,
            1.90508840e8,
            1.90508840e8,
            1.90508841e8,
            1.90508842e8,
            1.90508842e8,
            1.90508843e8,
            1.90508844e8,
        ])
        .unwrap()
    }

    #[test]
    fn test_fixture_power() {
        let series = fixture();
        let norm = series.normalization().unwrap();
        let power = z2n_power(series.times(), 0.0007, 1, norm);
        assert!((power - 19.998526).abs() < 1e-5, "power = {power}");
    }

    #[test]
    fn test_coherent_events_reach_maximum() {
        // every event at the same phase: S² + C² = N² per harmonic
        let times: Vec<f64> = (0..8).map(|i| i as f64 * 10.0).collect();
        let power = z2n_power(&times, 0.1, 2, 2.0 / 8.0);
        assert!((power - 32.0).abs() < 1e-9);
    }

    #[test]
    fn test_kernel_matches_reference() {
        let series = fixture();
        let norm = series.normalization().unwrap();
        for harmonics in 1..=4 {
            for f in [0.0001, 0.0007, 0.013, 0.5] {
                let fast = z2n_power(series.times(), f, harmonics, norm);
                let slow = z2n_power_reference(series.times(), f, harmonics, norm);
                assert!((fast - slow).abs() <= 1e-9 * slow.abs().max(1.0));
            }
        }
    }

    #[test]
    fn test_compute_validates_inputs() {
        let series = fixture();
        let grid = FrequencyGrid::build(0.0001, 0.001, 0.0001).unwrap();
        let engine = PeriodogramEngine::default();
        let cancel = CancelToken::new();

        let mut wrong = BackingStore::in_memory(grid.bin_count() + 1).unwrap();
        let err = engine
            .compute(&series, &grid, &mut wrong, &cancel)
            .unwrap_err();
        assert!(matches!(err, Z2nError::IndexOutOfBounds { .. }));

        let empty = TimeSeries::new(Vec::new()).unwrap();
        let mut store = BackingStore::in_memory(grid.bin_count()).unwrap();
        let err = engine
            .compute(&empty, &grid, &mut store, &cancel)
            .unwrap_err();
        assert!(matches!(err, Z2nError::EmptySeries));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let series = fixture();
        let grid = FrequencyGrid::build(0.0001, 0.01, 0.00001).unwrap();
        let cancel = CancelToken::new();

        let sequential = PeriodogramEngine::new(
            EngineConfig::default().with_min_bins_for_parallel(usize::MAX),
        )
        .unwrap();
        let parallel = PeriodogramEngine::new(
            EngineConfig::default()
                .with_threads(3)
                .with_min_bins_for_parallel(0)
                .with_batch_size(37),
        )
        .unwrap();

        let mut a = BackingStore::in_memory(grid.bin_count()).unwrap();
        let mut b = BackingStore::in_memory(grid.bin_count()).unwrap();
        sequential.compute(&series, &grid, &mut a, &cancel).unwrap();
        parallel.compute(&series, &grid, &mut b, &cancel).unwrap();

        let a = a.to_vec();
        let b = b.to_vec();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn test_cancel_before_compute() {
        let series = fixture();
        let grid = FrequencyGrid::build(0.0001, 0.001, 0.0001).unwrap();
        let mut store = BackingStore::in_memory(grid.bin_count()).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = PeriodogramEngine::default()
            .compute(&series, &grid, &mut store, &cancel)
            .unwrap_err();
        match err {
            Z2nError::Cancelled {
                completed_bins,
                total_bins,
            } => {
                assert_eq!(completed_bins, 0);
                assert_eq!(total_bins, grid.bin_count());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
