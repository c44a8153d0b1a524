//! Computed periodogram: frequency axis, power values and metadata.
//!
//! A spectrum owns two equal-length [`BackingStore`]s. Every mutation
//! (region splice, fit overlay) bumps [`Spectrum::generation`], which
//! derived values such as peak estimates record to detect staleness.

use crate::error::{Result, Z2nError};
use crate::grid::FrequencyGrid;
use crate::resource::ResourceGuard;
use crate::series::TimeSeries;
use crate::store::BackingStore;
use tracing::{debug, warn};

/// A Z²ₙ spectrum.
#[derive(Debug)]
pub struct Spectrum {
    bins: BackingStore,
    power: BackingStore,
    harmonics: u32,
    event_count: usize,
    normalization: f64,
    generation: u64,
}

/// In-memory copy of a spectrum at one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumSnapshot {
    /// Frequencies (Hz).
    pub bins: Vec<f64>,
    /// Power per frequency.
    pub power: Vec<f64>,
    /// Harmonics summed per bin.
    pub harmonics: u32,
    /// Generation the copy was taken at.
    pub generation: u64,
}

impl Spectrum {
    /// Allocates a spectrum for `grid` with its frequency axis filled in and
    /// all power values zero. The guard decides the backing.
    ///
    /// # Errors
    ///
    /// - `Z2nError::EmptySeries` if `series` has no events
    /// - `Z2nError::OutOfResources` if the stores cannot be allocated
    pub fn allocate(
        grid: &FrequencyGrid,
        series: &TimeSeries,
        guard: &ResourceGuard,
    ) -> Result<Self> {
        let normalization = series.normalization()?;
        let decision = guard.decide_configured(grid);
        let len = grid.bin_count();

        let power = guard.allocate(&decision, len)?;
        let mut bins = if guard.config().materialize_axis {
            guard.allocate(&decision, len)?
        } else {
            BackingStore::in_memory(len)?
        };
        for (slot, frequency) in bins.as_mut_slice().iter_mut().zip(grid.frequencies()) {
            *slot = frequency;
        }

        Ok(Self {
            bins,
            power,
            harmonics: grid.harmonics(),
            event_count: series.len(),
            normalization,
            generation: 0,
        })
    }

    /// Builds an in-memory spectrum from existing values.
    ///
    /// # Errors
    ///
    /// - `Z2nError::IndexOutOfBounds` if the lengths differ
    /// - `Z2nError::EmptySeries` if `event_count` is zero
    /// - `Z2nError::InvalidHarmonics` if `harmonics < 1`
    pub fn from_parts(
        bins: Vec<f64>,
        power: Vec<f64>,
        harmonics: u32,
        event_count: usize,
    ) -> Result<Self> {
        if bins.len() != power.len() {
            return Err(Z2nError::IndexOutOfBounds {
                lo: 0,
                hi: bins.len(),
                len: power.len(),
            });
        }
        if event_count == 0 {
            return Err(Z2nError::EmptySeries);
        }
        if harmonics < 1 {
            return Err(Z2nError::InvalidHarmonics(harmonics));
        }
        Ok(Self {
            bins: BackingStore::from_vec(bins),
            power: BackingStore::from_vec(power),
            harmonics,
            event_count,
            normalization: 2.0 / event_count as f64,
            generation: 0,
        })
    }

    /// Frequencies (Hz), ascending.
    pub fn bins(&self) -> &[f64] {
        self.bins.as_slice()
    }

    /// Power per frequency.
    pub fn power(&self) -> &[f64] {
        self.power.as_slice()
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.power.len()
    }

    /// Returns true if the spectrum holds no bins.
    pub fn is_empty(&self) -> bool {
        self.power.is_empty()
    }

    /// Harmonics summed per bin.
    pub fn harmonics(&self) -> u32 {
        self.harmonics
    }

    /// Number of events the spectrum was computed from.
    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// Normalization `2/N` applied to every bin.
    pub fn normalization(&self) -> f64 {
        self.normalization
    }

    /// Mutation counter, bumped by every change to bins or power.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true if the power values live in a memory-mapped file.
    pub fn is_disk_backed(&self) -> bool {
        self.power.is_disk_backed()
    }

    /// Copies the spectrum into memory.
    pub fn snapshot(&self) -> SpectrumSnapshot {
        SpectrumSnapshot {
            bins: self.bins.to_vec(),
            power: self.power.to_vec(),
            harmonics: self.harmonics,
            generation: self.generation,
        }
    }

    /// Index range of the bins lying in `[lo_freq - tolerance, hi_freq - tolerance)`.
    ///
    /// # Errors
    ///
    /// Returns `Z2nError::RegionNotFound` if no bin falls in the range.
    pub fn locate(&self, lo_freq: f64, hi_freq: f64, tolerance: f64) -> Result<(usize, usize)> {
        let bins = self.bins();
        let lo_idx = bins.partition_point(|&f| f < lo_freq - tolerance);
        let hi_idx = bins.partition_point(|&f| f < hi_freq - tolerance);
        if lo_idx >= hi_idx {
            return Err(Z2nError::RegionNotFound { lo_freq, hi_freq });
        }
        Ok((lo_idx, hi_idx))
    }

    /// Flushes disk-backed stores.
    pub fn flush(&self) -> Result<()> {
        self.bins.flush()?;
        self.power.flush()
    }

    pub(crate) fn power_store_mut(&mut self) -> &mut BackingStore {
        &mut self.power
    }

    /// Replaces bins and power in `[lo, hi)` with the given values.
    ///
    /// Either both stores change or neither does.
    pub(crate) fn splice(
        &mut self,
        lo: usize,
        hi: usize,
        bins: &[f64],
        power: &[f64],
    ) -> Result<()> {
        if bins.len() != power.len() {
            return Err(Z2nError::IndexOutOfBounds {
                lo: 0,
                hi: bins.len(),
                len: power.len(),
            });
        }
        let replaced_bins = self.bins.slice(lo, hi)?;
        self.bins.splice(lo, hi, bins)?;
        if let Err(err) = self.power.splice(lo, hi, power) {
            if let Err(rollback) = self.bins.splice(lo, lo + bins.len(), &replaced_bins) {
                warn!("Failed to roll back frequency splice: {:?}", rollback);
            }
            return Err(err);
        }
        self.generation += 1;
        debug!(
            "Spectrum generation {}: replaced [{}, {}) with {} bins",
            self.generation,
            lo,
            hi,
            bins.len()
        );
        Ok(())
    }

    /// Overwrites power values starting at `lo`.
    pub(crate) fn overwrite_power(&mut self, lo: usize, values: &[f64]) -> Result<()> {
        let hi = lo + values.len();
        if hi > self.len() {
            return Err(Z2nError::IndexOutOfBounds {
                lo,
                hi,
                len: self.len(),
            });
        }
        self.power.as_mut_slice()[lo..hi].copy_from_slice(values);
        self.generation += 1;
        Ok(())
    }
}
