//! Finer recomputation of a frequency window inside an existing spectrum.
//!
//! The window `[lo_freq, hi_freq)` is recomputed at a new step and spliced
//! into both stores of the spectrum, which grows or shrinks accordingly.
//! Frequencies of the new bins are `lo_freq + i * delta`, the same values a
//! fresh grid over the window would produce, so the spliced power matches a
//! from-scratch computation bit for bit.

use crate::engine::{CancelToken, PeriodogramEngine};
use crate::error::Result;
use crate::grid::FrequencyGrid;
use crate::series::TimeSeries;
use crate::spectrum::Spectrum;
use crate::store::BackingStore;
use tracing::{info, warn};

/// Default tolerance when matching window bounds to existing bins (Hz).
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

/// Configuration for region recomputation.
#[derive(Debug, Clone, Copy)]
pub struct RegionConfig {
    /// Slack applied to both window bounds when locating existing bins.
    pub tolerance: f64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl RegionConfig {
    /// Sets the bin matching tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.abs();
        self
    }
}

/// Where a recompute landed in the spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSplice {
    /// First replaced index.
    pub lo_idx: usize,
    /// One past the last replaced index, before the splice.
    pub hi_idx: usize,
    /// Number of bins inserted at `lo_idx`.
    pub inserted: usize,
}

impl RegionSplice {
    /// Index range the new bins occupy after the splice.
    pub fn new_range(&self) -> std::ops::Range<usize> {
        self.lo_idx..self.lo_idx + self.inserted
    }
}

/// Recomputes windows of a spectrum at a new resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionRecompute {
    config: RegionConfig,
}

impl RegionRecompute {
    /// Creates a recomputer with the given configuration.
    pub fn new(config: RegionConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    /// Recomputes `[lo_freq, hi_freq)` at step `delta` and splices the
    /// result into `spectrum`.
    ///
    /// The spectrum is only touched once the new values are computed. If
    /// anything fails it keeps its previous bins and power.
    ///
    /// # Errors
    ///
    /// - `Z2nError::InvalidRange` if the window or step is invalid
    /// - `Z2nError::RegionNotFound` if no existing bin lies in the window
    /// - `Z2nError::EmptySeries`, `Z2nError::Cancelled` from the engine
    /// - `Z2nError::OutOfResources` if a store cannot grow
    #[allow(clippy::too_many_arguments)]
    pub fn recompute(
        &self,
        engine: &PeriodogramEngine,
        series: &TimeSeries,
        spectrum: &mut Spectrum,
        lo_freq: f64,
        hi_freq: f64,
        delta: f64,
        cancel: &CancelToken,
    ) -> Result<RegionSplice> {
        let grid =
            FrequencyGrid::build(lo_freq, hi_freq, delta)?.with_harmonics(spectrum.harmonics())?;
        let (lo_idx, hi_idx) = spectrum.locate(lo_freq, hi_freq, self.config.tolerance)?;
        let bins: Vec<f64> = grid.frequencies().collect();
        // old bins within tolerance of the last new bin are replaced too, so
        // the spliced axis stays strictly ascending
        let hi_idx = match bins.last() {
            Some(&last) => {
                let covered = spectrum
                    .bins()
                    .partition_point(|&f| f < last + self.config.tolerance);
                hi_idx.max(covered)
            }
            None => hi_idx,
        };
        if series.len() != spectrum.event_count() {
            warn!(
                "Recomputing region from {} events, spectrum was built from {}",
                series.len(),
                spectrum.event_count()
            );
        }

        let mut power = BackingStore::in_memory(bins.len())?;
        engine.compute(series, &grid, &mut power, cancel)?;

        spectrum.splice(lo_idx, hi_idx, &bins, power.as_slice())?;
        info!(
            "Recomputed [{}, {}) at step {}: {} bins replaced by {}",
            lo_freq,
            hi_freq,
            delta,
            hi_idx - lo_idx,
            bins.len()
        );
        Ok(RegionSplice {
            lo_idx,
            hi_idx,
            inserted: bins.len(),
        })
    }
}
