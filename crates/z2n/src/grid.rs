//! Frequency axis of a periodogram.
//!
//! Bins form the right-open sequence `fmin, fmin + delta, ... < fmax`, so a
//! grid holds `ceil((fmax - fmin) / delta)` bins. Bin `i` is always computed
//! as `fmin + i * delta` so two grids with the same `fmin` and `delta`
//! produce bit-identical frequencies.

use crate::error::{Result, Z2nError};
use crate::series::TimeSeries;

/// Default number of harmonics summed into the statistic.
pub const DEFAULT_HARMONICS: u32 = 1;

/// Upper bound multiplier on the sampling rate for the default search grid.
pub const DEFAULT_SEARCH_SPAN: f64 = 100.0;

/// Largest bin count a grid may describe; bin indices stay exact as `f64`.
pub const MAX_BIN_COUNT: f64 = 9_007_199_254_740_992.0;

/// Bound on the correction applied to the rounded bin count.
const MAX_ROUNDING_STEPS: usize = 64;

/// Immutable description of the frequency axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyGrid {
    fmin: f64,
    fmax: f64,
    delta: f64,
    harmonics: u32,
    oversample: Option<f64>,
}

impl FrequencyGrid {
    /// Builds a grid over `[fmin, fmax)` with step `delta`.
    ///
    /// # Errors
    ///
    /// Returns `Z2nError::InvalidRange` if `fmax <= fmin`, `delta <= 0`, any
    /// bound is not finite, `delta` is below the float resolution at either
    /// end of the range, or the range holds more than [`MAX_BIN_COUNT`] bins.
    pub fn build(fmin: f64, fmax: f64, delta: f64) -> Result<Self> {
        let finite = fmin.is_finite() && fmax.is_finite() && delta.is_finite();
        if !finite || fmax <= fmin || delta <= 0.0 {
            return Err(Z2nError::InvalidRange { fmin, fmax, delta });
        }
        let resolvable = fmin + delta != fmin && fmax - delta != fmax;
        let quotient = (fmax - fmin) / delta;
        let max_bins = MAX_BIN_COUNT.min(usize::MAX as f64);
        if !resolvable || !quotient.is_finite() || quotient > max_bins {
            return Err(Z2nError::InvalidRange { fmin, fmax, delta });
        }
        Ok(Self {
            fmin,
            fmax,
            delta,
            harmonics: DEFAULT_HARMONICS,
            oversample: None,
        })
    }

    /// Builds a grid whose step is derived from the natural resolution
    /// `1 / exposure`: `delta = 1 / (oversample * exposure)`.
    ///
    /// # Errors
    ///
    /// Returns `Z2nError::InvalidOversample` if `oversample <= 0`, and
    /// `Z2nError::InvalidRange` if the derived step or the range is unusable
    /// (for example a zero-exposure series).
    pub fn from_oversample(
        series: &TimeSeries,
        fmin: f64,
        fmax: f64,
        oversample: f64,
    ) -> Result<Self> {
        if !oversample.is_finite() || oversample <= 0.0 {
            return Err(Z2nError::InvalidOversample(oversample));
        }
        let delta = 1.0 / (oversample * series.exposure());
        let mut grid = Self::build(fmin, fmax, delta)?;
        grid.oversample = Some(oversample);
        Ok(grid)
    }

    /// Twice the sampling rate of the series, used as a default `fmin`.
    pub fn nyquist(series: &TimeSeries) -> f64 {
        2.0 * series.sampling()
    }

    /// Default search grid: `[nyquist, 100 * sampling)` at the given
    /// oversampling factor.
    pub fn search_default(series: &TimeSeries, oversample: f64) -> Result<Self> {
        let fmin = Self::nyquist(series);
        let fmax = DEFAULT_SEARCH_SPAN * series.sampling();
        Self::from_oversample(series, fmin, fmax, oversample)
    }

    /// Returns a copy of this grid summing `harmonics` harmonics.
    ///
    /// # Errors
    ///
    /// Returns `Z2nError::InvalidHarmonics` if `harmonics < 1`.
    pub fn with_harmonics(mut self, harmonics: u32) -> Result<Self> {
        if harmonics < 1 {
            return Err(Z2nError::InvalidHarmonics(harmonics));
        }
        self.harmonics = harmonics;
        Ok(self)
    }

    /// Lower frequency bound (Hz).
    pub fn fmin(&self) -> f64 {
        self.fmin
    }

    /// Upper frequency bound (Hz, exclusive).
    pub fn fmax(&self) -> f64 {
        self.fmax
    }

    /// Frequency step (Hz).
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Number of harmonics summed per bin.
    pub fn harmonics(&self) -> u32 {
        self.harmonics
    }

    /// Oversampling factor the step was derived from, if any.
    pub fn oversample(&self) -> Option<f64> {
        self.oversample
    }

    /// Number of bins in `[fmin, fmax)`.
    pub fn bin_count(&self) -> usize {
        let raw = ((self.fmax - self.fmin) / self.delta).ceil();
        let mut count = raw as usize;
        // the quotient is inexact; settle on the last bin strictly below fmax
        for _ in 0..MAX_ROUNDING_STEPS {
            if count == 0 || self.frequency_at(count - 1) < self.fmax {
                break;
            }
            count -= 1;
        }
        for _ in 0..MAX_ROUNDING_STEPS {
            if self.frequency_at(count) >= self.fmax {
                break;
            }
            count = count.saturating_add(1);
        }
        count
    }

    /// Frequency of bin `index`.
    #[inline]
    pub fn frequency_at(&self, index: usize) -> f64 {
        self.fmin + index as f64 * self.delta
    }

    /// Iterates over all bin frequencies in ascending order.
    pub fn frequencies(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.bin_count()).map(move |i| self.frequency_at(i))
    }
}
