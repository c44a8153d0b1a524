//! Peak detection and derived quantities.

use crate::error::{Result, Z2nError};
use crate::region::DEFAULT_TOLERANCE;
use crate::series::TimeSeries;
use crate::spectrum::Spectrum;
use tracing::debug;

/// Strongest bin of a spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakEstimate {
    /// Index of the peak bin.
    pub index: usize,
    /// Frequency of the peak (Hz).
    pub frequency: f64,
    /// `1 / frequency` (s).
    pub period: f64,
    /// Z²ₙ power at the peak.
    pub power: f64,
    /// `sqrt(2 * power / N)`.
    pub pulsed_fraction: f64,
    /// Spectrum generation the estimate was taken from.
    pub generation: u64,
}

impl PeakEstimate {
    /// Returns true if `spectrum` has not changed since the estimate was taken.
    pub fn is_current(&self, spectrum: &Spectrum) -> bool {
        self.generation == spectrum.generation()
    }

    /// Peak power above the noise floor.
    pub fn bandwidth(&self, noise_floor: f64) -> f64 {
        self.power - noise_floor
    }
}

/// Finds the bin of maximum power.
///
/// Equal maxima resolve to the lowest index. NaN power values are skipped.
///
/// # Errors
///
/// - `Z2nError::EmptySpectrum` if the spectrum has no non-NaN power value
/// - `Z2nError::EmptySeries` if `series` has no events
pub fn analyze(spectrum: &Spectrum, series: &TimeSeries) -> Result<PeakEstimate> {
    let power = spectrum.power();
    let mut best: Option<(usize, f64)> = None;
    for (index, &value) in power.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, max)) if value <= max => {}
            _ => best = Some((index, value)),
        }
    }
    let (index, power) = best.ok_or(Z2nError::EmptySpectrum)?;
    if series.is_empty() {
        return Err(Z2nError::EmptySeries);
    }

    let frequency = spectrum.bins()[index];
    let estimate = PeakEstimate {
        index,
        frequency,
        period: 1.0 / frequency,
        power,
        pulsed_fraction: (2.0 * power / series.len() as f64).sqrt(),
        generation: spectrum.generation(),
    };
    debug!(
        "Peak at bin {} ({} Hz) with power {}",
        index, frequency, power
    );
    Ok(estimate)
}

/// Mean of the per-window mean power over `regions`, the noise floor
/// ("forest") a peak is compared against.
///
/// # Errors
///
/// - `Z2nError::EmptyRegion` if `regions` is empty
/// - `Z2nError::RegionNotFound` if a window holds no bins
pub fn noise_floor(spectrum: &Spectrum, regions: &[(f64, f64)]) -> Result<f64> {
    if regions.is_empty() {
        return Err(Z2nError::EmptyRegion { lo: 0, hi: 0 });
    }
    let power = spectrum.power();
    let mut total = 0.0;
    for &(lo_freq, hi_freq) in regions {
        let (lo, hi) = spectrum.locate(lo_freq, hi_freq, DEFAULT_TOLERANCE)?;
        let window = &power[lo..hi];
        total += window.iter().sum::<f64>() / window.len() as f64;
    }
    Ok(total / regions.len() as f64)
}
