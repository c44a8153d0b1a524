//! Error and Result types for Z2n periodogram operations.

use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// A convenience `Result` type for Z2n operations.
pub type Result<T> = std::result::Result<T, Z2nError>;

/// Boxed source error from an external collaborator (loader, writer).
pub type BoxedSource = Box<dyn StdError + Send + Sync + 'static>;

/// The error type for periodogram operations.
#[derive(Debug, Error)]
pub enum Z2nError {
    /// Frequency range or step is not usable.
    #[error("Invalid frequency range: fmin={fmin}, fmax={fmax}, delta={delta} (need fmax > fmin and a resolvable delta > 0)")]
    InvalidRange {
        /// Lower frequency bound (Hz).
        fmin: f64,
        /// Upper frequency bound (Hz, exclusive).
        fmax: f64,
        /// Frequency step (Hz).
        delta: f64,
    },

    /// Oversampling factor must be strictly positive.
    #[error("Invalid oversample factor: {0} (must be > 0)")]
    InvalidOversample(f64),

    /// Harmonic count must be at least one.
    #[error("Invalid number of harmonics: {0} (must be >= 1)")]
    InvalidHarmonics(u32),

    /// The time series holds no events.
    #[error("Time series is empty, load events before computing")]
    EmptySeries,

    /// The spectrum holds no power values.
    #[error("Spectrum is empty, compute the periodogram first")]
    EmptySpectrum,

    /// Neither memory nor scratch disk could hold the requested buffer.
    #[error("Out of resources allocating {requested_bytes} bytes: {reason}")]
    OutOfResources {
        /// Bytes the allocation asked for.
        requested_bytes: u64,
        /// What failed.
        reason: String,
    },

    /// Index or range outside the store bounds.
    #[error("Index out of bounds: [{lo}, {hi}) not within store of length {len}")]
    IndexOutOfBounds {
        /// Start of the requested range (inclusive).
        lo: usize,
        /// End of the requested range (exclusive).
        hi: usize,
        /// Current length of the store.
        len: usize,
    },

    /// The requested frequency region does not intersect the spectrum.
    #[error("Region [{lo_freq}, {hi_freq}) Hz not found in spectrum")]
    RegionNotFound {
        /// Lower bound of the region (Hz).
        lo_freq: f64,
        /// Upper bound of the region (Hz, exclusive).
        hi_freq: f64,
    },

    /// The peak-shape fit did not converge.
    #[error("Fit did not converge after {iterations} iterations, try another region or model")]
    FitDidNotConverge {
        /// Iterations performed before giving up.
        iterations: usize,
    },

    /// The selected index region holds no samples.
    #[error("Empty region: [{lo}, {hi})")]
    EmptyRegion {
        /// Start index (inclusive).
        lo: usize,
        /// End index (exclusive).
        hi: usize,
    },

    /// The external series loader failed.
    #[error("Failed to load time series: {0}")]
    SeriesLoad(#[source] BoxedSource),

    /// The external spectrum writer failed.
    #[error("Failed to write spectrum: {0}")]
    SpectrumWrite(#[source] BoxedSource),

    /// The computation was cancelled cooperatively.
    #[error("Computation cancelled after {completed_bins} of {total_bins} bins")]
    Cancelled {
        /// Bins already written when cancellation was observed.
        completed_bins: usize,
        /// Bins the computation was asked to produce.
        total_bins: usize,
    },

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl Z2nError {
    /// Wraps an arbitrary loader error as [`Z2nError::SeriesLoad`].
    pub fn series_load<E>(err: E) -> Self
    where
        E: Into<BoxedSource>,
    {
        Self::SeriesLoad(err.into())
    }

    /// Wraps an arbitrary writer error as [`Z2nError::SpectrumWrite`].
    pub fn spectrum_write<E>(err: E) -> Self
    where
        E: Into<BoxedSource>,
    {
        Self::SpectrumWrite(err.into())
    }

    /// Returns true for errors that signal caller misuse.
    ///
    /// These are raised at the call boundary and never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidRange { .. }
                | Self::InvalidOversample(_)
                | Self::InvalidHarmonics(_)
                | Self::EmptySeries
                | Self::EmptySpectrum
                | Self::IndexOutOfBounds { .. }
                | Self::EmptyRegion { .. }
        )
    }
}
