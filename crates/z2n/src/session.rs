//! Caller-owned analysis session.
//!
//! A [`Session`] ties one time series to its spectrum and the estimates
//! derived from it. Every operation goes through an explicit `&mut Session`;
//! there is no process-wide state. Whenever the spectrum changes, cached
//! peak and fit estimates are dropped so they are never reported stale.
//!
//! File formats and plotting stay outside the crate behind the
//! [`SeriesLoader`], [`SpectrumWriter`] and [`Renderer`] traits.
//!
//! # Example
//!
//! ```rust,ignore
//! use z2n::{FitModel, FrequencyGrid, Session, SessionConfig};
//!
//! let mut session = Session::new(SessionConfig::default())?;
//! session.load_series(&loader, Path::new("events.fits"))?;
//! let grid = FrequencyGrid::search_default(session.series()?, 5.0)?;
//! session.run(grid)?;
//! session.refine_region(peak_lo, peak_hi, 1e-7)?;
//! session.fit_around_peak(20, FitModel::Gaussian)?;
//! let summary = session.summary()?;
//! ```

use crate::analysis::{
    self, FitConfig, FitModel, PeakEstimate, UncertaintyEstimate, UncertaintyFitter,
};
use crate::engine::{CancelToken, EngineConfig, PeriodogramEngine};
use crate::error::{BoxedSource, Result, Z2nError};
use crate::grid::FrequencyGrid;
use crate::region::{RegionConfig, RegionRecompute, RegionSplice};
use crate::resource::{ResourceConfig, ResourceGuard};
use crate::series::{SeriesLoader, TimeSeries};
use crate::spectrum::Spectrum;
use std::path::Path;
use tracing::info;

/// On-disk spectrum formats a writer may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Whitespace-separated columns.
    Text,
    /// Comma-separated values.
    Csv,
    /// FITS binary table.
    Fits,
    /// HDF5 dataset.
    Hdf5,
}

/// Persists a spectrum.
pub trait SpectrumWriter {
    /// Writes `spectrum` to `path` in `format`.
    fn save(&self, spectrum: &Spectrum, path: &Path, format: OutputFormat) -> Result<()>;
}

impl<F, E> SpectrumWriter for F
where
    F: Fn(&Spectrum, &Path, OutputFormat) -> std::result::Result<(), E>,
    E: Into<BoxedSource>,
{
    fn save(&self, spectrum: &Spectrum, path: &Path, format: OutputFormat) -> Result<()> {
        self(spectrum, path, format).map_err(Z2nError::spectrum_write)
    }
}

/// Presents a spectrum and its estimates (plots, tables).
pub trait Renderer {
    /// Renders the current state. Called by the owner of the session only.
    fn render(
        &mut self,
        spectrum: &Spectrum,
        peak: Option<&PeakEstimate>,
        uncertainty: Option<&UncertaintyEstimate>,
    ) -> Result<()>;
}

/// Configuration of every component a session drives.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Engine parallelism.
    pub engine: EngineConfig,
    /// Memory budget and scratch directory.
    pub resources: ResourceConfig,
    /// Region matching tolerance.
    pub region: RegionConfig,
    /// Least-squares settings.
    pub fit: FitConfig,
}

/// Peak as found next to its fitted refinement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakSummary {
    /// Strongest bin.
    pub peak: PeakEstimate,
    /// Latest fit, if one was made on the current spectrum.
    pub fit: Option<UncertaintyEstimate>,
    /// Latest noise floor, if one was measured on the current spectrum.
    pub noise_floor: Option<f64>,
}

impl PeakSummary {
    /// Peak power above the noise floor, when the floor is known.
    pub fn bandwidth(&self) -> Option<f64> {
        self.noise_floor.map(|floor| self.peak.bandwidth(floor))
    }
}

/// One series, its spectrum, and the estimates derived from it.
#[derive(Debug)]
pub struct Session {
    engine: PeriodogramEngine,
    guard: ResourceGuard,
    region: RegionRecompute,
    fitter: UncertaintyFitter,
    cancel: CancelToken,
    series: Option<TimeSeries>,
    grid: Option<FrequencyGrid>,
    spectrum: Option<Spectrum>,
    peak: Option<PeakEstimate>,
    fit: Option<UncertaintyEstimate>,
    noise_floor: Option<f64>,
}

impl Session {
    /// Creates an empty session.
    ///
    /// # Errors
    ///
    /// Returns `Z2nError::OutOfResources` if the engine pool cannot start.
    pub fn new(config: SessionConfig) -> Result<Self> {
        Ok(Self {
            engine: PeriodogramEngine::new(config.engine)?,
            guard: ResourceGuard::new(config.resources),
            region: RegionRecompute::new(config.region),
            fitter: UncertaintyFitter::new(config.fit),
            cancel: CancelToken::new(),
            series: None,
            grid: None,
            spectrum: None,
            peak: None,
            fit: None,
            noise_floor: None,
        })
    }

    /// Token that cancels the running computation from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Loads the series through `loader`, discarding any previous spectrum.
    pub fn load_series<L: SeriesLoader + ?Sized>(
        &mut self,
        loader: &L,
        path: &Path,
    ) -> Result<&TimeSeries> {
        let series = loader.load(path)?;
        info!("Loaded {} events from {}", series.len(), path.display());
        Ok(self.set_series(series))
    }

    /// Replaces the series, discarding any previous spectrum.
    pub fn set_series(&mut self, series: TimeSeries) -> &TimeSeries {
        self.spectrum = None;
        self.grid = None;
        self.invalidate();
        self.series.insert(series)
    }

    /// The loaded series.
    pub fn series(&self) -> Result<&TimeSeries> {
        self.series.as_ref().ok_or(Z2nError::EmptySeries)
    }

    /// The current spectrum.
    pub fn spectrum(&self) -> Result<&Spectrum> {
        self.spectrum.as_ref().ok_or(Z2nError::EmptySpectrum)
    }

    /// Grid the current spectrum was first computed on.
    pub fn grid(&self) -> Option<&FrequencyGrid> {
        self.grid.as_ref()
    }

    /// Latest peak estimate on the current spectrum.
    pub fn peak(&self) -> Option<&PeakEstimate> {
        self.peak.as_ref()
    }

    /// Latest fit on the current spectrum.
    pub fn uncertainty(&self) -> Option<&UncertaintyEstimate> {
        self.fit.as_ref()
    }

    /// Computes the spectrum over `grid`, replacing the previous one.
    ///
    /// A cancelled run leaves the session without a spectrum.
    pub fn run(&mut self, grid: FrequencyGrid) -> Result<&Spectrum> {
        self.spectrum = None;
        self.grid = None;
        self.invalidate();
        self.cancel.reset();

        let series = self.series.as_ref().ok_or(Z2nError::EmptySeries)?;
        let spectrum = self.engine.periodogram(series, &grid, &self.guard, &self.cancel)?;
        self.grid = Some(grid);
        let spectrum = self.spectrum.insert(spectrum);
        self.peak = analysis::analyze(spectrum, series).ok();
        Ok(spectrum)
    }

    /// Recomputes the whole spectrum over `[fmin, fmax)` at step `delta`,
    /// keeping the harmonics of the current grid.
    pub fn recompute_whole(&mut self, fmin: f64, fmax: f64, delta: f64) -> Result<&Spectrum> {
        let harmonics = self
            .grid
            .map_or(crate::grid::DEFAULT_HARMONICS, |g| g.harmonics());
        let grid = FrequencyGrid::build(fmin, fmax, delta)?.with_harmonics(harmonics)?;
        self.run(grid)
    }

    /// Recomputes `[lo_freq, hi_freq)` at step `delta` inside the current
    /// spectrum.
    ///
    /// On error the spectrum and the cached estimates are unchanged.
    pub fn refine_region(
        &mut self,
        lo_freq: f64,
        hi_freq: f64,
        delta: f64,
    ) -> Result<RegionSplice> {
        self.cancel.reset();
        let series = self.series.as_ref().ok_or(Z2nError::EmptySeries)?;
        let spectrum = self.spectrum.as_mut().ok_or(Z2nError::EmptySpectrum)?;
        let splice = self.region.recompute(
            &self.engine,
            series,
            spectrum,
            lo_freq,
            hi_freq,
            delta,
            &self.cancel,
        )?;
        self.fit = None;
        self.noise_floor = None;
        self.peak = analysis::analyze(spectrum, series).ok();
        Ok(splice)
    }

    /// Finds the strongest bin of the current spectrum.
    pub fn analyze(&mut self) -> Result<PeakEstimate> {
        let series = self.series.as_ref().ok_or(Z2nError::EmptySeries)?;
        let spectrum = self.spectrum.as_ref().ok_or(Z2nError::EmptySpectrum)?;
        let peak = analysis::analyze(spectrum, series)?;
        self.peak = Some(peak);
        Ok(peak)
    }

    /// Fits `model` to `power[lo_idx..hi_idx)`.
    pub fn fit(
        &mut self,
        lo_idx: usize,
        hi_idx: usize,
        model: FitModel,
    ) -> Result<UncertaintyEstimate> {
        let spectrum = self.spectrum.as_ref().ok_or(Z2nError::EmptySpectrum)?;
        let estimate = self.fitter.fit(spectrum, lo_idx, hi_idx, model)?;
        self.fit = Some(estimate);
        Ok(estimate)
    }

    /// Fits `model` to the `half_width` bins on either side of the peak,
    /// clipped to the spectrum.
    pub fn fit_around_peak(
        &mut self,
        half_width: usize,
        model: FitModel,
    ) -> Result<UncertaintyEstimate> {
        let peak = match self.peak {
            Some(peak) => peak,
            None => self.analyze()?,
        };
        let len = self.spectrum()?.len();
        let lo_idx = peak.index.saturating_sub(half_width);
        let hi_idx = (peak.index + half_width + 1).min(len);
        self.fit(lo_idx, hi_idx, model)
    }

    /// Writes the latest fit curve over its window of the spectrum.
    ///
    /// The spectrum changes, so the peak is recomputed and the fit kept only
    /// as the record of what was drawn.
    pub fn overlay_fit(&mut self) -> Result<()> {
        let estimate = self.fit.ok_or(Z2nError::EmptyRegion { lo: 0, hi: 0 })?;
        let series = self.series.as_ref().ok_or(Z2nError::EmptySeries)?;
        let spectrum = self.spectrum.as_mut().ok_or(Z2nError::EmptySpectrum)?;
        analysis::overlay(spectrum, &estimate)?;
        self.noise_floor = None;
        self.peak = analysis::analyze(spectrum, series).ok();
        Ok(())
    }

    /// Measures the noise floor over `regions` of the current spectrum.
    pub fn noise_floor(&mut self, regions: &[(f64, f64)]) -> Result<f64> {
        let spectrum = self.spectrum.as_ref().ok_or(Z2nError::EmptySpectrum)?;
        let floor = analysis::noise_floor(spectrum, regions)?;
        self.noise_floor = Some(floor);
        Ok(floor)
    }

    /// Peak next to its fit and noise floor.
    pub fn summary(&mut self) -> Result<PeakSummary> {
        let peak = match self.peak {
            Some(peak) => peak,
            None => self.analyze()?,
        };
        let spectrum = self.spectrum()?;
        Ok(PeakSummary {
            peak,
            fit: self.fit.filter(|fit| fit.is_current(spectrum)),
            noise_floor: self.noise_floor,
        })
    }

    /// Saves the current spectrum through `writer`.
    pub fn save<W: SpectrumWriter + ?Sized>(
        &self,
        writer: &W,
        path: &Path,
        format: OutputFormat,
    ) -> Result<()> {
        let spectrum = self.spectrum()?;
        spectrum.flush()?;
        writer.save(spectrum, path, format)?;
        info!("Saved spectrum of {} bins to {}", spectrum.len(), path.display());
        Ok(())
    }

    /// Hands the current spectrum and estimates to `renderer`.
    pub fn render<R: Renderer + ?Sized>(&self, renderer: &mut R) -> Result<()> {
        let spectrum = self.spectrum()?;
        renderer.render(spectrum, self.peak.as_ref(), self.fit.as_ref())
    }

    fn invalidate(&mut self) {
        self.peak = None;
        self.fit = None;
        self.noise_floor = None;
    }
}
