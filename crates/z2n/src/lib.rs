//! Z2n - Pulsar Periodogram Engine
//!
//! This crate computes the Z²ₙ (Rayleigh) periodogram of photon arrival
//! times, keeps the spectrum in memory or in a memory-mapped scratch file
//! depending on a memory budget, refines frequency windows in place, and
//! estimates the pulse frequency and its uncertainty.
//!
//! # Components
//!
//! - [`FrequencyGrid`]: right-open frequency axis with harmonics
//! - [`ResourceGuard`] / [`BackingStore`]: memory budget and RAM/disk storage
//! - [`PeriodogramEngine`]: parallel, cancellable Z²ₙ computation
//! - [`RegionRecompute`]: finer recomputation of a window, spliced in place
//! - [`analysis`]: peak detection, noise floor, peak-shape fitting
//! - [`Session`]: caller-owned state tying the pieces together
//!
//! # Example
//!
//! ```rust,ignore
//! use z2n::{analysis, CancelToken, FrequencyGrid, PeriodogramEngine, ResourceGuard, TimeSeries};
//!
//! let series = TimeSeries::new(arrival_times)?;
//! let grid = FrequencyGrid::from_oversample(&series, 1e-4, 1e-2, 10.0)?.with_harmonics(2)?;
//!
//! // Spectra larger than the budget land in a scratch file
//! let engine = PeriodogramEngine::default();
//! let guard = ResourceGuard::default();
//! let spectrum = engine.periodogram(&series, &grid, &guard, &CancelToken::new())?;
//!
//! let peak = analysis::analyze(&spectrum, &series)?;
//! println!("{} Hz, pulsed fraction {}", peak.frequency, peak.pulsed_fraction);
//! ```

#![deny(missing_docs)]

pub mod analysis;
pub mod engine;
pub mod error;
pub mod grid;
pub mod region;
pub mod resource;
pub mod series;
pub mod session;
pub mod spectrum;
pub mod store;

pub use analysis::{FitConfig, FitModel, PeakEstimate, UncertaintyEstimate, UncertaintyFitter};
pub use engine::{z2n_power, z2n_power_reference, CancelToken, EngineConfig, PeriodogramEngine};
pub use error::{Result, Z2nError};
pub use grid::FrequencyGrid;
pub use region::{RegionConfig, RegionRecompute, RegionSplice};
pub use resource::{ResourceConfig, ResourceDecision, ResourceGuard};
pub use series::{SeriesLoader, TimeSeries};
pub use session::{OutputFormat, PeakSummary, Renderer, Session, SessionConfig, SpectrumWriter};
pub use spectrum::{Spectrum, SpectrumSnapshot};
pub use store::BackingStore;
