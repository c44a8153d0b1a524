//! Read-only analysis of a computed spectrum.
//!
//! - [`peak`]: strongest bin, pulsed fraction, noise floor
//! - [`fit`]: peak-shape fitting for frequency and period uncertainty
//!
//! Both work on `&Spectrum`; the only write is the explicit [`fit::overlay`].

pub mod fit;
pub mod peak;

pub use fit::{overlay, FitConfig, FitModel, UncertaintyEstimate, UncertaintyFitter};
pub use peak::{analyze, noise_floor, PeakEstimate};
