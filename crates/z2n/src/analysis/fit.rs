//! Peak-shape fitting for frequency uncertainty.
//!
//! A window of the spectrum around the peak is fitted with a Gaussian or a
//! sinc² profile by Levenberg–Marquardt least squares. The fitted width is
//! the frequency uncertainty. Fitting never mutates the spectrum;
//! [`overlay`] writes the fitted curve back on explicit request.
//!
//! The problem is solved in normalized coordinates (frequencies centered on
//! the power-weighted mean and scaled by the weighted spread, power scaled by
//! the window maximum) so that peaks a few µHz wide at mHz frequencies stay
//! well conditioned.
//!
//! # Example
//!
//! ```rust,ignore
//! use z2n::{FitModel, UncertaintyFitter};
//!
//! let fitter = UncertaintyFitter::default();
//! let estimate = fitter.fit(&spectrum, peak.index - 20, peak.index + 20, FitModel::Gaussian)?;
//! println!("{} ± {} Hz", estimate.frequency, estimate.frequency_error);
//! ```

use crate::error::{Result, Z2nError};
use crate::spectrum::Spectrum;
use nalgebra::{Matrix3, Vector3};
use std::f64::consts::PI;
use tracing::{debug, warn};

/// Default iteration budget.
pub const DEFAULT_MAX_ITERATIONS: usize = 200;

/// Default relative step size below which the fit has converged.
pub const DEFAULT_STEP_TOLERANCE: f64 = 1e-10;

/// Default relative cost decrease below which the fit has converged.
pub const DEFAULT_COST_TOLERANCE: f64 = 1e-12;

/// Default gradient magnitude below which the fit has converged.
pub const DEFAULT_GRADIENT_TOLERANCE: f64 = 1e-14;

/// Default initial Marquardt damping factor.
pub const DEFAULT_INITIAL_DAMPING: f64 = 1e-3;

/// Damping beyond which no step can lower the cost any more.
const MAX_DAMPING: f64 = 1e16;

const MIN_DAMPING: f64 = 1e-12;

/// Floor for the diagonal scaling of the damped normal equations.
const MIN_DIAGONAL: f64 = 1e-12;

/// Ratio of the sinc² width parameter to the power-weighted spread of its
/// main lobe.
const SINC_WIDTH_PER_SIGMA: f64 = 3.0;

/// Peak profile to fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitModel {
    /// `A·exp(−(f−μ)²/(2σ²))`
    Gaussian,
    /// `A·sinc²((f−μ)/w)` with `sinc(x) = sin(πx)/(πx)`
    Sinc,
}

impl FitModel {
    /// Evaluates the profile at `x`.
    pub fn evaluate(&self, x: f64, amplitude: f64, center: f64, width: f64) -> f64 {
        let u = (x - center) / width;
        match self {
            FitModel::Gaussian => amplitude * (-0.5 * u * u).exp(),
            FitModel::Sinc => {
                let s = sinc(u);
                amplitude * s * s
            }
        }
    }

    /// Value and gradient with respect to `(amplitude, center, width)`.
    fn evaluate_with_gradient(&self, x: f64, p: &Vector3<f64>) -> (f64, Vector3<f64>) {
        let (amplitude, center, width) = (p[0], p[1], p[2]);
        let u = (x - center) / width;
        match self {
            FitModel::Gaussian => {
                let e = (-0.5 * u * u).exp();
                let value = amplitude * e;
                (value, Vector3::new(e, value * u / width, value * u * u / width))
            }
            FitModel::Sinc => {
                let (s, ds) = sinc_with_derivative(u);
                let d_du = 2.0 * amplitude * s * ds;
                (
                    amplitude * s * s,
                    Vector3::new(s * s, -d_du / width, -d_du * u / width),
                )
            }
        }
    }

    fn width_seed(&self, sigma: f64) -> f64 {
        match self {
            FitModel::Gaussian => sigma,
            FitModel::Sinc => SINC_WIDTH_PER_SIGMA * sigma,
        }
    }
}

/// Configuration for the least-squares fit.
#[derive(Debug, Clone, Copy)]
pub struct FitConfig {
    /// Maximum number of accepted or rejected Levenberg–Marquardt iterations.
    pub max_iterations: usize,
    /// Converged when every parameter step is below this relative size.
    pub step_tolerance: f64,
    /// Converged when the cost decreases by less than this fraction.
    pub cost_tolerance: f64,
    /// Converged when the largest gradient component falls below this.
    pub gradient_tolerance: f64,
    /// Starting Marquardt damping factor.
    pub initial_damping: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            step_tolerance: DEFAULT_STEP_TOLERANCE,
            cost_tolerance: DEFAULT_COST_TOLERANCE,
            gradient_tolerance: DEFAULT_GRADIENT_TOLERANCE,
            initial_damping: DEFAULT_INITIAL_DAMPING,
        }
    }
}

impl FitConfig {
    /// Sets the iteration budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the step and cost tolerances.
    pub fn with_tolerances(mut self, step_tolerance: f64, cost_tolerance: f64) -> Self {
        self.step_tolerance = step_tolerance;
        self.cost_tolerance = cost_tolerance;
        self
    }

    /// Sets the initial damping factor.
    pub fn with_initial_damping(mut self, damping: f64) -> Self {
        self.initial_damping = damping;
        self
    }
}

/// Result of a peak-shape fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UncertaintyEstimate {
    /// Profile that was fitted.
    pub model: FitModel,
    /// `|μ|` (Hz).
    pub frequency: f64,
    /// `|width|` (Hz).
    pub frequency_error: f64,
    /// `1 / frequency` (s).
    pub period: f64,
    /// `|1/(frequency + frequency_error) − period|` (s).
    pub period_error: f64,
    /// Fitted amplitude, the refined peak power.
    pub power: f64,
    /// Fitted center `μ`.
    pub center: f64,
    /// Fitted width (σ or w), always positive.
    pub width: f64,
    /// First spectrum index of the fitted window.
    pub lo_idx: usize,
    /// One past the last spectrum index of the fitted window.
    pub hi_idx: usize,
    /// Frequency of the first bin of the window.
    pub lo_freq: f64,
    /// Frequency of the last bin of the window.
    pub hi_freq: f64,
    /// Iterations used.
    pub iterations: usize,
    /// Residual sum of squares in spectrum units.
    pub residual: f64,
    /// Spectrum generation the fit was taken from.
    pub generation: u64,
}

impl UncertaintyEstimate {
    /// Evaluates the fitted profile at `frequency`.
    pub fn evaluate(&self, frequency: f64) -> f64 {
        self.model
            .evaluate(frequency, self.power, self.center, self.width)
    }

    /// Returns true if `spectrum` has not changed since the fit.
    pub fn is_current(&self, spectrum: &Spectrum) -> bool {
        self.generation == spectrum.generation()
    }
}

/// Fits peak profiles to spectrum windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct UncertaintyFitter {
    config: FitConfig,
}

impl UncertaintyFitter {
    /// Creates a fitter with the given configuration.
    pub fn new(config: FitConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Fits `model` to `power[lo_idx..hi_idx)`.
    ///
    /// Seeds are the power-weighted mean and spread of the window
    /// frequencies, and its maximum power as amplitude.
    ///
    /// # Errors
    ///
    /// - `Z2nError::EmptyRegion` if `hi_idx <= lo_idx`
    /// - `Z2nError::IndexOutOfBounds` if the window extends past the spectrum
    /// - `Z2nError::FitDidNotConverge` if the window cannot constrain three
    ///   parameters, the budget runs out, or parameters become non-finite
    pub fn fit(
        &self,
        spectrum: &Spectrum,
        lo_idx: usize,
        hi_idx: usize,
        model: FitModel,
    ) -> Result<UncertaintyEstimate> {
        if hi_idx <= lo_idx {
            return Err(Z2nError::EmptyRegion {
                lo: lo_idx,
                hi: hi_idx,
            });
        }
        if hi_idx > spectrum.len() {
            return Err(Z2nError::IndexOutOfBounds {
                lo: lo_idx,
                hi: hi_idx,
                len: spectrum.len(),
            });
        }
        let xs = &spectrum.bins()[lo_idx..hi_idx];
        let ys = &spectrum.power()[lo_idx..hi_idx];
        let seed = Seed::from_window(xs, ys).ok_or(Z2nError::FitDidNotConverge { iterations: 0 })?;

        let norm_x: Vec<f64> = xs.iter().map(|&x| (x - seed.center) / seed.sigma).collect();
        let norm_y: Vec<f64> = ys.iter().map(|&y| y / seed.amplitude).collect();
        let start = Vector3::new(1.0, 0.0, model.width_seed(1.0));
        let solution = self.levenberg_marquardt(model, &norm_x, &norm_y, start)?;

        let p = solution.params;
        let amplitude = p[0] * seed.amplitude;
        let center = seed.center + p[1] * seed.sigma;
        let width = (p[2] * seed.sigma).abs();
        if !(amplitude.is_finite() && center.is_finite() && width.is_finite()) || width == 0.0 {
            return Err(Z2nError::FitDidNotConverge {
                iterations: solution.iterations,
            });
        }

        let frequency = center.abs();
        let period = 1.0 / frequency;
        let estimate = UncertaintyEstimate {
            model,
            frequency,
            frequency_error: width,
            period,
            period_error: (1.0 / (frequency + width) - period).abs(),
            power: amplitude,
            center,
            width,
            lo_idx,
            hi_idx,
            lo_freq: xs[0],
            hi_freq: xs[xs.len() - 1],
            iterations: solution.iterations,
            residual: solution.cost * seed.amplitude * seed.amplitude,
            generation: spectrum.generation(),
        };
        debug!(
            "{:?} fit over [{}, {}) converged in {} iterations: {} ± {} Hz",
            model, lo_idx, hi_idx, solution.iterations, frequency, width
        );
        Ok(estimate)
    }

    fn levenberg_marquardt(
        &self,
        model: FitModel,
        xs: &[f64],
        ys: &[f64],
        start: Vector3<f64>,
    ) -> Result<Solution> {
        let config = &self.config;
        let mut params = start;
        let mut cost = sum_of_squares(model, xs, ys, &params);
        let mut damping = config.initial_damping.max(MIN_DAMPING);

        for iteration in 1..=config.max_iterations {
            if !cost.is_finite() {
                break;
            }
            if cost == 0.0 {
                return Ok(Solution::new(params, iteration, cost));
            }
            let (jtj, jtr) = normal_equations(model, xs, ys, &params);
            if jtr.amax() <= config.gradient_tolerance {
                return Ok(Solution::new(params, iteration, cost));
            }

            let mut damped = jtj;
            for i in 0..3 {
                damped[(i, i)] += damping * jtj[(i, i)].max(MIN_DIAGONAL);
            }
            let step = damped.cholesky().map(|c| c.solve(&jtr));
            let candidate = step.map(|s| (s, params + s));
            let accepted = candidate.and_then(|(s, p)| {
                let new_cost = sum_of_squares(model, xs, ys, &p);
                (new_cost.is_finite() && new_cost < cost).then_some((s, p, new_cost))
            });

            match accepted {
                Some((step, next, new_cost)) => {
                    let decrease = cost - new_cost;
                    params = next;
                    cost = new_cost;
                    damping = (damping / 10.0).max(MIN_DAMPING);

                    let tol = config.step_tolerance;
                    let small_step = step
                        .iter()
                        .zip(params.iter())
                        .all(|(s, p)| s.abs() <= tol * (p.abs() + tol));
                    if small_step || decrease <= config.cost_tolerance * (cost + decrease) {
                        return Ok(Solution::new(params, iteration, cost));
                    }
                }
                None => {
                    damping *= 10.0;
                    if damping > MAX_DAMPING {
                        // no step lowers the cost: a minimum to working precision
                        return Ok(Solution::new(params, iteration, cost));
                    }
                }
            }
        }

        warn!(
            "{:?} fit did not converge within {} iterations",
            model, config.max_iterations
        );
        Err(Z2nError::FitDidNotConverge {
            iterations: config.max_iterations,
        })
    }
}

/// Overwrites the fitted window of `spectrum` with the fitted profile.
///
/// # Errors
///
/// Returns `Z2nError::IndexOutOfBounds` if the window no longer fits in the
/// spectrum.
pub fn overlay(spectrum: &mut Spectrum, estimate: &UncertaintyEstimate) -> Result<()> {
    if estimate.hi_idx > spectrum.len() || estimate.lo_idx > estimate.hi_idx {
        return Err(Z2nError::IndexOutOfBounds {
            lo: estimate.lo_idx,
            hi: estimate.hi_idx,
            len: spectrum.len(),
        });
    }
    if !estimate.is_current(spectrum) {
        warn!(
            "Overlaying fit from generation {} onto spectrum generation {}",
            estimate.generation,
            spectrum.generation()
        );
    }
    let curve: Vec<f64> = spectrum.bins()[estimate.lo_idx..estimate.hi_idx]
        .iter()
        .map(|&f| estimate.evaluate(f))
        .collect();
    spectrum.overwrite_power(estimate.lo_idx, &curve)
}

struct Seed {
    center: f64,
    sigma: f64,
    amplitude: f64,
}

impl Seed {
    /// Power-weighted moments of the window. `None` when the window is too
    /// small or carries no positive power.
    fn from_window(xs: &[f64], ys: &[f64]) -> Option<Self> {
        if xs.len() < 3 {
            return None;
        }
        let weight = |y: f64| if y > 0.0 { y } else { 0.0 };
        let total: f64 = ys.iter().map(|&y| weight(y)).sum();
        let amplitude = ys.iter().copied().filter(|y| !y.is_nan()).fold(f64::MIN, f64::max);
        if total <= 0.0 || !total.is_finite() || amplitude <= 0.0 {
            return None;
        }

        let center = xs.iter().zip(ys).map(|(&x, &y)| x * weight(y)).sum::<f64>() / total;
        let variance = xs
            .iter()
            .zip(ys)
            .map(|(&x, &y)| (x - center).powi(2) * weight(y))
            .sum::<f64>()
            / total;
        let mut sigma = variance.sqrt();
        if sigma.is_nan() || sigma <= 0.0 {
            // a single bin carries all the power
            sigma = (xs[xs.len() - 1] - xs[0]).abs() / xs.len() as f64;
        }
        if sigma <= 0.0 || !sigma.is_finite() {
            return None;
        }
        Some(Self {
            center,
            sigma,
            amplitude,
        })
    }
}

struct Solution {
    params: Vector3<f64>,
    iterations: usize,
    cost: f64,
}

impl Solution {
    fn new(params: Vector3<f64>, iterations: usize, cost: f64) -> Self {
        Self {
            params,
            iterations,
            cost,
        }
    }
}

fn sum_of_squares(model: FitModel, xs: &[f64], ys: &[f64], p: &Vector3<f64>) -> f64 {
    xs.iter()
        .zip(ys)
        .map(|(&x, &y)| {
            let r = y - model.evaluate(x, p[0], p[1], p[2]);
            r * r
        })
        .sum()
}

/// `JᵀJ` and `Jᵀr` for residuals `r = y − model(x)`.
fn normal_equations(
    model: FitModel,
    xs: &[f64],
    ys: &[f64],
    p: &Vector3<f64>,
) -> (Matrix3<f64>, Vector3<f64>) {
    let mut jtj = Matrix3::zeros();
    let mut jtr = Vector3::zeros();
    for (&x, &y) in xs.iter().zip(ys) {
        let (value, gradient) = model.evaluate_with_gradient(x, p);
        jtj += gradient * gradient.transpose();
        jtr += gradient * (y - value);
    }
    (jtj, jtr)
}

fn sinc(u: f64) -> f64 {
    sinc_with_derivative(u).0
}

/// `sinc(u)` and its derivative, using the Taylor expansion near zero.
fn sinc_with_derivative(u: f64) -> (f64, f64) {
    let x = PI * u;
    if x.abs() < 1e-4 {
        let x2 = x * x;
        (1.0 - x2 / 6.0, -PI * x / 3.0)
    } else {
        let s = x.sin() / x;
        (s, (x.cos() - s) / u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(model: FitModel, amplitude: f64, center: f64, width: f64, xs: &[f64]) -> Spectrum {
        let power = xs
            .iter()
            .map(|&x| model.evaluate(x, amplitude, center, width))
            .collect();
        Spectrum::from_parts(xs.to_vec(), power, 1, 100).unwrap()
    }

    fn axis(lo: f64, step: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| lo + i as f64 * step).collect()
    }

    #[test]
    fn test_sinc_derivative_matches_difference() {
        for u in [-0.7, -1e-6, 0.0, 0.3, 1.4] {
            let h = 1e-7;
            let numeric = (sinc(u + h) - sinc(u - h)) / (2.0 * h);
            let (_, analytic) = sinc_with_derivative(u);
            assert!((numeric - analytic).abs() < 1e-6, "u = {u}");
        }
    }

    #[test]
    fn test_gaussian_recovers_parameters() {
        let xs = axis(0.99, 1e-4, 201);
        let spectrum = profile(FitModel::Gaussian, 30.0, 1.0003, 0.002, &xs);
        let estimate = UncertaintyFitter::default()
            .fit(&spectrum, 0, xs.len(), FitModel::Gaussian)
            .unwrap();

        assert!((estimate.frequency - 1.0003).abs() < 1e-8);
        assert!((estimate.frequency_error - 0.002).abs() < 1e-8);
        assert!((estimate.power - 30.0).abs() < 1e-6);
        assert!((estimate.period - 1.0 / 1.0003).abs() < 1e-8);
        let expected_period_error = (1.0_f64 / (1.0003 + 0.002) - 1.0 / 1.0003).abs();
        assert!((estimate.period_error - expected_period_error).abs() < 1e-8);
        assert_eq!(estimate.lo_idx, 0);
        assert_eq!(estimate.hi_idx, xs.len());
    }

    #[test]
    fn test_fit_does_not_mutate() {
        let xs = axis(0.99, 1e-4, 201);
        let spectrum = profile(FitModel::Gaussian, 30.0, 1.0, 0.002, &xs);
        let before = spectrum.snapshot();
        UncertaintyFitter::default()
            .fit(&spectrum, 50, 150, FitModel::Gaussian)
            .unwrap();
        assert_eq!(spectrum.snapshot(), before);
    }

    #[test]
    fn test_window_errors() {
        let xs = axis(1.0, 0.1, 10);
        let spectrum = profile(FitModel::Gaussian, 1.0, 1.5, 0.2, &xs);
        let fitter = UncertaintyFitter::default();
        assert!(matches!(
            fitter.fit(&spectrum, 4, 4, FitModel::Gaussian),
            Err(Z2nError::EmptyRegion { lo: 4, hi: 4 })
        ));
        assert!(matches!(
            fitter.fit(&spectrum, 5, 11, FitModel::Gaussian),
            Err(Z2nError::IndexOutOfBounds { .. })
        ));
        assert!(matches!(
            fitter.fit(&spectrum, 2, 4, FitModel::Gaussian),
            Err(Z2nError::FitDidNotConverge { .. })
        ));
    }

    #[test]
    fn test_zero_budget_does_not_converge() {
        let xs = axis(0.99, 1e-4, 201);
        let spectrum = profile(FitModel::Gaussian, 30.0, 1.0003, 0.002, &xs);
        let fitter = UncertaintyFitter::new(FitConfig::default().with_max_iterations(0));
        assert!(matches!(
            fitter.fit(&spectrum, 0, xs.len(), FitModel::Gaussian),
            Err(Z2nError::FitDidNotConverge { iterations: 0 })
        ));
    }

    #[test]
    fn test_overlay_writes_curve() {
        let xs = axis(0.99, 1e-4, 201);
        let mut spectrum = profile(FitModel::Gaussian, 30.0, 1.0, 0.002, &xs);
        let estimate = UncertaintyFitter::default()
            .fit(&spectrum, 80, 120, FitModel::Gaussian)
            .unwrap();
        overlay(&mut spectrum, &estimate).unwrap();
        assert_eq!(spectrum.generation(), 1);
        for i in 80..120 {
            let expected = estimate.evaluate(spectrum.bins()[i]);
            assert_eq!(spectrum.power()[i], expected);
        }
        assert!(!estimate.is_current(&spectrum));
    }
}
