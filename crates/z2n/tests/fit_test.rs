//! Integration tests for peak-shape fitting.
//!
//! These tests verify:
//! - Gaussian and sinc² profiles are recovered from synthetic spectra
//! - A real periodogram peak yields its frequency and a width near 1/T
//! - Window validation

use z2n::analysis::{self, overlay, FitModel, UncertaintyFitter};
use z2n::{
    CancelToken, FrequencyGrid, PeriodogramEngine, ResourceGuard, Spectrum, TimeSeries, Z2nError,
};

fn synthetic(
    model: FitModel,
    amplitude: f64,
    center: f64,
    width: f64,
    lo: f64,
    step: f64,
    n: usize,
) -> Spectrum {
    let bins: Vec<f64> = (0..n).map(|i| lo + i as f64 * step).collect();
    let power = bins
        .iter()
        .map(|&f| model.evaluate(f, amplitude, center, width))
        .collect();
    Spectrum::from_parts(bins, power, 1, 1000).unwrap()
}

#[test]
fn test_gaussian_recovers_mean_and_sigma() {
    let spectrum = synthetic(FitModel::Gaussian, 55.0, 0.0123, 2.5e-5, 0.0121, 2e-6, 200);
    let estimate = UncertaintyFitter::default()
        .fit(&spectrum, 0, spectrum.len(), FitModel::Gaussian)
        .unwrap();

    assert!((estimate.frequency - 0.0123).abs() < 1e-10);
    assert!((estimate.frequency_error - 2.5e-5).abs() < 1e-10);
    assert!((estimate.power - 55.0).abs() < 1e-6);
    assert!(estimate.residual < 1e-12);
    assert_eq!(estimate.model, FitModel::Gaussian);
}

#[test]
fn test_sinc_recovers_main_lobe() {
    let spectrum = synthetic(FitModel::Sinc, 12.0, 0.51, 0.003, 0.5, 1e-4, 200);
    let (lo, hi) = spectrum.locate(0.5073, 0.5127, 0.0).unwrap();
    let estimate = UncertaintyFitter::default()
        .fit(&spectrum, lo, hi, FitModel::Sinc)
        .unwrap();

    assert!((estimate.frequency - 0.51).abs() < 1e-9);
    assert!((estimate.width - 0.003).abs() < 1e-9);
    assert!((estimate.power - 12.0).abs() < 1e-6);
    let period = 1.0 / 0.51;
    assert!((estimate.period - period).abs() < 1e-8);
    assert!((estimate.period_error - (1.0 / 0.513 - period).abs()).abs() < 1e-8);
}

#[test]
fn test_fit_on_periodogram_peak() {
    let series = TimeSeries::new(
        (0..500u64)
            .map(|k| k as f64 * 10.0 + ((k * 7919) % 100) as f64 / 1000.0)
            .collect(),
    )
    .unwrap();
    let grid = FrequencyGrid::from_oversample(&series, 0.05, 0.15, 5.0).unwrap();
    let spectrum = PeriodogramEngine::default()
        .periodogram(&series, &grid, &ResourceGuard::default(), &CancelToken::new())
        .unwrap();
    let peak = analysis::analyze(&spectrum, &series).unwrap();

    let fitter = UncertaintyFitter::default();
    let sinc = fitter
        .fit(&spectrum, peak.index - 4, peak.index + 5, FitModel::Sinc)
        .unwrap();
    assert!((sinc.frequency - 0.1).abs() < grid.delta() / 10.0);
    // the main lobe of a coherent signal is 1/T wide
    let resolution = 1.0 / series.exposure();
    assert!((sinc.frequency_error - resolution).abs() < 0.05 * resolution);

    let gaussian = fitter
        .fit(&spectrum, peak.index - 4, peak.index + 5, FitModel::Gaussian)
        .unwrap();
    assert!((gaussian.frequency - 0.1).abs() < grid.delta());
    assert!(gaussian.frequency_error > 0.0 && gaussian.frequency_error < resolution);
}

#[test]
fn test_overlay_only_on_request() {
    let mut spectrum = synthetic(FitModel::Gaussian, 10.0, 1.0, 0.01, 0.95, 0.001, 100);
    let noisy: Vec<f64> = spectrum
        .power()
        .iter()
        .enumerate()
        .map(|(i, p)| p + if i % 2 == 0 { 0.05 } else { -0.05 })
        .collect();
    spectrum = Spectrum::from_parts(spectrum.bins().to_vec(), noisy.clone(), 1, 1000).unwrap();

    let estimate = UncertaintyFitter::default()
        .fit(&spectrum, 30, 70, FitModel::Gaussian)
        .unwrap();
    assert_eq!(spectrum.power(), noisy.as_slice());

    overlay(&mut spectrum, &estimate).unwrap();
    assert_eq!(&spectrum.power()[..30], &noisy[..30]);
    assert_eq!(&spectrum.power()[70..], &noisy[70..]);
    assert_ne!(&spectrum.power()[30..70], &noisy[30..70]);
}

#[test]
fn test_window_validation() {
    let spectrum = synthetic(FitModel::Gaussian, 1.0, 0.5, 0.1, 0.0, 0.1, 10);
    let fitter = UncertaintyFitter::default();
    assert!(matches!(
        fitter.fit(&spectrum, 6, 3, FitModel::Sinc),
        Err(Z2nError::EmptyRegion { lo: 6, hi: 3 })
    ));
    assert!(matches!(
        fitter.fit(&spectrum, 0, 20, FitModel::Gaussian),
        Err(Z2nError::IndexOutOfBounds { len: 10, .. })
    ));

    let flat = Spectrum::from_parts(vec![1.0, 2.0, 3.0, 4.0], vec![0.0; 4], 1, 10).unwrap();
    assert!(matches!(
        fitter.fit(&flat, 0, 4, FitModel::Gaussian),
        Err(Z2nError::FitDidNotConverge { .. })
    ));
}
