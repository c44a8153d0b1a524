//! Photon arrival-time series and the loader seam.
//!
//! A [`TimeSeries`] is immutable once built. The engine only borrows it; the
//! caller owns it. File formats are out of scope for this crate: callers plug
//! a [`SeriesLoader`] in and any failure is surfaced as
//! [`Z2nError::SeriesLoad`].

use crate::error::{BoxedSource, Result, Z2nError};
use std::path::Path;

/// Ordered photon arrival times in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    times: Vec<f64>,
    exposure: f64,
}

impl TimeSeries {
    /// Builds a series from arrival times.
    ///
    /// Times are sorted ascending. Non-finite values are rejected with
    /// [`Z2nError::SeriesLoad`] since they can only come from a broken loader.
    pub fn new(mut times: Vec<f64>) -> Result<Self> {
        if let Some(bad) = times.iter().find(|t| !t.is_finite()) {
            return Err(Z2nError::series_load(format!(
                "non-finite arrival time: {bad}"
            )));
        }
        times.sort_by(|a, b| a.total_cmp(b));
        let exposure = match (times.first(), times.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        };
        Ok(Self { times, exposure })
    }

    /// Returns the arrival times.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Returns the number of events (N).
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Returns true if the series holds no events.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Observation span `max - min` in seconds.
    pub fn exposure(&self) -> f64 {
        self.exposure
    }

    /// Sampling rate `1 / exposure` in Hz.
    ///
    /// Infinite for a series of a single instant.
    pub fn sampling(&self) -> f64 {
        1.0 / self.exposure
    }

    /// Z2n normalization factor `2 / N`.
    pub fn normalization(&self) -> Result<f64> {
        if self.is_empty() {
            return Err(Z2nError::EmptySeries);
        }
        Ok(2.0 / self.times.len() as f64)
    }
}

/// Loads a [`TimeSeries`] from an event file.
///
/// Implementations own the file format. The core treats their errors
/// opaquely.
pub trait SeriesLoader {
    /// Loads the series stored at `path`.
    fn load(&self, path: &Path) -> Result<TimeSeries>;
}

impl<F, E> SeriesLoader for F
where
    F: Fn(&Path) -> std::result::Result<Vec<f64>, E>,
    E: Into<BoxedSource>,
{
    fn load(&self, path: &Path) -> Result<TimeSeries> {
        let times = self(path).map_err(Z2nError::series_load)?;
        TimeSeries::new(times)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_exposure_and_sampling() {
        let series = TimeSeries::new(vec![10.0, 4.0, 7.0]).unwrap();
        assert_eq!(series.times(), &[4.0, 7.0, 10.0]);
        assert_eq!(series.exposure(), 6.0);
        assert!((series.sampling() - 1.0 / 6.0).abs() < 1e-15);
        assert_eq!(series.len(), 3);
    }

    #[test]
    fn test_empty_series_normalization() {
        let series = TimeSeries::new(Vec::new()).unwrap();
        assert!(series.is_empty());
        assert!(matches!(series.normalization(), Err(Z2nError::EmptySeries)));
    }

    #[test]
    fn test_rejects_nan() {
        let result = TimeSeries::new(vec![1.0, f64::NAN]);
        assert!(matches!(result, Err(Z2nError::SeriesLoad(_))));
    }

    #[test]
    fn test_closure_loader() {
        let loader = |_: &Path| -> std::result::Result<Vec<f64>, io::Error> { Ok(vec![1.0, 2.0]) };
        let series = loader.load(Path::new("events.txt")).unwrap();
        assert_eq!(series.len(), 2);

        let failing = |p: &Path| -> std::result::Result<Vec<f64>, io::Error> {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                p.display().to_string(),
            ))
        };
        let err = failing.load(Path::new("missing.fits")).unwrap_err();
        assert!(matches!(err, Z2nError::SeriesLoad(_)));
        assert!(err.to_string().contains("missing.fits"));
    }
}
