//! Live metrics computed per incoming reading.
//!
//! Everything here runs on the sample path at full device rate, so nothing
//! allocates: the reductions walk the input slice once.

use std::fmt;
use std::time::Instant;

use crate::error::MetricsError;

/// Peak amplitude (µV) at or above which a reference reading counts as a blink.
pub const BLINK_THRESHOLD: f64 = 95.0;

/// Number of intervals averaged per frame-rate report.
pub const FRAME_RATE_WINDOW: usize = 20;

/// Root-mean-square of `samples`.
pub fn rms<T: Copy + Into<f64>>(samples: &[T]) -> Result<f64, MetricsError> {
    if samples.is_empty() {
        return Err(MetricsError::EmptyInput);
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&v| {
            let v = v.into();
            v * v
        })
        .sum();
    Ok((sum_sq / samples.len() as f64).sqrt())
}

/// Arithmetic mean of `samples`.
pub fn average<T: Copy + Into<f64>>(samples: &[T]) -> Result<f64, MetricsError> {
    if samples.is_empty() {
        return Err(MetricsError::EmptyInput);
    }
    let sum: f64 = samples.iter().map(|&v| v.into()).sum();
    Ok(sum / samples.len() as f64)
}

/// Largest absolute value in `samples`.
pub fn max_abs(samples: &[f64]) -> Result<f64, MetricsError> {
    samples
        .iter()
        .map(|v| v.abs())
        .reduce(f64::max)
        .ok_or(MetricsError::EmptyInput)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkState {
    EyesOpen,
    Blink,
}

impl BlinkState {
    /// Stateless per-reading classification; the threshold is inclusive.
    pub fn classify(samples: &[f64]) -> Result<Self, MetricsError> {
        Ok(if max_abs(samples)? >= BLINK_THRESHOLD {
            BlinkState::Blink
        } else {
            BlinkState::EyesOpen
        })
    }
}

impl fmt::Display for BlinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlinkState::Blink => f.write_str("(>*.*)> Blink"),
            BlinkState::EyesOpen => f.write_str("(>o.o)> Eyes Open"),
        }
    }
}

/// Windowed estimate of how often reference-electrode readings arrive.
///
/// Each arrival contributes `1000 / Δt_ms`; after [`FRAME_RATE_WINDOW`]
/// contributions the window mean is reported and the accumulator resets.
/// The first arrival and zero-length intervals contribute nothing.
#[derive(Debug, Default)]
pub struct FrameRateEstimator {
    last: Option<Instant>,
    sum: f64,
    count: usize,
}

impl FrameRateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an arrival at `now`; returns the window mean when one completes.
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        let previous = self.last.replace(now);
        let dt_ms = now.saturating_duration_since(previous?).as_secs_f64() * 1000.0;
        let rate = 1000.0 / dt_ms;
        if !rate.is_finite() {
            return None;
        }
        self.sum += rate;
        self.count += 1;
        if self.count < FRAME_RATE_WINDOW {
            return None;
        }
        let mean = self.sum / FRAME_RATE_WINDOW as f64;
        self.sum = 0.0;
        self.count = 0;
        Some(mean)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn rms_is_nonnegative_and_zero_only_for_zeros() {
        assert_eq!(rms(&[0.0, 0.0, 0.0]).unwrap(), 0.0);
        assert!((rms(&[3.0, -4.0]).unwrap() - (12.5f64).sqrt()).abs() < 1e-12);
        assert!(rms(&[-1.0]).unwrap() > 0.0);
        assert!(rms(&[0.0, 1e-9]).unwrap() > 0.0);
    }

    #[test]
    fn empty_input_fails_loudly() {
        assert_eq!(rms::<f64>(&[]), Err(MetricsError::EmptyInput));
        assert_eq!(average::<u32>(&[]), Err(MetricsError::EmptyInput));
        assert_eq!(BlinkState::classify(&[]), Err(MetricsError::EmptyInput));
    }

    #[test]
    fn average_of_integer_and_single_inputs() {
        assert_eq!(average(&[2u32, 4, 9]).unwrap(), 5.0);
        assert_eq!(average(&[-7.25]).unwrap(), -7.25);
    }

    #[test]
    fn blink_threshold_is_inclusive_on_magnitude() {
        assert_eq!(BlinkState::classify(&[0.0, 95.0]).unwrap(), BlinkState::Blink);
        assert_eq!(BlinkState::classify(&[-95.0, 3.0]).unwrap(), BlinkState::Blink);
        assert_eq!(BlinkState::classify(&[94.0, -94.0]).unwrap(), BlinkState::EyesOpen);
    }

    #[test]
    fn frame_rate_reports_every_window() {
        let mut est = FrameRateEstimator::new();
        let t0 = Instant::now();
        // first arrival has no interval
        assert_eq!(est.record(t0), None);
        let mut reported = vec![];
        for i in 1..=40u64 {
            if let Some(fps) = est.record(t0 + Duration::from_millis(50 * i)) {
                reported.push(fps);
            }
        }
        assert_eq!(reported.len(), 2);
        for fps in reported {
            assert!((fps - 20.0).abs() < 1e-9);
        }
    }

    #[test]
    fn zero_interval_is_excluded() {
        let mut est = FrameRateEstimator::new();
        let t0 = Instant::now();
        est.record(t0);
        assert_eq!(est.record(t0), None);
        assert_eq!(est.count, 0);
        est.record(t0 + Duration::from_millis(10));
        assert_eq!(est.count, 1);
    }
}
