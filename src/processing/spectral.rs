//! Power-law slope of a sample series' amplitude spectrum.
//!
//! rFFT at unit sample spacing, amplitude `|X_k| / (n/2)`, positive bins
//! only, then an ordinary least-squares fit of `log10(amplitude)` on
//! `log10(frequency)`. Too few samples, too few usable bins or a degenerate
//! regression all yield the zero/absent default rather than an error.

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use statrs::statistics::Statistics;
use std::sync::{Arc, Mutex};

use super::ProcessingError;
use crate::config::defaults::{MIN_BINS_FOR_FIT, MIN_SAMPLES_FOR_SPECTRUM};
use crate::types::PowerSpectrum;

// ============================================================================
// FFT
// ============================================================================

/// One-sided amplitude spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct AmplitudeSpectrum {
    /// `k / n` for `k = 0..=n/2`
    pub frequencies: Vec<f64>,
    /// `|X_k| / (n/2)`
    pub amplitudes: Vec<f64>,
}

/// Real-input FFT with plan reuse across calls of the same length.
///
/// Windows grow by one sample per tick, so lengths vary; the planner caches
/// every length it has seen.
pub struct FftProcessor {
    planner: Mutex<FftPlanner<f64>>,
}

impl Default for FftProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl FftProcessor {
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(FftPlanner::new()),
        }
    }

    fn plan(&self, len: usize) -> Arc<dyn Fft<f64>> {
        self.planner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .plan_fft_forward(len)
    }

    /// Exact-length rFFT of `samples` (no padding, unit sample spacing).
    pub fn amplitude_spectrum(&self, samples: &[f64]) -> Result<AmplitudeSpectrum, ProcessingError> {
        let n = samples.len();
        if n < 2 {
            return Err(ProcessingError::InsufficientData {
                needed: 2,
                available: n,
            });
        }

        let mut buffer: Vec<Complex<f64>> =
            samples.iter().map(|&x| Complex::new(x, 0.0)).collect();
        self.plan(n).process(&mut buffer);

        let n_positive = n / 2 + 1;
        let scale = n as f64 / 2.0;

        let frequencies = (0..n_positive).map(|k| k as f64 / n as f64).collect();
        let amplitudes = buffer
            .iter()
            .take(n_positive)
            .map(|c| c.norm() / scale)
            .collect();

        Ok(AmplitudeSpectrum {
            frequencies,
            amplitudes,
        })
    }
}

// ============================================================================
// Slope Fit
// ============================================================================

/// Result of fitting one series.
#[derive(Debug, Clone, PartialEq)]
pub enum SpectralFit {
    /// Too few samples or bins, or a rank-deficient regression
    Degenerate,
    Fitted(PowerSpectrum),
}

impl SpectralFit {
    /// Fitted slope, or 0 for a degenerate input.
    pub fn slope(&self) -> f64 {
        match self {
            SpectralFit::Degenerate => 0.0,
            SpectralFit::Fitted(spectrum) => spectrum.slope,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        matches!(self, SpectralFit::Degenerate)
    }

    pub fn into_spectrum(self) -> Option<PowerSpectrum> {
        match self {
            SpectralFit::Degenerate => None,
            SpectralFit::Fitted(spectrum) => Some(spectrum),
        }
    }
}

/// Computes the power-law slope/intercept descriptor of a sample series.
pub struct SpectralFeatureEngine {
    fft: FftProcessor,
    min_samples: usize,
}

impl Default for SpectralFeatureEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectralFeatureEngine {
    pub fn new() -> Self {
        Self {
            fft: FftProcessor::new(),
            min_samples: MIN_SAMPLES_FOR_SPECTRUM,
        }
    }

    /// Fit one series. Non-finite samples are dropped before counting.
    pub fn analyze(&self, samples: &[f64]) -> SpectralFit {
        let values: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        if values.len() < self.min_samples {
            return SpectralFit::Degenerate;
        }

        let spectrum = match self.fft.amplitude_spectrum(&values) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!("[SpectralEngine] {}", e);
                return SpectralFit::Degenerate;
            }
        };

        let (frequencies, amplitudes): (Vec<f64>, Vec<f64>) = spectrum
            .frequencies
            .into_iter()
            .zip(spectrum.amplitudes)
            .filter(|(f, a)| *f > 0.0 && *a > 0.0)
            .unzip();
        if frequencies.len() < MIN_BINS_FOR_FIT {
            return SpectralFit::Degenerate;
        }

        let log_freq: Vec<f64> = frequencies.iter().map(|f| f.log10()).collect();
        let log_amp: Vec<f64> = amplitudes.iter().map(|a| a.log10()).collect();

        match fit_line(&log_freq, &log_amp) {
            Ok((slope, intercept)) => SpectralFit::Fitted(PowerSpectrum {
                frequencies,
                amplitudes,
                slope,
                intercept,
            }),
            Err(e) => {
                tracing::debug!("[SpectralEngine] {}", e);
                SpectralFit::Degenerate
            }
        }
    }
}

/// Degree-1 ordinary least squares, returns `(slope, intercept)`.
fn fit_line(x: &[f64], y: &[f64]) -> Result<(f64, f64), ProcessingError> {
    if x.len() < 2 || x.len() != y.len() {
        return Err(ProcessingError::InsufficientData {
            needed: 2,
            available: x.len().min(y.len()),
        });
    }

    let var_x = x.iter().variance();
    if !var_x.is_finite() || var_x <= f64::EPSILON {
        return Err(ProcessingError::DegenerateFit(format!(
            "predictor variance {var_x}"
        )));
    }

    let slope = x.iter().covariance(y.iter()) / var_x;
    let intercept = y.iter().mean() - slope * x.iter().mean();
    if !slope.is_finite() || !intercept.is_finite() {
        return Err(ProcessingError::DegenerateFit(
            "non-finite coefficients".to_string(),
        ));
    }
    Ok((slope, intercept))
}

// ============================================================================
// Tests
// ============================================================================
