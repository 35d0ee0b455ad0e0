//! Spectral feature extraction: power-law slope fitting and per-window aggregation

mod aggregator;
mod spectral;

pub use aggregator::{EntityFeatures, FeatureAggregator};
pub use spectral::{AmplitudeSpectrum, FftProcessor, SpectralFeatureEngine, SpectralFit};

use thiserror::Error;

/// Errors in signal processing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    #[error("Insufficient data: need {needed}, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("Degenerate regression: {0}")]
    DegenerateFit(String),
}
