//! Computed feature state: per-window feature matrices, power spectra and snapshots.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{EntityId, VariableName};

/// entity -> (variable -> slope). Missing or degenerate inputs carry slope 0.
pub type FeatureMatrix = BTreeMap<EntityId, BTreeMap<VariableName, f64>>;

/// entity -> (variable -> spectrum). Only fitted pairs are present.
pub type SpectrumRecords = BTreeMap<EntityId, BTreeMap<VariableName, PowerSpectrum>>;

/// Log-log power-law fit of one variable's amplitude spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSpectrum {
    /// Positive frequency bins that survived filtering (cycles/sample)
    pub frequencies: Vec<f64>,
    /// Amplitude at each kept bin, `|FFT| / (n/2)`
    pub amplitudes: Vec<f64>,
    /// Power-law exponent (fitted slope of log10 amplitude vs log10 frequency)
    pub slope: f64,
    /// Fitted constant of the same regression
    pub intercept: f64,
}

/// FeatureMatrix + spectra for one window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowFeatures {
    pub features: FeatureMatrix,
    pub spectra: SpectrumRecords,
}

impl WindowFeatures {
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn slope(&self, entity: &str, variable: &str) -> Option<f64> {
        self.features.get(entity)?.get(variable).copied()
    }

    pub fn spectrum(&self, entity: &str, variable: &str) -> Option<&PowerSpectrum> {
        self.spectra.get(entity)?.get(variable)
    }

    /// Copy restricted to `ids`. An empty set keeps every entity.
    pub fn filtered(&self, ids: &BTreeSet<EntityId>) -> Self {
        if ids.is_empty() {
            return self.clone();
        }
        Self {
            features: self
                .features
                .iter()
                .filter(|(id, _)| ids.contains(*id))
                .map(|(id, row)| (id.clone(), row.clone()))
                .collect(),
            spectra: self
                .spectra
                .iter()
                .filter(|(id, _)| ids.contains(*id))
                .map(|(id, row)| (id.clone(), row.clone()))
                .collect(),
        }
    }
}

/// Window name under which results are cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Full,
    Sliding,
}

impl Window {
    pub fn as_str(&self) -> &'static str {
        match self {
            Window::Full => "full",
            Window::Sliding => "sliding",
        }
    }
}

/// Results for both windows at one history index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowResults {
    pub full: WindowFeatures,
    pub sliding: WindowFeatures,
}

impl WindowResults {
    pub fn get(&self, window: Window) -> &WindowFeatures {
        match window {
            Window::Full => &self.full,
            Window::Sliding => &self.sliding,
        }
    }

    pub fn filtered(&self, ids: &BTreeSet<EntityId>) -> Self {
        Self {
            full: self.full.filtered(ids),
            sliding: self.sliding.filtered(ids),
        }
    }
}

/// Immutable computed state taken at one history index.
///
/// Export and batch completion work from a snapshot so later history growth
/// cannot change what an in-flight job sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// History index the windows end at
    pub index: usize,
    /// Timestamp of the packet at `index`
    pub timestamp: f64,
    pub results: WindowResults,
    /// Entities the windows were computed for, in display order
    pub entity_ids: Vec<EntityId>,
    /// Variables every FeatureMatrix row covers, in display order
    pub variables: Vec<VariableName>,
}

impl Snapshot {
    pub fn full(&self) -> &WindowFeatures {
        &self.results.full
    }

    pub fn sliding(&self) -> &WindowFeatures {
        &self.results.sliding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WindowFeatures {
        let mut wf = WindowFeatures::default();
        for id in ["ID_1", "ID_2"] {
            wf.features
                .entry(id.to_string())
                .or_default()
                .insert("happy".to_string(), -1.0);
        }
        wf
    }

    #[test]
    fn test_filtered_empty_focus_keeps_all() {
        let wf = sample();
        assert_eq!(wf.filtered(&BTreeSet::new()), wf);
    }

    #[test]
    fn test_filtered_restricts_rows() {
        let focus: BTreeSet<EntityId> = ["ID_2".to_string()].into_iter().collect();
        let wf = sample().filtered(&focus);
        assert_eq!(wf.features.len(), 1);
        assert_eq!(wf.slope("ID_2", "happy"), Some(-1.0));
        assert_eq!(wf.slope("ID_1", "happy"), None);
    }
}
