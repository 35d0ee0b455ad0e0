//! Builds one window's FeatureMatrix and spectra from a history slice.

use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::SpectralFeatureEngine;
use crate::types::{DataPacket, EntityId, PowerSpectrum, VariableName, WindowFeatures};

/// Per-entity FeatureMatrix row and fitted spectra.
pub type EntityFeatures = (BTreeMap<VariableName, f64>, BTreeMap<VariableName, PowerSpectrum>);

/// Runs the spectral engine over every (entity, variable) pair of a slice.
///
/// Stateless apart from the variable catalogue and the shared FFT planner:
/// the output depends only on the slice and the ids passed in.
#[derive(Clone)]
pub struct FeatureAggregator {
    engine: Arc<SpectralFeatureEngine>,
    variables: Arc<[VariableName]>,
}

impl FeatureAggregator {
    pub fn new(variables: Vec<VariableName>) -> Self {
        Self {
            engine: Arc::new(SpectralFeatureEngine::new()),
            variables: variables.into(),
        }
    }

    pub fn variables(&self) -> &[VariableName] {
        &self.variables
    }

    /// Compute the window for `ids` over `slice`. Entities are processed in
    /// parallel; every row covers every known variable.
    pub fn aggregate(&self, slice: &[DataPacket], ids: &[EntityId]) -> WindowFeatures {
        let rows: Vec<(EntityId, EntityFeatures)> = ids
            .par_iter()
            .map(|id| (id.clone(), self.aggregate_entity(slice, id)))
            .collect();

        let mut window = WindowFeatures::default();
        for (id, (row, spectra)) in rows {
            if !spectra.is_empty() {
                window.spectra.insert(id.clone(), spectra);
            }
            window.features.insert(id, row);
        }
        window
    }

    /// One entity's row. Absent variables get slope 0 and no spectrum.
    pub fn aggregate_entity(&self, slice: &[DataPacket], id: &str) -> EntityFeatures {
        let mut row = BTreeMap::new();
        let mut spectra = BTreeMap::new();

        for var in self.variables.iter() {
            let samples: Vec<f64> = slice.iter().filter_map(|p| p.value(id, var)).collect();
            let fit = self.engine.analyze(&samples);
            row.insert(var.clone(), fit.slope());
            if let Some(spectrum) = fit.into_spectrum() {
                spectra.insert(var.clone(), spectrum);
            }
        }

        (row, spectra)
    }
}
