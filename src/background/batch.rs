//! One-shot full-dataset recomputation on a background worker.

use std::sync::Arc;
use tracing::info;

use super::job::{JobError, JobHandle};
use crate::acquisition::ReplayDataset;
use crate::processing::FeatureAggregator;
use crate::session::History;
use crate::types::{EntityId, Snapshot, WindowFeatures, WindowResults};

/// Result of a batch run, applied to the session by the foreground.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// Rebuilt history (the whole dataset)
    pub history: History,
    /// Full window over the whole dataset; sliding is left empty
    pub results: WindowResults,
    pub entity_ids: Vec<EntityId>,
}

impl BatchOutput {
    /// Snapshot at the last history index, if the dataset had rows.
    pub fn snapshot(&self, variables: &[String]) -> Option<Snapshot> {
        let index = self.history.tip()?;
        let timestamp = self.history.get(index)?.timestamp;
        Some(Snapshot {
            index,
            timestamp,
            results: self.results.clone(),
            entity_ids: self.entity_ids.clone(),
            variables: variables.to_vec(),
        })
    }
}

pub struct BatchRunner;

impl BatchRunner {
    /// Recompute every entity over the whole dataset. One progress step per
    /// entity; cancellation is checked between entities.
    pub fn launch(
        dataset: Arc<ReplayDataset>,
        ids: Vec<EntityId>,
        aggregator: FeatureAggregator,
    ) -> JobHandle<BatchOutput> {
        JobHandle::spawn("batch", ids.len(), move |ctx| {
            let mut history = History::new();
            history
                .replace(dataset.packets().to_vec())
                .map_err(|e| JobError::Failed(e.to_string()))?;

            let mut full = WindowFeatures::default();
            for id in &ids {
                ctx.checkpoint()?;
                let (row, spectra) = aggregator.aggregate_entity(history.packets(), id);
                if !spectra.is_empty() {
                    full.spectra.insert(id.clone(), spectra);
                }
                full.features.insert(id.clone(), row);
                ctx.advance();
            }

            info!(
                "✓ Batch analysis: {} entities over {} packets",
                ids.len(),
                history.len()
            );
            Ok(BatchOutput {
                history,
                results: WindowResults {
                    full,
                    sliding: WindowFeatures::default(),
                },
                entity_ids: ids,
            })
        })
    }
}
