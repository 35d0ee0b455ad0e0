//! Session state owned by the foreground loop
//!
//! History, active entity ids, focus and the derived per-window caches live
//! in one explicit [`Session`] object. Only the foreground controller holds
//! it mutably; background jobs get immutable snapshots.

mod history;

pub use history::{History, HistoryError, SeekError};

use std::collections::BTreeSet;

use crate::processing::FeatureAggregator;
use crate::types::{DataPacket, EntityId, Snapshot, WindowResults};

#[derive(Debug, Default)]
pub struct Session {
    history: History,
    /// Entities seen this session; only grows until reset
    active_ids: BTreeSet<EntityId>,
    /// Entities shown by the presentation boundary; empty means all
    focused_ids: BTreeSet<EntityId>,
    /// Last computed results and the index they were computed at
    caches: WindowResults,
    cached_index: Option<usize>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Append an acquired packet at the tail of the history.
    pub fn append(&mut self, packet: DataPacket) -> Result<(), HistoryError> {
        self.history.push(packet)
    }

    /// Swap in a recomputed recording (batch completion). On error the
    /// session is left untouched; on success the caches are cleared.
    pub fn adopt<I>(&mut self, packets: Vec<DataPacket>, ids: I) -> Result<(), HistoryError>
    where
        I: IntoIterator<Item = EntityId>,
    {
        self.history.replace(packets)?;
        self.set_active_ids(ids);
        self.caches = WindowResults::default();
        self.cached_index = None;
        Ok(())
    }

    pub fn active_ids(&self) -> &BTreeSet<EntityId> {
        &self.active_ids
    }

    /// Active ids in display order.
    pub fn active_id_list(&self) -> Vec<EntityId> {
        self.active_ids.iter().cloned().collect()
    }

    /// Fold ids into the active set, returning the newly added ones (sorted).
    pub fn register_ids<I>(&mut self, ids: I) -> Vec<EntityId>
    where
        I: IntoIterator<Item = EntityId>,
    {
        let mut added: Vec<EntityId> = ids
            .into_iter()
            .filter(|id| self.active_ids.insert(id.clone()))
            .collect();
        added.sort();
        added
    }

    /// Fold every entity of `packet` into the active set.
    pub fn register_packet_ids(&mut self, packet: &DataPacket) -> Vec<EntityId> {
        self.register_ids(packet.entity_ids().cloned().collect::<Vec<_>>())
    }

    /// Replace the active set (loading a replay dataset).
    pub fn set_active_ids<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = EntityId>,
    {
        self.active_ids = ids.into_iter().collect();
    }

    pub fn focused_ids(&self) -> &BTreeSet<EntityId> {
        &self.focused_ids
    }

    pub fn set_focus<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = EntityId>,
    {
        self.focused_ids = ids.into_iter().collect();
    }

    pub fn caches(&self) -> &WindowResults {
        &self.caches
    }

    pub fn cached_index(&self) -> Option<usize> {
        self.cached_index
    }

    pub fn store_results(&mut self, index: usize, results: WindowResults) {
        self.caches = results;
        self.cached_index = Some(index);
    }

    /// Compute both windows ending at `index` for every active entity.
    pub fn compute_at(
        &self,
        aggregator: &FeatureAggregator,
        index: usize,
        window: usize,
    ) -> Result<Snapshot, SeekError> {
        self.history.check_index(index)?;
        let (full, sliding, timestamp) = match (
            self.history.full(index),
            self.history.sliding(index, window),
            self.history.get(index),
        ) {
            (Some(f), Some(s), Some(p)) => (f, s, p.timestamp),
            _ => {
                return Err(SeekError::IndexOutOfRange {
                    index,
                    len: self.history.len(),
                })
            }
        };

        let ids = self.active_id_list();
        let results = WindowResults {
            full: aggregator.aggregate(full, &ids),
            sliding: aggregator.aggregate(sliding, &ids),
        };

        Ok(Snapshot {
            index,
            timestamp,
            results,
            entity_ids: ids,
            variables: aggregator.variables().to_vec(),
        })
    }

    /// Start a fresh acquisition run: empty history and caches, `ids` as the
    /// active set. Focus survives.
    pub fn restart<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = EntityId>,
    {
        self.history.clear();
        self.set_active_ids(ids);
        self.caches = WindowResults::default();
        self.cached_index = None;
    }

    /// Clear history, ids, focus and caches.
    pub fn reset(&mut self) {
        self.history.clear();
        self.active_ids.clear();
        self.focused_ids.clear();
        self.caches = WindowResults::default();
        self.cached_index = None;
    }
}
