//! Replay mode: hands out a loaded dataset one row per tick.

use async_trait::async_trait;
use std::sync::Arc;

use super::{AcquisitionError, ModeHandler, NextPacket, ReplayDataset};
use crate::session::Session;

pub struct ReplayMode {
    dataset: Option<Arc<ReplayDataset>>,
    cursor: usize,
}

impl ReplayMode {
    pub fn new(dataset: Option<Arc<ReplayDataset>>) -> Self {
        Self { dataset, cursor: 0 }
    }

    pub fn dataset(&self) -> Option<&Arc<ReplayDataset>> {
        self.dataset.as_ref()
    }

    pub fn set_dataset(&mut self, dataset: Option<Arc<ReplayDataset>>) {
        self.dataset = dataset;
        self.cursor = 0;
    }

    /// Rows already handed out.
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

#[async_trait]
impl ModeHandler for ReplayMode {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn check_ready(&self) -> Result<(), AcquisitionError> {
        match &self.dataset {
            Some(ds) if !ds.is_empty() => Ok(()),
            Some(_) => Err(AcquisitionError::NotReady("dataset is empty".to_string())),
            None => Err(AcquisitionError::NotReady("no dataset loaded".to_string())),
        }
    }

    /// Every start replays from the first row.
    async fn on_start(&mut self, session: &mut Session) -> Result<(), AcquisitionError> {
        self.cursor = 0;
        let ids = self
            .dataset
            .as_ref()
            .map(|ds| ds.entity_ids().to_vec())
            .unwrap_or_default();
        session.restart(ids);
        Ok(())
    }

    async fn on_stop(&mut self) {}

    fn next_packet(&mut self, _session: &mut Session) -> NextPacket {
        match self.dataset.as_ref().and_then(|ds| ds.get(self.cursor)) {
            Some(packet) => {
                self.cursor += 1;
                NextPacket::Packet(packet.clone())
            }
            None => NextPacket::EndOfData,
        }
    }

    fn pending_packets(&self) -> usize {
        self.dataset
            .as_ref()
            .map(|ds| ds.len().saturating_sub(self.cursor))
            .unwrap_or(0)
    }
}
