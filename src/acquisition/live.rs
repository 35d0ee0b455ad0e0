//! Live mode: consumes a producer through its three channels.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{AcquisitionError, ModeHandler, NextPacket};
use crate::config::defaults::LIVE_ID_PREFIX;
use crate::producer::{
    producer_channels, ChannelRead, ProducerChannels, ProducerHandle, ProducerLauncher,
};
use crate::session::Session;
use crate::types::{DataPacket, Frame, StatusEvent, StatusKind};

pub struct LiveMode {
    launcher: Box<dyn ProducerLauncher>,
    shutdown_grace: Duration,
    channels: Option<ProducerChannels>,
    handle: Option<ProducerHandle>,
    /// Data received before a Completed status, served ahead of EndOfData
    backlog: VecDeque<DataPacket>,
    completed: bool,
}

impl LiveMode {
    pub fn new(launcher: Box<dyn ProducerLauncher>, shutdown_grace: Duration) -> Self {
        Self {
            launcher,
            shutdown_grace,
            channels: None,
            handle: None,
            backlog: VecDeque::new(),
            completed: false,
        }
    }

    /// Whether the producer has reported Completed this run.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn accept(&mut self, packet: DataPacket, session: &mut Session) -> NextPacket {
        let new_ids = session.register_ids(
            packet
                .entity_ids()
                .filter(|id| id.starts_with(LIVE_ID_PREFIX))
                .cloned()
                .collect::<Vec<_>>(),
        );
        if !new_ids.is_empty() {
            info!("[LiveMode] New entities: {}", new_ids.join(", "));
        }
        NextPacket::Packet(packet)
    }
}

#[async_trait]
impl ModeHandler for LiveMode {
    fn name(&self) -> &'static str {
        "live"
    }

    fn check_ready(&self) -> Result<(), AcquisitionError> {
        Ok(())
    }

    async fn on_start(&mut self, session: &mut Session) -> Result<(), AcquisitionError> {
        session.restart(Vec::new());
        self.backlog.clear();
        self.completed = false;

        let (sink, channels) = producer_channels();
        info!("[LiveMode] Launching producer ({})", self.launcher.describe());
        let handle = self
            .launcher
            .launch(sink)
            .await
            .map_err(AcquisitionError::ProducerInit)?;
        info!("[LiveMode] Producer '{}' ready", handle.name());

        self.channels = Some(channels);
        self.handle = Some(handle);
        Ok(())
    }

    async fn on_stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown(self.shutdown_grace).await;
        }
        if let Some(mut channels) = self.channels.take() {
            let dropped = channels.drain_packets().len() + self.backlog.len();
            if dropped > 0 {
                debug!(dropped, "[LiveMode] Discarding unread packets on stop");
            }
        }
        self.backlog.clear();
    }

    fn next_packet(&mut self, session: &mut Session) -> NextPacket {
        if let Some(packet) = self.backlog.pop_front() {
            return self.accept(packet, session);
        }
        if self.completed {
            return NextPacket::EndOfData;
        }
        let read = match self.channels.as_mut() {
            Some(channels) => channels.try_next_packet(),
            None => return NextPacket::NoData,
        };
        match read {
            ChannelRead::Item(packet) => self.accept(packet, session),
            // A closed data channel without a status is reported by the
            // status path; here it is just an empty tick.
            ChannelRead::Empty | ChannelRead::Closed => NextPacket::NoData,
        }
    }

    fn drain_status(&mut self) -> Vec<StatusEvent> {
        let Some(channels) = self.channels.as_mut() else {
            return Vec::new();
        };
        let events = channels.drain_status();
        if events.iter().any(|e| e.kind == StatusKind::Completed) && !self.completed {
            // Everything the producer sent before Completed is already queued.
            self.backlog.extend(channels.drain_packets());
            self.completed = true;
            if !self.backlog.is_empty() {
                info!(
                    "[LiveMode] Producer completed with {} packets still buffered",
                    self.backlog.len()
                );
            }
        }
        for event in &events {
            if event.kind == StatusKind::Warning {
                warn!("[LiveMode] Producer: {}", event.text);
            }
        }
        events
    }

    fn latest_frame(&mut self) -> Option<Arc<Frame>> {
        self.channels.as_mut()?.latest_frame()
    }

    fn pending_packets(&self) -> usize {
        self.backlog.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::InProcessLauncher;

    fn packet(t: f64) -> DataPacket {
        DataPacket::new(t)
            .with_value("ID_2", "happy", 0.5)
            .with_value("ID_1", "sad", 0.1)
            .with_value("face", "yaw", 0.0)
    }

    #[tokio::test]
    async fn test_reads_are_non_blocking_and_fold_ids() {
        let (launcher, feed) = InProcessLauncher::pair();
        let mut mode = LiveMode::new(Box::new(launcher), Duration::from_millis(100));
        let mut session = Session::new();
        mode.on_start(&mut session).await.expect("start");

        assert_eq!(mode.next_packet(&mut session), NextPacket::NoData);
        assert!(feed.send_packet(packet(0.0)));
        assert!(matches!(mode.next_packet(&mut session), NextPacket::Packet(_)));
        assert_eq!(session.active_id_list(), vec!["ID_1".to_string(), "ID_2".to_string()]);
        assert_eq!(mode.next_packet(&mut session), NextPacket::NoData);

        mode.on_stop().await;
        assert!(!feed.is_connected());
    }

    #[tokio::test]
    async fn test_completed_serves_backlog_before_end() {
        let (launcher, feed) = InProcessLauncher::pair();
        let mut mode = LiveMode::new(Box::new(launcher), Duration::from_millis(100));
        let mut session = Session::new();
        mode.on_start(&mut session).await.expect("start");

        feed.send_packet(packet(0.0));
        feed.send_packet(packet(1.0));
        feed.send_status(StatusEvent::info("warming up"));
        feed.send_status(StatusEvent::completed("source exhausted"));

        let events = mode.drain_status();
        assert_eq!(events.len(), 2);
        assert!(mode.is_completed());
        assert_eq!(mode.pending_packets(), 2);

        assert!(matches!(mode.next_packet(&mut session), NextPacket::Packet(p) if p.timestamp == 0.0));
        assert!(matches!(mode.next_packet(&mut session), NextPacket::Packet(p) if p.timestamp == 1.0));
        assert_eq!(mode.next_packet(&mut session), NextPacket::EndOfData);
    }

    #[tokio::test]
    async fn test_start_clears_previous_run() {
        let (launcher, feed) = InProcessLauncher::pair();
        let mut mode = LiveMode::new(Box::new(launcher), Duration::from_millis(100));
        let mut session = Session::new();
        mode.on_start(&mut session).await.expect("start");
        feed.send_packet(packet(0.0));
        if let NextPacket::Packet(p) = mode.next_packet(&mut session) {
            session.append(p).expect("push");
        }
        mode.on_stop().await;

        mode.on_start(&mut session).await.expect("restart");
        assert!(session.history().is_empty());
        assert!(session.active_ids().is_empty());
        assert!(feed.is_connected());
        mode.on_stop().await;
    }
}
