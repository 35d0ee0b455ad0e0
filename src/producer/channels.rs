//! The three producer -> consumer channels.
//!
//! Data and status are unbounded FIFO queues. Frames go through a broadcast
//! ring of two slots: a producer never blocks on a slow consumer, the oldest
//! frame is overwritten, and the consumer drains to the newest one.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use super::CaptureSink;
use crate::config::defaults::FRAME_CHANNEL_CAPACITY;
use crate::types::{DataPacket, Frame, StatusEvent};

/// Result of a non-blocking read.
#[derive(Debug, PartialEq)]
pub enum ChannelRead<T> {
    Item(T),
    /// Nothing queued right now
    Empty,
    /// Producer side is gone and the queue is drained
    Closed,
}

/// Producer half. Cheap to clone; every clone feeds the same consumer.
#[derive(Clone)]
pub struct ProducerSink {
    data: mpsc::UnboundedSender<DataPacket>,
    frames: broadcast::Sender<Arc<Frame>>,
    status: mpsc::UnboundedSender<StatusEvent>,
}

/// Consumer half, owned by the live acquisition mode.
pub struct ProducerChannels {
    data: mpsc::UnboundedReceiver<DataPacket>,
    frames: broadcast::Receiver<Arc<Frame>>,
    status: mpsc::UnboundedReceiver<StatusEvent>,
}

/// Create a connected sink / channels pair.
pub fn producer_channels() -> (ProducerSink, ProducerChannels) {
    let (data_tx, data_rx) = mpsc::unbounded_channel();
    let (frame_tx, frame_rx) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
    let (status_tx, status_rx) = mpsc::unbounded_channel();
    (
        ProducerSink {
            data: data_tx,
            frames: frame_tx,
            status: status_tx,
        },
        ProducerChannels {
            data: data_rx,
            frames: frame_rx,
            status: status_rx,
        },
    )
}

impl CaptureSink for ProducerSink {
    fn send_packet(&self, packet: DataPacket) -> bool {
        self.data.send(packet).is_ok()
    }

    fn send_frame(&self, frame: Frame) -> bool {
        // A full ring drops its oldest frame; only a missing receiver is an error.
        if self.frames.receiver_count() == 0 {
            return false;
        }
        let _ = self.frames.send(Arc::new(frame));
        true
    }

    fn send_status(&self, event: StatusEvent) -> bool {
        self.status.send(event).is_ok()
    }
}

impl ProducerSink {
    /// Whether the consumer half still exists.
    pub fn is_connected(&self) -> bool {
        !self.data.is_closed()
    }
}

impl ProducerChannels {
    /// Non-blocking read of the next packet in emission order.
    pub fn try_next_packet(&mut self) -> ChannelRead<DataPacket> {
        match self.data.try_recv() {
            Ok(packet) => ChannelRead::Item(packet),
            Err(mpsc::error::TryRecvError::Empty) => ChannelRead::Empty,
            Err(mpsc::error::TryRecvError::Disconnected) => ChannelRead::Closed,
        }
    }

    /// Drain every buffered packet.
    pub fn drain_packets(&mut self) -> Vec<DataPacket> {
        let mut packets = Vec::new();
        while let ChannelRead::Item(p) = self.try_next_packet() {
            packets.push(p);
        }
        packets
    }

    /// Drain the frame ring and keep only the newest frame.
    pub fn latest_frame(&mut self) -> Option<Arc<Frame>> {
        let mut latest = None;
        loop {
            match self.frames.try_recv() {
                Ok(frame) => latest = Some(frame),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::trace!(skipped, "[ProducerChannels] Dropped stale frames");
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => break,
            }
        }
        latest
    }

    /// Drain all pending status events in emission order.
    pub fn drain_status(&mut self) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.status.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: f64) -> Frame {
        Frame {
            timestamp: ts,
            width: 2,
            height: 1,
            data: vec![0, 255],
        }
    }

    #[test]
    fn test_data_channel_is_lossless_fifo() {
        let (sink, mut channels) = producer_channels();
        for t in 0..100 {
            assert!(sink.send_packet(DataPacket::new(t as f64)));
        }
        let drained = channels.drain_packets();
        assert_eq!(drained.len(), 100);
        assert!(drained.iter().enumerate().all(|(i, p)| p.timestamp == i as f64));
        assert_eq!(channels.try_next_packet(), ChannelRead::Empty);

        drop(sink);
        assert_eq!(channels.try_next_packet(), ChannelRead::Closed);
    }

    #[test]
    fn test_frame_channel_keeps_latest() {
        let (sink, mut channels) = producer_channels();
        for t in 0..10 {
            assert!(sink.send_frame(frame(t as f64)));
        }
        let latest = channels.latest_frame().expect("a frame survives");
        assert_eq!(latest.timestamp, 9.0);
        assert!(channels.latest_frame().is_none());
    }

    #[test]
    fn test_status_drain_preserves_order() {
        let (sink, mut channels) = producer_channels();
        sink.send_status(StatusEvent::info("a"));
        sink.send_status(StatusEvent::warning("b"));
        sink.send_status(StatusEvent::completed("c"));

        let texts: Vec<String> = channels.drain_status().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sink_detects_dropped_consumer() {
        let (sink, channels) = producer_channels();
        assert!(sink.is_connected());
        drop(channels);
        assert!(!sink.is_connected());
        assert!(!sink.send_packet(DataPacket::new(0.0)));
        assert!(!sink.send_frame(frame(0.0)));
    }
}
