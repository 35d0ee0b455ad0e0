//! Producer boundary
//!
//! A producer captures one feature packet (and optionally one preview frame)
//! per instant and reports lifecycle events. It runs isolated from the
//! consumer, either as an OS process speaking the JSON-lines [`wire`]
//! protocol or as a supervised thread with panic containment, and talks to
//! the consumer only through the three [`channels`]:
//!
//! - data: unbounded, FIFO, lossless
//! - frame: bounded to two in-flight frames, newest wins
//! - status: Info / Warning / Error / Completed

pub mod channels;
pub mod host;
pub mod launcher;
pub mod scripted;
pub mod synthetic;
pub mod wire;

pub use channels::{producer_channels, ChannelRead, ProducerChannels, ProducerSink};
pub use host::ProducerHandle;
pub use launcher::{
    launcher_from_config, InProcessFeed, InProcessLauncher, ProcessLauncher, ProducerLauncher,
    ThreadLauncher,
};
pub use scripted::{ScriptStep, ScriptedProducer};
pub use synthetic::SyntheticProducer;
pub use wire::WireMessage;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::defaults::PRODUCER_ERROR_BACKOFF_MS;
use crate::types::{DataPacket, Frame, StatusEvent};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("producer initialisation failed: {0}")]
    Init(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("producer did not become ready within {0:?}")]
    StartupTimeout(Duration),

    #[error("failed to spawn producer process '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("producer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire protocol error: {0}")]
    Wire(#[from] serde_json::Error),
}

// ============================================================================
// Producer Trait
// ============================================================================

/// Output of one capture step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capture {
    pub packet: Option<DataPacket>,
    pub frame: Option<Frame>,
}

impl Capture {
    pub fn packet(packet: DataPacket) -> Self {
        Self {
            packet: Some(packet),
            frame: None,
        }
    }

    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.frame = Some(frame);
        self
    }
}

/// Black-box source of feature packets (detection / tracking / landmark
/// extraction lives behind this trait).
///
/// Runs on its own thread or process; calls may block.
pub trait FeatureProducer: Send + 'static {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Open sources and load models. Failure aborts the start.
    fn initialize(&mut self) -> Result<(), ProducerError> {
        Ok(())
    }

    /// Capture the next instant. `Ok(None)` means the source is exhausted.
    fn next_capture(&mut self) -> Result<Option<Capture>, ProducerError>;

    /// Release resources. Called once after the capture loop ends.
    fn shutdown(&mut self) {}
}

/// Where the capture loop delivers its output.
///
/// Each method returns `false` once the consumer is gone.
pub trait CaptureSink {
    fn send_packet(&self, packet: DataPacket) -> bool;
    fn send_frame(&self, frame: Frame) -> bool;
    fn send_status(&self, event: StatusEvent) -> bool;
}

// ============================================================================
// Capture Loop
// ============================================================================

/// Drive `producer` until it is exhausted, the consumer disappears or
/// `running` is cleared.
///
/// `on_ready` is called exactly once: with `Ok` after a successful
/// initialisation, or with the error message before returning early.
/// Mid-stream failures are reported as status Error followed by a short
/// back-off; exhaustion is reported as status Completed.
pub fn run_capture_loop<P, S, R>(producer: &mut P, sink: &S, running: &AtomicBool, on_ready: R)
where
    P: FeatureProducer + ?Sized,
    S: CaptureSink,
    R: FnOnce(Result<(), String>),
{
    if let Err(e) = producer.initialize() {
        warn!("[{}] Initialisation failed: {}", producer.name(), e);
        sink.send_status(StatusEvent::error(format!("{e}")));
        on_ready(Err(e.to_string()));
        return;
    }
    on_ready(Ok(()));
    info!("[{}] Capture loop started", producer.name());

    let mut captures = 0u64;
    while running.load(Ordering::Acquire) {
        match producer.next_capture() {
            Ok(Some(capture)) => {
                captures += 1;
                let mut connected = true;
                if let Some(packet) = capture.packet {
                    connected &= sink.send_packet(packet);
                }
                if let Some(frame) = capture.frame {
                    connected &= sink.send_frame(frame);
                }
                if !connected {
                    info!("[{}] Consumer disconnected", producer.name());
                    break;
                }
            }
            Ok(None) => {
                info!("[{}] Source exhausted after {} captures", producer.name(), captures);
                sink.send_status(StatusEvent::completed("producer source exhausted"));
                break;
            }
            Err(e) => {
                warn!("[{}] Capture error: {}", producer.name(), e);
                if !sink.send_status(StatusEvent::error(format!("{e}"))) {
                    break;
                }
                backoff(running, Duration::from_millis(PRODUCER_ERROR_BACKOFF_MS));
            }
        }
    }

    producer.shutdown();
    info!("[{}] Capture loop finished", producer.name());
}

/// Sleep up to `total`, waking early once `running` is cleared.
fn backoff(running: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(20)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        packets: Mutex<Vec<DataPacket>>,
        statuses: Mutex<Vec<StatusEvent>>,
    }

    impl CaptureSink for RecordingSink {
        fn send_packet(&self, packet: DataPacket) -> bool {
            self.packets.lock().unwrap_or_else(|e| e.into_inner()).push(packet);
            true
        }
        fn send_frame(&self, _frame: Frame) -> bool {
            true
        }
        fn send_status(&self, event: StatusEvent) -> bool {
            self.statuses.lock().unwrap_or_else(|e| e.into_inner()).push(event);
            true
        }
    }

    #[test]
    fn test_loop_reports_completion_after_all_packets() {
        let mut producer = ScriptedProducer::from_packets(
            (0..3).map(|t| DataPacket::new(t as f64).with_value("ID_1", "happy", 0.5)),
        );
        let sink = RecordingSink::default();
        let running = AtomicBool::new(true);
        let mut ready = None;

        run_capture_loop(&mut producer, &sink, &running, |r| ready = Some(r));

        assert_eq!(ready, Some(Ok(())));
        assert_eq!(sink.packets.lock().expect("lock").len(), 3);
        let statuses = sink.statuses.lock().expect("lock");
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].kind, crate::types::StatusKind::Completed);
    }

    #[test]
    fn test_loop_reports_init_failure() {
        let mut producer = ScriptedProducer::failing_init("camera not found");
        let sink = RecordingSink::default();
        let running = AtomicBool::new(true);
        let mut ready = None;

        run_capture_loop(&mut producer, &sink, &running, |r| ready = Some(r));

        assert!(matches!(ready, Some(Err(ref msg)) if msg.contains("camera not found")));
        assert!(sink.packets.lock().expect("lock").is_empty());
        assert_eq!(
            sink.statuses.lock().expect("lock")[0].kind,
            crate::types::StatusKind::Error
        );
    }
}
