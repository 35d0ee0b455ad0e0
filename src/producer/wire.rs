//! JSON-lines protocol between a producer process and the consumer.
//!
//! One message per line on the producer's stdout:
//!
//! ```text
//! {"type":"ready"}
//! {"type":"data","timestamp":0.0,"entities":{"ID_1":{"happy":0.5}}}
//! {"type":"frame","timestamp":0.0,"width":32,"height":24,"data":[...]}
//! {"type":"status","kind":"completed","text":"..."}
//! ```
//!
//! The consumer requests termination by closing the producer's stdin.
//! Diagnostics go to stderr.

use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{run_capture_loop, CaptureSink, FeatureProducer, ProducerError};
use crate::types::{DataPacket, Frame, StatusEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
    /// Initialisation finished; captures follow
    Ready,
    Data(DataPacket),
    Frame(Frame),
    Status(StatusEvent),
}

pub fn encode(message: &WireMessage) -> Result<String, ProducerError> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode(line: &str) -> Result<WireMessage, ProducerError> {
    Ok(serde_json::from_str(line.trim())?)
}

// ============================================================================
// Producer Side
// ============================================================================

/// Writes wire messages to a line-oriented output.
pub struct WireWriter<W: Write> {
    out: Mutex<W>,
}

impl<W: Write> WireWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn write(&self, message: &WireMessage) -> bool {
        let line = match encode(message) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("[WireWriter] Failed to encode message: {}", e);
                return true;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{line}").and_then(|_| out.flush()).is_ok()
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write> CaptureSink for WireWriter<W> {
    fn send_packet(&self, packet: DataPacket) -> bool {
        self.write(&WireMessage::Data(packet))
    }

    fn send_frame(&self, frame: Frame) -> bool {
        self.write(&WireMessage::Frame(frame))
    }

    fn send_status(&self, event: StatusEvent) -> bool {
        self.write(&WireMessage::Status(event))
    }
}

/// Run `producer` behind the wire protocol on `output`, stopping when
/// `running` is cleared.
pub fn serve<P, W>(producer: &mut P, output: W, running: &AtomicBool) -> Result<(), ProducerError>
where
    P: FeatureProducer + ?Sized,
    W: Write,
{
    let writer = WireWriter::new(output);
    let mut init_error = None;
    run_capture_loop(producer, &writer, running, |ready| match ready {
        Ok(()) => {
            writer.write(&WireMessage::Ready);
        }
        Err(msg) => init_error = Some(msg),
    });
    match init_error {
        Some(msg) => Err(ProducerError::Init(msg)),
        None => Ok(()),
    }
}

/// Serve `producer` on stdout. A background thread watches stdin and stops
/// the capture loop when the consumer closes it.
pub fn serve_stdio<P>(producer: &mut P) -> Result<(), ProducerError>
where
    P: FeatureProducer + ?Sized,
{
    let running = Arc::new(AtomicBool::new(true));
    let watcher_flag = Arc::clone(&running);
    std::thread::Builder::new()
        .name("stdin-watch".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            let mut lock = stdin.lock();
            let mut line = String::new();
            // Any input is ignored; EOF is the termination request.
            while matches!(lock.read_line(&mut line), Ok(n) if n > 0) {
                line.clear();
            }
            watcher_flag.store(false, Ordering::Release);
        })?;

    serve(producer, std::io::stdout(), &running)
}
