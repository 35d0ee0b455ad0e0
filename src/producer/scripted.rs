//! Replays a fixed script of captures, failures and panics.
//!
//! Used for demos of the producer boundary and for exercising the hosts'
//! failure handling deterministically.

use std::collections::VecDeque;
use std::time::Duration;

use super::{Capture, FeatureProducer, ProducerError};
use crate::types::DataPacket;

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Capture(Capture),
    /// Mid-stream capture failure
    Fail(String),
    /// Unrecoverable bug inside the producer
    Panic(String),
}

pub struct ScriptedProducer {
    steps: VecDeque<ScriptStep>,
    init_error: Option<String>,
    pacing: Duration,
    /// Keep returning empty captures instead of reporting exhaustion
    hold_open: bool,
}

impl ScriptedProducer {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            init_error: None,
            pacing: Duration::ZERO,
            hold_open: false,
        }
    }

    pub fn from_packets(packets: impl IntoIterator<Item = DataPacket>) -> Self {
        Self::new(packets.into_iter().map(|p| ScriptStep::Capture(Capture::packet(p))))
    }

    pub fn failing_init(message: &str) -> Self {
        let mut producer = Self::new(Vec::new());
        producer.init_error = Some(message.to_string());
        producer
    }

    /// Sleep this long before every step.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Never report exhaustion; idle once the script runs out.
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

impl FeatureProducer for ScriptedProducer {
    fn name(&self) -> &str {
        "Scripted"
    }

    fn initialize(&mut self) -> Result<(), ProducerError> {
        match self.init_error.take() {
            Some(msg) => Err(ProducerError::Init(msg)),
            None => Ok(()),
        }
    }

    #[allow(clippy::panic)]
    fn next_capture(&mut self) -> Result<Option<Capture>, ProducerError> {
        if !self.pacing.is_zero() {
            std::thread::sleep(self.pacing);
        }
        match self.steps.pop_front() {
            Some(ScriptStep::Capture(capture)) => Ok(Some(capture)),
            Some(ScriptStep::Fail(msg)) => Err(ProducerError::Capture(msg)),
            Some(ScriptStep::Panic(msg)) => panic!("{msg}"),
            None if self.hold_open => {
                std::thread::sleep(Duration::from_millis(10));
                Ok(Some(Capture::default()))
            }
            None => Ok(None),
        }
    }
}
