//! Data acquisition: the Idle/Running/Paused state machine and its two modes
//!
//! - ReplayMode: deterministic iteration over a pre-loaded [`ReplayDataset`]
//! - LiveMode: non-blocking reads from a producer's data channel
//!
//! Shared start/stop/pause bookkeeping lives in [`AcquisitionStateMachine`];
//! the modes only implement their side effects through [`ModeHandler`].

pub mod dataset;
mod live;
mod replay;

pub use dataset::{DatasetError, ReplayDataset};
pub use live::LiveMode;
pub use replay::ReplayMode;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::producer::ProducerError;
use crate::session::Session;
use crate::types::{DataPacket, Frame, StatusEvent};

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("not ready: {0}")]
    NotReady(String),

    #[error("producer failed to initialise: {0}")]
    ProducerInit(#[source] ProducerError),

    #[error("cannot change mode while acquisition is {0}")]
    Busy(AcquisitionState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionState {
    #[default]
    Idle,
    Running,
    Paused,
}

impl std::fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionState::Idle => write!(f, "idle"),
            AcquisitionState::Running => write!(f, "running"),
            AcquisitionState::Paused => write!(f, "paused"),
        }
    }
}

/// Outcome of one `next_packet` call.
#[derive(Debug, Clone, PartialEq)]
pub enum NextPacket {
    Packet(DataPacket),
    /// Nothing available this tick; not an error
    NoData,
    /// Source exhausted
    EndOfData,
}

/// Mode-specific side effects of the acquisition state machine.
#[async_trait]
pub trait ModeHandler: Send {
    /// Human-readable name for logging.
    fn name(&self) -> &'static str;

    /// Precondition checked before anything is started.
    fn check_ready(&self) -> Result<(), AcquisitionError>;

    /// Start side effects. On error the machine stays Idle.
    async fn on_start(&mut self, session: &mut Session) -> Result<(), AcquisitionError>;

    /// Teardown side effects.
    async fn on_stop(&mut self);

    fn next_packet(&mut self, session: &mut Session) -> NextPacket;

    /// Status events emitted since the last call.
    fn drain_status(&mut self) -> Vec<StatusEvent> {
        Vec::new()
    }

    /// Most recent preview frame, if any arrived since the last call.
    fn latest_frame(&mut self) -> Option<Arc<Frame>> {
        None
    }

    /// Packets already received but not yet handed out.
    fn pending_packets(&self) -> usize {
        0
    }
}

/// The two acquisition variants.
pub enum AcquisitionMode {
    Replay(ReplayMode),
    Live(LiveMode),
}

impl AcquisitionMode {
    pub fn handler(&self) -> &dyn ModeHandler {
        match self {
            AcquisitionMode::Replay(m) => m,
            AcquisitionMode::Live(m) => m,
        }
    }

    pub fn handler_mut(&mut self) -> &mut dyn ModeHandler {
        match self {
            AcquisitionMode::Replay(m) => m,
            AcquisitionMode::Live(m) => m,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, AcquisitionMode::Live(_))
    }
}

// ============================================================================
// State Machine
// ============================================================================

/// `Idle -> Running <-> Paused -> Idle`, dispatching side effects to the
/// active mode.
pub struct AcquisitionStateMachine {
    state: AcquisitionState,
    mode: AcquisitionMode,
}

impl AcquisitionStateMachine {
    pub fn new(mode: AcquisitionMode) -> Self {
        Self {
            state: AcquisitionState::Idle,
            mode,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == AcquisitionState::Running
    }

    pub fn mode(&self) -> &AcquisitionMode {
        &self.mode
    }

    pub fn mode_mut(&mut self) -> &mut AcquisitionMode {
        &mut self.mode
    }

    /// Swap the mode. Only allowed while Idle.
    pub fn set_mode(&mut self, mode: AcquisitionMode) -> Result<(), AcquisitionError> {
        if self.state != AcquisitionState::Idle {
            return Err(AcquisitionError::Busy(self.state));
        }
        self.mode = mode;
        Ok(())
    }

    /// Enter Running. Returns `Ok(false)` if acquisition was already active.
    pub async fn start(&mut self, session: &mut Session) -> Result<bool, AcquisitionError> {
        if self.state != AcquisitionState::Idle {
            return Ok(false);
        }
        let handler = self.mode.handler_mut();
        handler.check_ready()?;
        handler.on_start(session).await?;
        self.state = AcquisitionState::Running;
        info!("[Acquisition] {} started", handler.name());
        Ok(true)
    }

    /// Return to Idle. Returns `false` if already Idle.
    pub async fn stop(&mut self) -> bool {
        if self.state == AcquisitionState::Idle {
            return false;
        }
        self.state = AcquisitionState::Idle;
        let handler = self.mode.handler_mut();
        handler.on_stop().await;
        info!("[Acquisition] {} stopped", handler.name());
        true
    }

    /// Flip Running <-> Paused. `None` while Idle.
    pub fn toggle_pause(&mut self) -> Option<AcquisitionState> {
        self.state = match self.state {
            AcquisitionState::Idle => return None,
            AcquisitionState::Running => AcquisitionState::Paused,
            AcquisitionState::Paused => AcquisitionState::Running,
        };
        info!("[Acquisition] {}", self.state);
        Some(self.state)
    }

    pub fn next_packet(&mut self, session: &mut Session) -> NextPacket {
        self.mode.handler_mut().next_packet(session)
    }

    pub fn drain_status(&mut self) -> Vec<StatusEvent> {
        self.mode.handler_mut().drain_status()
    }

    pub fn latest_frame(&mut self) -> Option<Arc<Frame>> {
        self.mode.handler_mut().latest_frame()
    }

    pub fn pending_packets(&self) -> usize {
        self.mode.handler().pending_packets()
    }
}
