//! slopewatch: spectral-slope features over per-entity sensor streams
//!
//! Ingests a time-ordered stream of per-entity measurements from a stored
//! recording or a live producer, keeps a growing history, and on a fixed
//! cadence fits a power-law slope to every variable's amplitude spectrum
//! over the full history and a trailing sliding window.
//!
//! ## Architecture
//!
//! - **Acquisition**: Idle/Running/Paused state machine over replay and live modes
//! - **Producer**: isolated feature producer (thread or OS process) behind
//!   data, frame and status channels
//! - **Pipeline**: scheduling loop, foreground controller and its async driver
//! - **Processing**: FFT slope fitting and per-window aggregation
//! - **Background**: batch recomputation and cancellable export jobs

pub mod acquisition;
pub mod background;
pub mod config;
pub mod pipeline;
pub mod processing;
pub mod producer;
pub mod session;
pub mod types;

// Re-export configuration
pub use config::AppConfig;

// Re-export commonly used types
pub use types::{DataPacket, EntityId, Frame, Snapshot, StatusEvent, StatusKind, WindowResults};

// Re-export the foreground surface
pub use acquisition::{AcquisitionState, ReplayDataset};
pub use background::{Artifact, ExportSelection};
pub use pipeline::{Controller, ControllerDriver, ControllerHandle, ModeKind};
