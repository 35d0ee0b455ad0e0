//! Shared data structures for the spectral-slope pipeline
//!
//! This module defines the types that flow between subsystems:
//! - DataPacket: one timestamped bundle of per-entity measurements
//! - Frame / StatusEvent: the producer's preview and status messages
//! - WindowFeatures / WindowResults: FeatureMatrix + power spectra per window
//! - Snapshot: immutable computed state at one history index

mod features;
mod packet;
mod status;

pub use features::*;
pub use packet::*;
pub use status::*;
