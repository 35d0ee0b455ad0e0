//! Foreground pipeline
//!
//! ```text
//! timer ──► SchedulingLoop::tick ──► AcquisitionStateMachine::next_packet
//!                 │                        (replay cursor / producer channel)
//!                 ├──► History::push
//!                 ├──► FeatureAggregator (full + sliding windows)
//!                 └──► Presenter::publish (unless display paused)
//!
//! status timer ──► producer status / latest frame ──► stop on Error / Completed
//! job timer    ──► JobHandle::poll (batch, export) ──► apply / notify
//! ```
//!
//! Everything here runs on one task; the [`Controller`] is the only writer
//! of session state.

pub mod controller;
pub mod driver;
pub mod presentation;
pub mod scheduling_loop;

pub use controller::{Controller, ControllerError, ControllerStatus, ModeKind};
pub use driver::{ControlCommand, ControllerDriver, ControllerHandle};
pub use presentation::{Fanout, JobKind, LogPresenter, Presenter, ViewStore};
pub use scheduling_loop::{SchedulingLoop, TickOutcome, TickRequest, TickToken};
