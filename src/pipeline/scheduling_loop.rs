//! The timer-driven tick that turns packets into history and windows.
//!
//! Rescheduling is owned by the loop through generation-stamped
//! [`TickToken`]s: `arm()` issues a token, `disarm()` invalidates every
//! outstanding one, and a tick presented with a stale token does nothing.
//! Stopping acquisition disarms before anything else, so a timer that was
//! already due when `stop()` ran cannot append to history.

use std::time::Duration;
use tracing::{debug, warn};

use crate::acquisition::{AcquisitionStateMachine, NextPacket};
use crate::processing::FeatureAggregator;
use crate::session::{SeekError, Session};
use crate::types::Snapshot;

/// Permission to run one scheduled tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickToken {
    generation: u64,
}

/// What a tick is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickRequest {
    /// Periodic tick: acquire (when following the tip) and recompute.
    Scheduled(TickToken),
    /// One-shot recompute at a history index; never acquires or reschedules.
    Scrub(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Token invalidated by stop/pause/scrub; nothing happened
    Stale,
    /// Running but no history to compute over yet
    Idle { reschedule: bool },
    Computed {
        /// Whether this tick appended a packet
        appended: bool,
        snapshot: Snapshot,
        /// False while the display is paused
        publish: bool,
        reschedule: bool,
    },
    /// Source exhausted; the caller stops acquisition
    Completed,
    SeekRejected(SeekError),
}

pub struct SchedulingLoop {
    interval: Duration,
    window: usize,
    generation: u64,
    armed: bool,
    /// Compute at the tip (true) or at a scrubbed index (false)
    follow_tip: bool,
    display_paused: bool,
}

impl SchedulingLoop {
    pub fn new(interval: Duration, window: usize) -> Self {
        Self {
            interval,
            window: window.max(1),
            generation: 0,
            armed: false,
            follow_tip: true,
            display_paused: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Invalidate outstanding tokens and issue a fresh one.
    pub fn arm(&mut self) -> TickToken {
        self.generation = self.generation.wrapping_add(1);
        self.armed = true;
        TickToken {
            generation: self.generation,
        }
    }

    /// Invalidate every outstanding token.
    pub fn disarm(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_current(&self, token: TickToken) -> bool {
        self.armed && token.generation == self.generation
    }

    pub fn follows_tip(&self) -> bool {
        self.follow_tip
    }

    pub fn set_follow_tip(&mut self, follow: bool) {
        self.follow_tip = follow;
    }

    pub fn display_paused(&self) -> bool {
        self.display_paused
    }

    pub fn set_display_paused(&mut self, paused: bool) {
        self.display_paused = paused;
    }

    // ========================================================================
    // Tick
    // ========================================================================

    pub fn tick(
        &mut self,
        request: TickRequest,
        machine: &mut AcquisitionStateMachine,
        session: &mut Session,
        aggregator: &FeatureAggregator,
    ) -> TickOutcome {
        match request {
            TickRequest::Scheduled(token) => self.scheduled(token, machine, session, aggregator),
            TickRequest::Scrub(index) => match self.compute(index, session, aggregator) {
                Ok(snapshot) => TickOutcome::Computed {
                    appended: false,
                    snapshot,
                    publish: !self.display_paused,
                    reschedule: false,
                },
                Err(e) => TickOutcome::SeekRejected(e),
            },
        }
    }

    fn scheduled(
        &mut self,
        token: TickToken,
        machine: &mut AcquisitionStateMachine,
        session: &mut Session,
        aggregator: &FeatureAggregator,
    ) -> TickOutcome {
        if !self.is_current(token) {
            debug!("[SchedulingLoop] Dropping stale tick");
            return TickOutcome::Stale;
        }
        if !machine.is_running() {
            self.disarm();
            return TickOutcome::Stale;
        }

        let mut appended = false;
        if self.follow_tip {
            match machine.next_packet(session) {
                NextPacket::Packet(packet) => match session.append(packet) {
                    Ok(()) => appended = true,
                    Err(e) => warn!("[SchedulingLoop] Dropping packet: {}", e),
                },
                NextPacket::NoData => {}
                NextPacket::EndOfData => return TickOutcome::Completed,
            }
        }

        let target = if self.follow_tip {
            session.history().tip()
        } else {
            session.cached_index()
        };
        let reschedule = self.follow_tip && machine.is_running();

        let Some(index) = target else {
            return TickOutcome::Idle { reschedule };
        };
        match self.compute(index, session, aggregator) {
            Ok(snapshot) => TickOutcome::Computed {
                appended,
                snapshot,
                publish: !self.display_paused,
                reschedule,
            },
            Err(e) => {
                warn!("[SchedulingLoop] Cannot compute at {}: {}", index, e);
                TickOutcome::Idle { reschedule }
            }
        }
    }

    /// Compute both windows at `index` and store them in the session caches.
    fn compute(
        &self,
        index: usize,
        session: &mut Session,
        aggregator: &FeatureAggregator,
    ) -> Result<Snapshot, SeekError> {
        let snapshot = session.compute_at(aggregator, index, self.window)?;
        session.store_results(index, snapshot.results.clone());
        Ok(snapshot)
    }
}
