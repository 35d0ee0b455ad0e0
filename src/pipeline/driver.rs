//! Async foreground driver.
//!
//! Runs the [`Controller`] as an actor: one task owns it and multiplexes
//! the scheduled tick, the status poll timer, the job poll timer and user
//! commands. Callers talk to it through a cloneable [`ControllerHandle`].

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::controller::{Controller, ControllerError, ControllerStatus, ModeKind};
use super::scheduling_loop::TickToken;
use crate::acquisition::{AcquisitionState, ReplayDataset};
use crate::background::ExportSelection;
use crate::types::{EntityId, Snapshot};

type Reply<T> = oneshot::Sender<T>;
type Fallible<T> = Reply<Result<T, ControllerError>>;

// ============================================================================
// Commands
// ============================================================================

/// Commands for the controller actor
pub enum ControlCommand {
    LoadDataset {
        dataset: Box<ReplayDataset>,
        response_tx: Reply<usize>,
    },
    SelectMode {
        mode: ModeKind,
        response_tx: Fallible<()>,
    },
    Start {
        response_tx: Fallible<bool>,
    },
    Stop {
        response_tx: Reply<bool>,
    },
    TogglePause {
        response_tx: Reply<Option<AcquisitionState>>,
    },
    SeekToIndex {
        index: usize,
        response_tx: Fallible<Snapshot>,
    },
    SeekToTime {
        time: f64,
        response_tx: Fallible<Snapshot>,
    },
    ReturnToLive {
        response_tx: Reply<Option<Snapshot>>,
    },
    SetDisplayPaused(bool),
    SetFocus(Vec<EntityId>),
    StartBatch {
        response_tx: Fallible<usize>,
    },
    StartExport {
        selection: ExportSelection,
        response_tx: Fallible<usize>,
    },
    CancelExport {
        response_tx: Reply<bool>,
    },
    SaveFeatures {
        path: PathBuf,
        response_tx: Fallible<PathBuf>,
    },
    Status {
        response_tx: Reply<ControllerStatus>,
    },
    Reset {
        response_tx: Reply<()>,
    },
}

// ============================================================================
// Actor Handle
// ============================================================================

/// Handle to interact with the controller actor
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControlCommand>,
}

macro_rules! request {
    ($self:ident, $variant:ident { $($field:ident),* }) => {{
        let (response_tx, response_rx) = oneshot::channel();
        $self
            .tx
            .send(ControlCommand::$variant { $($field,)* response_tx })
            .await
            .context("Controller channel closed")?;
        response_rx.await.context("Response channel closed")?
    }};
}

impl ControllerHandle {
    pub async fn load_dataset(&self, dataset: ReplayDataset) -> Result<usize> {
        let dataset = Box::new(dataset);
        Ok(request!(self, LoadDataset { dataset }))
    }

    pub async fn select_mode(&self, mode: ModeKind) -> Result<()> {
        Ok(request!(self, SelectMode { mode })?)
    }

    pub async fn start(&self) -> Result<bool> {
        Ok(request!(self, Start {})?)
    }

    pub async fn stop(&self) -> Result<bool> {
        Ok(request!(self, Stop {}))
    }

    pub async fn toggle_pause(&self) -> Result<Option<AcquisitionState>> {
        Ok(request!(self, TogglePause {}))
    }

    pub async fn seek_to_index(&self, index: usize) -> Result<Snapshot> {
        Ok(request!(self, SeekToIndex { index })?)
    }

    pub async fn seek_to_time(&self, time: f64) -> Result<Snapshot> {
        Ok(request!(self, SeekToTime { time })?)
    }

    pub async fn return_to_live(&self) -> Result<Option<Snapshot>> {
        Ok(request!(self, ReturnToLive {}))
    }

    pub async fn set_display_paused(&self, paused: bool) -> Result<()> {
        self.tx
            .send(ControlCommand::SetDisplayPaused(paused))
            .await
            .context("Controller channel closed")
    }

    pub async fn set_focus(&self, ids: Vec<EntityId>) -> Result<()> {
        self.tx
            .send(ControlCommand::SetFocus(ids))
            .await
            .context("Controller channel closed")
    }

    pub async fn focus_all(&self) -> Result<()> {
        self.set_focus(Vec::new()).await
    }

    pub async fn start_batch(&self) -> Result<usize> {
        Ok(request!(self, StartBatch {})?)
    }

    pub async fn start_export(&self, selection: ExportSelection) -> Result<usize> {
        Ok(request!(self, StartExport { selection })?)
    }

    pub async fn cancel_export(&self) -> Result<bool> {
        Ok(request!(self, CancelExport {}))
    }

    pub async fn save_features_csv(&self, path: PathBuf) -> Result<PathBuf> {
        Ok(request!(self, SaveFeatures { path })?)
    }

    pub async fn status(&self) -> Result<ControllerStatus> {
        Ok(request!(self, Status {}))
    }

    pub async fn reset(&self) -> Result<()> {
        Ok(request!(self, Reset {}))
    }
}

// ============================================================================
// Driver
// ============================================================================

pub struct ControllerDriver {
    controller: Controller,
    rx: mpsc::Receiver<ControlCommand>,
    cancel_token: CancellationToken,
}

impl ControllerDriver {
    pub fn new(controller: Controller, cancel_token: CancellationToken) -> (Self, ControllerHandle) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                controller,
                rx,
                cancel_token,
            },
            ControllerHandle { tx },
        )
    }

    /// Run until cancelled or every handle is dropped. Acquisition is
    /// stopped on the way out and the controller handed back.
    pub async fn run(mut self) -> Controller {
        let polling = self.controller.config().polling.clone();
        let mut status_timer = tokio::time::interval(polling.status_interval());
        let mut job_timer = tokio::time::interval(polling.job_interval());
        status_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        job_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("[ControllerDriver] Running");
        loop {
            let next_tick = self.controller.next_tick();
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("[ControllerDriver] Shutdown signal received");
                    break;
                }
                token = wait_for_tick(next_tick) => {
                    self.controller.on_tick(token).await;
                }
                _ = status_timer.tick() => {
                    self.controller.poll_status().await;
                }
                _ = job_timer.tick() => {
                    self.controller.poll_jobs();
                }
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => {
                        debug!("[ControllerDriver] All handles dropped");
                        break;
                    }
                },
            }
        }

        self.controller.stop().await;
        info!("[ControllerDriver] Stopped");
        self.controller
    }

    async fn handle(&mut self, cmd: ControlCommand) {
        let c = &mut self.controller;
        match cmd {
            ControlCommand::LoadDataset {
                dataset,
                response_tx,
            } => {
                let _ = response_tx.send(c.load_dataset(*dataset).await);
            }
            ControlCommand::SelectMode { mode, response_tx } => {
                let _ = response_tx.send(c.select_mode(mode).await);
            }
            ControlCommand::Start { response_tx } => {
                let _ = response_tx.send(c.start().await);
            }
            ControlCommand::Stop { response_tx } => {
                let _ = response_tx.send(c.stop().await);
            }
            ControlCommand::TogglePause { response_tx } => {
                let _ = response_tx.send(c.toggle_pause());
            }
            ControlCommand::SeekToIndex { index, response_tx } => {
                let _ = response_tx.send(c.seek_to_index(index));
            }
            ControlCommand::SeekToTime { time, response_tx } => {
                let _ = response_tx.send(c.seek_to_time(time));
            }
            ControlCommand::ReturnToLive { response_tx } => {
                let _ = response_tx.send(c.return_to_live());
            }
            ControlCommand::SetDisplayPaused(paused) => c.set_display_paused(paused),
            ControlCommand::SetFocus(ids) => c.set_focus(ids),
            ControlCommand::StartBatch { response_tx } => {
                let _ = response_tx.send(c.start_batch().await);
            }
            ControlCommand::StartExport {
                selection,
                response_tx,
            } => {
                let _ = response_tx.send(c.start_export(selection));
            }
            ControlCommand::CancelExport { response_tx } => {
                let _ = response_tx.send(c.cancel_export());
            }
            ControlCommand::SaveFeatures { path, response_tx } => {
                let _ = response_tx.send(c.save_features_csv(&path));
            }
            ControlCommand::Status { response_tx } => {
                let _ = response_tx.send(c.status());
            }
            ControlCommand::Reset { response_tx } => {
                c.reset().await;
                let _ = response_tx.send(());
            }
        }
    }
}

async fn wait_for_tick(next: Option<(Instant, TickToken)>) -> TickToken {
    match next {
        Some((due, token)) => {
            tokio::time::sleep_until(due).await;
            token
        }
        None => std::future::pending().await,
    }
}
