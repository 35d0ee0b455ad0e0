//! Foreground controller: the single writer of session state.
//!
//! Every user action and every timer callback goes through [`Controller`].
//! It owns the session, the acquisition state machine and the scheduling
//! loop, launches background jobs, and collects their outcomes on the job
//! timer. Nothing here blocks on a background worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use super::presentation::{JobKind, Presenter};
use super::scheduling_loop::{SchedulingLoop, TickOutcome, TickRequest, TickToken};
use crate::acquisition::{
    AcquisitionError, AcquisitionMode, AcquisitionState, AcquisitionStateMachine, LiveMode,
    ReplayDataset, ReplayMode,
};
use crate::background::{
    save_features_csv, total_steps, BatchOutput, BatchRunner, DataDumpRenderer, ExportError,
    ExportPipeline, ExportReport, ExportSelection, JobHandle, JobOutcome, ViewRenderer,
};
use crate::config::AppConfig;
use crate::processing::FeatureAggregator;
use crate::producer::{launcher_from_config, ProducerLauncher};
use crate::session::{SeekError, Session};
use crate::types::{EntityId, Snapshot, StatusEvent, StatusKind};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Seek(#[from] SeekError),

    #[error("no dataset loaded")]
    NoDataset,

    #[error("a {0} job is already running")]
    JobBusy(JobKind),

    #[error("nothing computed to export yet")]
    NothingToExport,

    #[error("no export artifacts selected")]
    EmptySelection,

    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Which acquisition variant to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    Replay,
    Live,
}

impl std::fmt::Display for ModeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModeKind::Replay => write!(f, "replay"),
            ModeKind::Live => write!(f, "live"),
        }
    }
}

/// Point-in-time summary for status displays.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerStatus {
    pub mode: ModeKind,
    pub state: AcquisitionState,
    pub history_len: usize,
    pub active_ids: Vec<EntityId>,
    pub displayed_index: Option<usize>,
    pub follows_tip: bool,
    pub display_paused: bool,
    pub batch_running: bool,
    /// `(done, total)` of a running export
    pub export_progress: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Copy)]
struct ScheduledTick {
    token: TickToken,
    due: Instant,
}

pub struct Controller {
    config: AppConfig,
    aggregator: FeatureAggregator,
    session: Session,
    machine: AcquisitionStateMachine,
    scheduler: SchedulingLoop,
    dataset: Option<Arc<ReplayDataset>>,
    presenter: Arc<dyn Presenter>,
    renderer: Arc<dyn ViewRenderer>,
    next_tick: Option<ScheduledTick>,
    batch: Option<JobHandle<BatchOutput>>,
    export: Option<JobHandle<ExportReport>>,
}

impl Controller {
    /// Controller in replay mode with nothing loaded.
    pub fn new(config: AppConfig, presenter: Arc<dyn Presenter>) -> Self {
        let aggregator = FeatureAggregator::new(config.analysis.variables.clone());
        let scheduler = SchedulingLoop::new(
            config.analysis.update_interval(),
            config.analysis.sliding_window_samples,
        );
        Self {
            config,
            aggregator,
            session: Session::new(),
            machine: AcquisitionStateMachine::new(AcquisitionMode::Replay(ReplayMode::new(None))),
            scheduler,
            dataset: None,
            presenter,
            renderer: Arc::new(DataDumpRenderer),
            next_tick: None,
            batch: None,
            export: None,
        }
    }

    /// Use `renderer` for export views instead of the JSON data dump.
    pub fn with_renderer(mut self, renderer: Arc<dyn ViewRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> AcquisitionState {
        self.machine.state()
    }

    pub fn mode(&self) -> ModeKind {
        if self.machine.mode().is_live() {
            ModeKind::Live
        } else {
            ModeKind::Replay
        }
    }

    pub fn dataset(&self) -> Option<&Arc<ReplayDataset>> {
        self.dataset.as_ref()
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            mode: self.mode(),
            state: self.machine.state(),
            history_len: self.session.history().len(),
            active_ids: self.session.active_id_list(),
            displayed_index: self.session.cached_index(),
            follows_tip: self.scheduler.follows_tip(),
            display_paused: self.scheduler.display_paused(),
            batch_running: self.batch.is_some(),
            export_progress: self.export.as_ref().map(|j| (j.progress(), j.total())),
        }
    }

    /// When and with which token the next scheduled tick should run.
    pub fn next_tick(&self) -> Option<(Instant, TickToken)> {
        self.next_tick.map(|t| (t.due, t.token))
    }

    // ========================================================================
    // Dataset & Mode
    // ========================================================================

    /// Install a replay dataset. Stops acquisition first if it is active.
    pub async fn load_dataset(&mut self, dataset: ReplayDataset) -> usize {
        self.stop().await;
        self.abandon_batch();
        let dataset = Arc::new(dataset);
        let entities = dataset.entity_ids().len();
        info!(
            "📂 Dataset loaded: {} rows, {} entities",
            dataset.len(),
            entities
        );
        self.session.restart(dataset.entity_ids().to_vec());
        if let AcquisitionMode::Replay(replay) = self.machine.mode_mut() {
            replay.set_dataset(Some(Arc::clone(&dataset)));
        }
        self.dataset = Some(dataset);
        self.scheduler.set_follow_tip(true);
        entities
    }

    /// Switch mode, stopping acquisition first. Live mode gets the producer
    /// described by the `[producer]` config section.
    pub async fn select_mode(&mut self, mode: ModeKind) -> Result<(), ControllerError> {
        match mode {
            ModeKind::Replay => {
                self.stop().await;
                self.abandon_batch();
                self.machine.set_mode(AcquisitionMode::Replay(ReplayMode::new(
                    self.dataset.clone(),
                )))?;
            }
            ModeKind::Live => {
                let launcher =
                    launcher_from_config(&self.config.producer, &self.config.analysis.variables);
                self.select_live_source(launcher).await?;
            }
        }
        info!("[Controller] Mode: {}", mode);
        Ok(())
    }

    /// Switch to live mode fed by `launcher`.
    pub async fn select_live_source(
        &mut self,
        launcher: Box<dyn ProducerLauncher>,
    ) -> Result<(), ControllerError> {
        self.stop().await;
        self.abandon_batch();
        let live = LiveMode::new(launcher, self.config.producer.shutdown_grace());
        self.machine.set_mode(AcquisitionMode::Live(live))?;
        Ok(())
    }

    // ========================================================================
    // Acquisition
    // ========================================================================

    /// Start acquisition and arm the loop. `Ok(false)` if already active.
    pub async fn start(&mut self) -> Result<bool, ControllerError> {
        if self.batch.is_some() {
            return Err(ControllerError::JobBusy(JobKind::Batch));
        }
        match self.machine.start(&mut self.session).await {
            Ok(true) => {
                self.scheduler.set_follow_tip(true);
                self.scheduler.set_display_paused(false);
                self.arm(Instant::now());
                self.presenter
                    .notify(&StatusEvent::info(format!("{} acquisition started", self.mode())));
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                self.presenter
                    .notify(&StatusEvent::error(format!("Cannot start: {e}")));
                Err(e.into())
            }
        }
    }

    /// Stop acquisition. The loop is disarmed before teardown so a tick that
    /// is already due becomes a no-op.
    pub async fn stop(&mut self) -> bool {
        self.disarm();
        self.machine.stop().await
    }

    pub fn toggle_pause(&mut self) -> Option<AcquisitionState> {
        let state = self.machine.toggle_pause()?;
        match state {
            AcquisitionState::Running if self.scheduler.follows_tip() => self.arm(Instant::now()),
            AcquisitionState::Running => {}
            _ => self.disarm(),
        }
        Some(state)
    }

    /// Run the scheduled tick carrying `token`.
    pub async fn on_tick(&mut self, token: TickToken) -> TickOutcome {
        if self.next_tick.map(|t| t.token) == Some(token) {
            self.next_tick = None;
        }
        let outcome = self.scheduler.tick(
            TickRequest::Scheduled(token),
            &mut self.machine,
            &mut self.session,
            &self.aggregator,
        );
        match &outcome {
            TickOutcome::Stale | TickOutcome::SeekRejected(_) => {}
            TickOutcome::Idle { reschedule } => {
                if *reschedule {
                    self.schedule(token);
                }
            }
            TickOutcome::Computed {
                snapshot,
                publish,
                reschedule,
                ..
            } => {
                if *publish {
                    self.publish(snapshot);
                }
                if *reschedule {
                    self.schedule(token);
                }
            }
            TickOutcome::Completed => {
                let message = match self.mode() {
                    ModeKind::Replay => "Playback complete",
                    ModeKind::Live => "Live session complete",
                };
                self.stop().await;
                self.presenter.notify(&StatusEvent::completed(message));
            }
        }
        outcome
    }

    fn arm(&mut self, due: Instant) {
        let token = self.scheduler.arm();
        self.next_tick = Some(ScheduledTick { token, due });
    }

    fn disarm(&mut self) {
        self.scheduler.disarm();
        self.next_tick = None;
    }

    fn schedule(&mut self, token: TickToken) {
        if self.scheduler.is_current(token) {
            self.next_tick = Some(ScheduledTick {
                token,
                due: Instant::now() + self.scheduler.interval(),
            });
        }
    }

    // ========================================================================
    // Scrubbing & Display
    // ========================================================================

    /// One-shot recompute at `index`. Suspends the loop until
    /// [`return_to_live`](Self::return_to_live). Invalid input changes nothing.
    pub fn seek_to_index(&mut self, index: usize) -> Result<Snapshot, ControllerError> {
        self.session.history().check_index(index)?;
        self.disarm();
        self.scheduler.set_follow_tip(false);
        self.scheduler.set_display_paused(false);
        match self.scheduler.tick(
            TickRequest::Scrub(index),
            &mut self.machine,
            &mut self.session,
            &self.aggregator,
        ) {
            TickOutcome::Computed { snapshot, .. } => {
                self.publish(&snapshot);
                Ok(snapshot)
            }
            TickOutcome::SeekRejected(e) => Err(e.into()),
            _ => Err(SeekError::NoHistory.into()),
        }
    }

    /// Scrub to the packet closest to `time`.
    pub fn seek_to_time(&mut self, time: f64) -> Result<Snapshot, ControllerError> {
        let index = self.session.history().index_at_time(time)?;
        self.seek_to_index(index)
    }

    /// Follow the tip again. Re-arms the loop if acquisition is running;
    /// otherwise shows the tip once.
    pub fn return_to_live(&mut self) -> Option<Snapshot> {
        self.scheduler.set_display_paused(false);
        self.scheduler.set_follow_tip(true);
        if self.machine.is_running() {
            self.arm(Instant::now());
            return None;
        }
        let tip = self.session.history().tip()?;
        let snapshot = self.seek_to_index(tip).ok();
        self.scheduler.set_follow_tip(true);
        snapshot
    }

    /// Freeze (or unfreeze) what the presenter sees without touching
    /// acquisition. Unfreezing republishes the current view.
    pub fn set_display_paused(&mut self, paused: bool) {
        self.scheduler.set_display_paused(paused);
        if !paused {
            if let Some(view) = self.current_view() {
                self.publish(&view);
            }
        }
    }

    pub fn set_focus<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = EntityId>,
    {
        self.session.set_focus(ids);
        self.refresh_view();
    }

    pub fn focus_all(&mut self) {
        self.set_focus(Vec::new());
    }

    /// Recompute at the displayed index and republish.
    fn refresh_view(&mut self) {
        let Some(index) = self.session.cached_index() else {
            return;
        };
        match self
            .session
            .compute_at(&self.aggregator, index, self.scheduler.window())
        {
            Ok(snapshot) => {
                self.session.store_results(index, snapshot.results.clone());
                if !self.scheduler.display_paused() {
                    self.publish(&snapshot);
                }
            }
            Err(e) => warn!("[Controller] Cannot refresh view: {}", e),
        }
    }

    /// Cached results at the displayed index as a snapshot.
    pub fn current_view(&self) -> Option<Snapshot> {
        let index = self.session.cached_index()?;
        let timestamp = self.session.history().get(index)?.timestamp;
        Some(Snapshot {
            index,
            timestamp,
            results: self.session.caches().clone(),
            entity_ids: self.session.active_id_list(),
            variables: self.aggregator.variables().to_vec(),
        })
    }

    /// Both windows at `index`, computed without touching the caches.
    pub fn snapshot_at(&self, index: usize) -> Result<Snapshot, ControllerError> {
        Ok(self
            .session
            .compute_at(&self.aggregator, index, self.scheduler.window())?)
    }

    fn publish(&self, snapshot: &Snapshot) {
        let focus = self.session.focused_ids();
        if focus.is_empty() {
            self.presenter.publish(snapshot);
            return;
        }
        let view = Snapshot {
            results: snapshot.results.filtered(focus),
            entity_ids: snapshot
                .entity_ids
                .iter()
                .filter(|id| focus.contains(*id))
                .cloned()
                .collect(),
            ..snapshot.clone()
        };
        self.presenter.publish(&view);
    }

    // ========================================================================
    // Producer Status
    // ========================================================================

    /// Drain producer status and the latest frame. Error stops acquisition;
    /// Completed stops it only once every buffered packet has been appended,
    /// which may be after a pause or scrub ends.
    pub async fn poll_status(&mut self) -> Vec<StatusEvent> {
        if self.machine.state() == AcquisitionState::Idle {
            return Vec::new();
        }
        if let Some(frame) = self.machine.latest_frame() {
            self.presenter.show_frame(&frame);
        }

        let events = self.machine.drain_status();
        let mut failed = false;
        let mut completed = false;
        for event in &events {
            self.presenter.notify(event);
            match event.kind {
                StatusKind::Error => failed = true,
                StatusKind::Completed => completed = true,
                StatusKind::Info | StatusKind::Warning => {}
            }
        }

        if failed {
            warn!("[Controller] Producer reported an error, stopping");
            self.stop().await;
        } else if completed {
            let pending = self.machine.pending_packets();
            if pending == 0 {
                self.stop().await;
            } else if !self.scheduler.is_armed() {
                // Paused or scrubbing: the backlog waits for the loop to resume.
                info!(
                    "[Controller] Producer completed, {} packets held until acquisition resumes",
                    pending
                );
            }
        }
        events
    }

    // ========================================================================
    // Background Jobs
    // ========================================================================

    /// Recompute the whole loaded dataset in the background. Acquisition is
    /// stopped first.
    pub async fn start_batch(&mut self) -> Result<usize, ControllerError> {
        if self.batch.is_some() {
            return Err(ControllerError::JobBusy(JobKind::Batch));
        }
        let dataset = self.dataset.clone().ok_or(ControllerError::NoDataset)?;
        self.stop().await;

        let ids = dataset.entity_ids().to_vec();
        let total = ids.len();
        info!("🔬 Batch analysis over {} rows, {} entities", dataset.len(), total);
        self.batch = Some(BatchRunner::launch(dataset, ids, self.aggregator.clone()));
        self.presenter
            .notify(&StatusEvent::info("Batch analysis started"));
        Ok(total)
    }

    /// Export the displayed index in the background. Returns the step total.
    pub fn start_export(&mut self, selection: ExportSelection) -> Result<usize, ControllerError> {
        if self.export.is_some() {
            return Err(ControllerError::JobBusy(JobKind::Export));
        }
        if selection.is_empty() {
            return Err(ControllerError::EmptySelection);
        }
        let index = self
            .session
            .cached_index()
            .ok_or(ControllerError::NothingToExport)?;
        let snapshot = self.snapshot_at(index)?;
        let total = total_steps(&snapshot, &selection);
        self.export = Some(ExportPipeline::launch(
            Arc::new(snapshot),
            selection,
            self.config.export.output_dir.clone(),
            Arc::clone(&self.renderer),
        ));
        self.presenter.report_progress(JobKind::Export, 0, total);
        Ok(total)
    }

    pub fn cancel_export(&mut self) -> bool {
        match &self.export {
            Some(job) => {
                job.cancel();
                true
            }
            None => false,
        }
    }

    /// Report job progress and collect finished jobs.
    pub fn poll_jobs(&mut self) -> Vec<JobKind> {
        let mut finished = Vec::new();

        if let Some(job) = self.export.as_mut() {
            let outcome = job.poll();
            self.presenter
                .report_progress(JobKind::Export, job.progress(), job.total());
            if let Some(outcome) = outcome {
                self.export = None;
                self.finish_export(outcome);
                finished.push(JobKind::Export);
            }
        }

        if let Some(job) = self.batch.as_mut() {
            let outcome = job.poll();
            self.presenter
                .report_progress(JobKind::Batch, job.progress(), job.total());
            if let Some(outcome) = outcome {
                self.batch = None;
                self.finish_batch(outcome);
                finished.push(JobKind::Batch);
            }
        }

        finished
    }

    /// Cancel a running batch whose result no longer matches the source.
    fn abandon_batch(&mut self) {
        if let Some(job) = self.batch.take() {
            job.cancel();
            info!("[Controller] Batch analysis abandoned: source changed");
            self.presenter
                .notify(&StatusEvent::warning("Batch analysis cancelled"));
        }
    }

    /// Whether a batch or export job is still outstanding.
    pub fn jobs_running(&self) -> bool {
        self.batch.is_some() || self.export.is_some()
    }

    fn finish_export(&mut self, outcome: JobOutcome<ExportReport>) {
        let notice = match outcome {
            JobOutcome::Success(report) => StatusEvent::completed(format!(
                "Export saved to {} ({} files)",
                report.folder.display(),
                report.artifacts.len()
            )),
            JobOutcome::Cancelled => StatusEvent::warning("Export cancelled"),
            JobOutcome::Error(e) => StatusEvent::error(format!("Export failed: {e}")),
        };
        self.presenter.notify(&notice);
    }

    fn finish_batch(&mut self, outcome: JobOutcome<BatchOutput>) {
        let output = match outcome {
            JobOutcome::Success(output) => output,
            JobOutcome::Cancelled => {
                self.presenter
                    .notify(&StatusEvent::warning("Batch analysis cancelled"));
                return;
            }
            JobOutcome::Error(e) => {
                self.presenter
                    .notify(&StatusEvent::error(format!("Batch analysis failed: {e}")));
                return;
            }
        };

        let Some(snapshot) = output.snapshot(self.aggregator.variables()) else {
            self.presenter
                .notify(&StatusEvent::warning("Batch analysis produced no results"));
            return;
        };
        if snapshot.full().is_empty() {
            self.presenter
                .notify(&StatusEvent::warning("Batch analysis produced no results"));
            return;
        }

        let entities = output.entity_ids.len();
        if let Err(e) = self
            .session
            .adopt(output.history.into_packets(), output.entity_ids)
        {
            self.presenter
                .notify(&StatusEvent::error(format!("Batch analysis failed: {e}")));
            return;
        }
        self.session
            .store_results(snapshot.index, snapshot.results.clone());
        self.scheduler.set_follow_tip(false);
        self.publish(&snapshot);
        self.presenter.notify(&StatusEvent::completed(format!(
            "Batch analysis complete for {entities} entities. Export the results?"
        )));
    }

    // ========================================================================
    // Save & Reset
    // ========================================================================

    /// Write the full-window feature table of the displayed view.
    pub fn save_features_csv(&self, path: &Path) -> Result<PathBuf, ControllerError> {
        save_features_csv(
            path,
            &self.session.caches().full,
            self.aggregator.variables(),
        )?;
        info!("💾 Features saved to {}", path.display());
        Ok(path.to_path_buf())
    }

    /// Stop everything and clear session data. Configuration is kept.
    pub async fn reset(&mut self) {
        self.stop().await;
        if let Some(job) = self.export.take() {
            job.cancel();
        }
        if let Some(job) = self.batch.take() {
            job.cancel();
        }
        self.dataset = None;
        if let AcquisitionMode::Replay(replay) = self.machine.mode_mut() {
            replay.set_dataset(None);
        }
        self.session.reset();
        self.scheduler.set_follow_tip(true);
        self.scheduler.set_display_paused(false);
        self.presenter.notify(&StatusEvent::info("Session reset"));
    }
}
