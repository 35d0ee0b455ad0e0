//! Presentation boundary.
//!
//! Rendering is out of scope for this crate: whatever shows views, notices,
//! preview frames and job progress implements [`Presenter`]. Two
//! implementations ship here: a tracing logger for headless runs and a
//! lock-free [`ViewStore`] that keeps the latest of everything for callers
//! that read state on their own schedule.

use arc_swap::ArcSwapOption;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::defaults::NOTICE_CAPACITY;
use crate::types::{Frame, Snapshot, StatusEvent, StatusKind};

/// Which background job a progress report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Batch,
    Export,
}

impl JobKind {
    fn slot(self) -> usize {
        match self {
            JobKind::Batch => 0,
            JobKind::Export => 1,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Batch => write!(f, "batch"),
            JobKind::Export => write!(f, "export"),
        }
    }
}

pub trait Presenter: Send + Sync {
    /// New computed view, already filtered to the focus set.
    fn publish(&self, view: &Snapshot);

    /// User-facing notice. `Completed` marks a success message.
    fn notify(&self, notice: &StatusEvent);

    fn show_frame(&self, _frame: &Frame) {}

    fn report_progress(&self, _job: JobKind, _done: usize, _total: usize) {}
}

// ============================================================================
// Log Presenter
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn publish(&self, view: &Snapshot) {
        info!(
            "📊 t={:.3} idx={} entities={} spectra={}",
            view.timestamp,
            view.index,
            view.full().features.len(),
            view.full().spectra.values().map(|s| s.len()).sum::<usize>()
        );
    }

    fn notify(&self, notice: &StatusEvent) {
        match notice.kind {
            StatusKind::Info => info!("[Notice] {}", notice.text),
            StatusKind::Completed => info!("✓ {}", notice.text),
            StatusKind::Warning => warn!("[Notice] {}", notice.text),
            StatusKind::Error => error!("[Notice] {}", notice.text),
        }
    }

    fn show_frame(&self, frame: &Frame) {
        debug!(
            "[Preview] {}x{} frame at t={:.3}",
            frame.width, frame.height, frame.timestamp
        );
    }

    fn report_progress(&self, job: JobKind, done: usize, total: usize) {
        debug!("[Jobs] {} {}/{}", job, done, total);
    }
}

// ============================================================================
// View Store
// ============================================================================

/// Keeps the latest view and frame, the most recent notices, and the last
/// progress report per job. Memory stays bounded over long sessions.
pub struct ViewStore {
    view: ArcSwapOption<Snapshot>,
    frame: ArcSwapOption<Frame>,
    notices: Mutex<VecDeque<StatusEvent>>,
    notice_capacity: usize,
    /// One slot per job kind
    progress: Mutex<[Option<(usize, usize)>; 2]>,
    published: std::sync::atomic::AtomicUsize,
}

impl Default for ViewStore {
    fn default() -> Self {
        Self::with_notice_capacity(NOTICE_CAPACITY)
    }
}

impl ViewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that retains at most `capacity` notices (at least one).
    pub fn with_notice_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            view: ArcSwapOption::empty(),
            frame: ArcSwapOption::empty(),
            notices: Mutex::new(VecDeque::with_capacity(capacity.min(NOTICE_CAPACITY))),
            notice_capacity: capacity,
            progress: Mutex::new([None; 2]),
            published: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn latest_view(&self) -> Option<Arc<Snapshot>> {
        self.view.load_full()
    }

    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.frame.load_full()
    }

    /// Number of views published so far.
    pub fn published_count(&self) -> usize {
        self.published.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Retained notices, oldest first.
    pub fn notices(&self) -> Vec<StatusEvent> {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Last reported `(done, total)` for `job`.
    pub fn last_progress(&self, job: JobKind) -> Option<(usize, usize)> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())[job.slot()]
    }
}

impl Presenter for ViewStore {
    fn publish(&self, view: &Snapshot) {
        self.view.store(Some(Arc::new(view.clone())));
        self.published
            .fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }

    fn notify(&self, notice: &StatusEvent) {
        let mut notices = self.notices.lock().unwrap_or_else(|e| e.into_inner());
        if notices.len() == self.notice_capacity {
            notices.pop_front();
        }
        notices.push_back(notice.clone());
    }

    fn show_frame(&self, frame: &Frame) {
        self.frame.store(Some(Arc::new(frame.clone())));
    }

    fn report_progress(&self, job: JobKind, done: usize, total: usize) {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())[job.slot()] = Some((done, total));
    }
}

/// Forwards everything to each presenter in turn.
pub struct Fanout(pub Vec<Arc<dyn Presenter>>);

impl Presenter for Fanout {
    fn publish(&self, view: &Snapshot) {
        self.0.iter().for_each(|p| p.publish(view));
    }

    fn notify(&self, notice: &StatusEvent) {
        self.0.iter().for_each(|p| p.notify(notice));
    }

    fn show_frame(&self, frame: &Frame) {
        self.0.iter().for_each(|p| p.show_frame(frame));
    }

    fn report_progress(&self, job: JobKind, done: usize, total: usize) {
        self.0
            .iter()
            .for_each(|p| p.report_progress(job, done, total));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WindowResults;

    fn view(index: usize) -> Snapshot {
        Snapshot {
            index,
            timestamp: index as f64,
            results: WindowResults::default(),
            entity_ids: vec![],
            variables: vec![],
        }
    }

    #[test]
    fn test_view_store_keeps_latest() {
        let store = Arc::new(ViewStore::new());
        let presenters: Vec<Arc<dyn Presenter>> = vec![store.clone(), Arc::new(LogPresenter)];
        let fanout = Fanout(presenters);

        fanout.publish(&view(1));
        fanout.publish(&view(2));
        fanout.notify(&StatusEvent::warning("low light"));
        fanout.report_progress(JobKind::Export, 1, 3);
        fanout.report_progress(JobKind::Export, 2, 3);

        assert_eq!(store.latest_view().map(|v| v.index), Some(2));
        assert_eq!(store.published_count(), 2);
        assert_eq!(store.notices().len(), 1);
        assert_eq!(store.last_progress(JobKind::Export), Some((2, 3)));
        assert_eq!(store.last_progress(JobKind::Batch), None);
        assert!(store.latest_frame().is_none());
    }

    #[test]
    fn test_view_store_bounds_notices_and_progress() {
        let store = ViewStore::with_notice_capacity(3);
        for i in 0..5 {
            store.notify(&StatusEvent::info(format!("notice {i}")));
        }
        let texts: Vec<String> = store.notices().into_iter().map(|n| n.text).collect();
        assert_eq!(texts, vec!["notice 2", "notice 3", "notice 4"]);

        for done in 0..=1_000 {
            store.report_progress(JobKind::Batch, done, 1_000);
        }
        store.report_progress(JobKind::Export, 4, 9);
        assert_eq!(store.last_progress(JobKind::Batch), Some((1_000, 1_000)));
        assert_eq!(store.last_progress(JobKind::Export), Some((4, 9)));
    }
}
