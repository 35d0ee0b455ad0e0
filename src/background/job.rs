//! Polled background jobs with cooperative cancellation.
//!
//! A job runs on tokio's blocking pool. The foreground never awaits it: it
//! calls [`JobHandle::poll`] on its job timer and reads the progress
//! counters in between. Cancellation is a flag the job checks between units.

use futures::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::export::ExportError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("cancelled")]
    Cancelled,

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error("no dataset loaded")]
    NoDataset,

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("{0}")]
    Failed(String),
}

/// Terminal result of a job.
#[derive(Debug)]
pub enum JobOutcome<T> {
    Success(T),
    Cancelled,
    Error(JobError),
}

impl<T> JobOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success(_))
    }
}

/// Shared `done / total` counters.
#[derive(Debug, Default)]
pub struct JobProgress {
    done: AtomicUsize,
    total: AtomicUsize,
}

impl JobProgress {
    pub fn new(total: usize) -> Self {
        Self {
            done: AtomicUsize::new(0),
            total: AtomicUsize::new(total),
        }
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Acquire)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }
}

/// Worker-side view of a job: progress reporting and the cancel flag.
#[derive(Clone)]
pub struct JobContext {
    progress: Arc<JobProgress>,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(total: usize) -> Self {
        Self {
            progress: Arc::new(JobProgress::new(total)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn progress(&self) -> &JobProgress {
        &self.progress
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Call between units of work.
    pub fn checkpoint(&self) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    /// One unit finished.
    pub fn advance(&self) {
        self.progress.done.fetch_add(1, Ordering::AcqRel);
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Foreground half of a background job.
pub struct JobHandle<T> {
    name: &'static str,
    ctx: JobContext,
    join: Option<JoinHandle<Result<T, JobError>>>,
}

impl<T: Send + 'static> JobHandle<T> {
    /// Run `work` on the blocking pool with a fresh context of `total` units.
    pub fn spawn<F>(name: &'static str, total: usize, work: F) -> Self
    where
        F: FnOnce(&JobContext) -> Result<T, JobError> + Send + 'static,
    {
        Self::spawn_with(name, JobContext::new(total), work)
    }

    /// Run `work` with a caller-supplied context.
    pub fn spawn_with<F>(name: &'static str, ctx: JobContext, work: F) -> Self
    where
        F: FnOnce(&JobContext) -> Result<T, JobError> + Send + 'static,
    {
        let worker_ctx = ctx.clone();
        let join = tokio::task::spawn_blocking(move || work(&worker_ctx));
        debug!("[Jobs] '{}' started ({} steps)", name, ctx.progress.total());
        Self {
            name,
            ctx,
            join: Some(join),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn progress(&self) -> usize {
        self.ctx.progress.done()
    }

    pub fn total(&self) -> usize {
        self.ctx.progress.total()
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.ctx.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.cancel.is_cancelled()
    }

    /// Whether the outcome has already been collected.
    pub fn is_collected(&self) -> bool {
        self.join.is_none()
    }

    /// Non-blocking completion check. Yields the outcome exactly once.
    pub fn poll(&mut self) -> Option<JobOutcome<T>> {
        if !self.join.as_ref()?.is_finished() {
            return None;
        }
        let joined = self.join.take()?.now_or_never()?;
        Some(match joined {
            Ok(Ok(value)) => JobOutcome::Success(value),
            Ok(Err(JobError::Cancelled)) => JobOutcome::Cancelled,
            Ok(Err(e)) => JobOutcome::Error(e),
            Err(join_err) => JobOutcome::Error(JobError::Panicked(panic_message(join_err))),
        })
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait<T: Send + 'static>(handle: &mut JobHandle<T>) -> JobOutcome<T> {
        for _ in 0..500 {
            if let Some(outcome) = handle.poll() {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job did not finish");
    }

    #[tokio::test]
    async fn test_success_reports_progress() {
        let mut job = JobHandle::spawn("count", 3, |ctx| {
            for _ in 0..3 {
                ctx.checkpoint()?;
                ctx.advance();
            }
            Ok(42)
        });
        assert!(matches!(wait(&mut job).await, JobOutcome::Success(42)));
        assert_eq!((job.progress(), job.total()), (3, 3));
        assert!(job.is_collected());
        assert!(job.poll().is_none());
    }

    #[tokio::test]
    async fn test_cancel_between_units() {
        let ctx = JobContext::new(100);
        let mut job = JobHandle::spawn_with("slow", ctx, |ctx| {
            for _ in 0..100 {
                ctx.checkpoint()?;
                std::thread::sleep(Duration::from_millis(5));
                ctx.advance();
            }
            Ok(())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        job.cancel();
        assert!(job.is_cancelled());
        assert!(matches!(wait(&mut job).await, JobOutcome::Cancelled));
        assert!(job.progress() < job.total());
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_captured() {
        let mut failing: JobHandle<()> =
            JobHandle::spawn("fail", 1, |_| Err(JobError::Failed("disk full".into())));
        match wait(&mut failing).await {
            JobOutcome::Error(JobError::Failed(msg)) => assert_eq!(msg, "disk full"),
            other => panic!("unexpected {other:?}"),
        }

        let mut panicking: JobHandle<()> = JobHandle::spawn("boom", 1, |_| panic!("kaboom"));
        match wait(&mut panicking).await {
            JobOutcome::Error(JobError::Panicked(msg)) => assert_eq!(msg, "kaboom"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
