//! Background workers: batch recomputation and export
//!
//! Both run off the foreground loop on tokio's blocking pool, work from data
//! captured at launch, and report through polled [`JobHandle`]s.

pub mod batch;
pub mod export;
pub mod job;

pub use batch::{BatchOutput, BatchRunner};
pub use export::{
    save_features_csv, total_steps, Artifact, DataDumpRenderer, ExportError, ExportPipeline,
    ExportReport, ExportSelection, ViewRenderer, ViewRequest,
};
pub use job::{JobContext, JobError, JobHandle, JobOutcome, JobProgress};
