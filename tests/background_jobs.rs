//! Background Job Tests
//!
//! Batch recomputation and export through the controller, including
//! progress accounting and cooperative cancellation.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use slopewatch::background::{ExportError, ViewRenderer, ViewRequest};
use slopewatch::pipeline::{ControllerError, JobKind};
use slopewatch::{Artifact, ExportSelection, StatusKind};

use common::{config, controller, dataset, tick_n, wait_for_job};

/// Files directly inside the single export folder under `root`.
fn exported_files(root: &Path) -> Vec<PathBuf> {
    let folders: Vec<PathBuf> = fs::read_dir(root)
        .expect("output dir")
        .map(|e| e.expect("entry").path())
        .collect();
    assert_eq!(folders.len(), 1, "expected one export folder");
    fs::read_dir(&folders[0])
        .expect("export folder")
        .map(|e| e.expect("entry").path())
        .collect()
}

#[tokio::test]
async fn test_batch_replaces_history_and_publishes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut controller, store) = controller(config(10, dir.path()));
    controller.load_dataset(dataset(3, 40)).await;

    assert_eq!(controller.start_batch().await.expect("batch"), 3);
    assert!(matches!(
        controller.start().await,
        Err(ControllerError::JobBusy(JobKind::Batch))
    ));
    assert!(matches!(
        controller.start_batch().await,
        Err(ControllerError::JobBusy(JobKind::Batch))
    ));

    wait_for_job(&mut controller, JobKind::Batch).await;
    assert_eq!(store.last_progress(JobKind::Batch), Some((3, 3)));

    let status = controller.status();
    assert!(!status.batch_running);
    assert_eq!(status.history_len, 40);
    assert_eq!(status.displayed_index, Some(39));
    assert!(!status.follows_tip);
    assert_eq!(status.active_ids, vec!["ID_1", "ID_2", "ID_3"]);

    let view = store.latest_view().expect("batch view");
    assert_eq!(view.index, 39);
    assert_eq!(view.full().features.len(), 3);
    assert!(store.notices().iter().any(|n| n.kind == StatusKind::Completed
        && n.text == "Batch analysis complete for 3 entities. Export the results?"));

    // Batch results can be scrubbed like replayed history.
    assert_eq!(controller.seek_to_index(5).expect("seek").index, 5);
}

#[tokio::test]
async fn test_loading_a_dataset_abandons_the_running_batch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut controller, store) = controller(config(10, dir.path()));
    controller.load_dataset(dataset(3, 40)).await;
    controller.start_batch().await.expect("batch");

    controller.load_dataset(dataset(2, 12)).await;
    assert!(!controller.status().batch_running);
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(controller.poll_jobs().is_empty());
    }

    let status = controller.status();
    assert_eq!(status.history_len, 0);
    assert_eq!(status.active_ids, vec!["ID_1", "ID_2"]);
    assert!(store
        .notices()
        .iter()
        .any(|n| n.kind == StatusKind::Warning && n.text == "Batch analysis cancelled"));

    // A fresh batch runs over the newly loaded dataset.
    assert_eq!(controller.start_batch().await.expect("batch"), 2);
    wait_for_job(&mut controller, JobKind::Batch).await;
    let status = controller.status();
    assert_eq!(status.history_len, 12);
    assert_eq!(status.active_ids, vec!["ID_1", "ID_2"]);
}

#[tokio::test]
async fn test_batch_needs_a_dataset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut controller, _store) = controller(config(10, dir.path()));
    assert!(matches!(
        controller.start_batch().await,
        Err(ControllerError::NoDataset)
    ));
}

#[tokio::test]
async fn test_export_feature_table_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("exports");
    let (mut controller, store) = controller(config(10, &out));
    controller.load_dataset(dataset(2, 20)).await;
    controller.start().await.expect("start");
    tick_n(&mut controller, 12).await;
    controller.stop().await;

    let total = controller
        .start_export(ExportSelection::only([Artifact::FeatureTable]))
        .expect("export");
    assert_eq!(total, 1);
    wait_for_job(&mut controller, JobKind::Export).await;
    assert_eq!(store.last_progress(JobKind::Export), Some((1, 1)));

    let files = exported_files(&out);
    assert_eq!(files.len(), 1);
    let table = fs::read_to_string(&files[0]).expect("feature table");
    let mut lines = table.lines();
    assert_eq!(lines.next(), Some("ID,happy,sad"));
    assert_eq!(lines.count(), 2);
    assert!(store
        .notices()
        .iter()
        .any(|n| n.kind == StatusKind::Completed && n.text.starts_with("Export saved to")));
}

#[tokio::test]
async fn test_export_preconditions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut controller, _store) = controller(config(10, dir.path()));
    assert!(matches!(
        controller.start_export(ExportSelection::all()),
        Err(ControllerError::NothingToExport)
    ));

    controller.load_dataset(dataset(1, 5)).await;
    controller.start().await.expect("start");
    tick_n(&mut controller, 2).await;
    assert!(matches!(
        controller.start_export(ExportSelection::only(Vec::<Artifact>::new())),
        Err(ControllerError::EmptySelection)
    ));
}

/// Renderer slow enough for a cancel to land mid-export.
struct SlowRenderer;

impl ViewRenderer for SlowRenderer {
    fn render(&self, _request: &ViewRequest<'_>, stem: &Path) -> Result<PathBuf, ExportError> {
        std::thread::sleep(Duration::from_millis(20));
        let path = stem.with_extension("json");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ExportError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, "{}").map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

#[tokio::test]
async fn test_export_cancellation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (controller, store) = controller(config(10, dir.path()));
    let mut controller = controller.with_renderer(Arc::new(SlowRenderer));
    controller.load_dataset(dataset(3, 30)).await;
    controller.start().await.expect("start");
    tick_n(&mut controller, 30).await;

    let total = controller
        .start_export(ExportSelection::only([Artifact::Spectrum, Artifact::Radar]))
        .expect("export");
    assert_eq!(total, 3 * 2 + 3);
    assert!(matches!(
        controller.start_export(ExportSelection::all()),
        Err(ControllerError::JobBusy(JobKind::Export))
    ));

    assert!(controller.cancel_export());
    wait_for_job(&mut controller, JobKind::Export).await;

    let (done, reported_total) = store.last_progress(JobKind::Export).expect("progress");
    assert_eq!(reported_total, total);
    assert!(done < total);
    assert!(store
        .notices()
        .iter()
        .any(|n| n.kind == StatusKind::Warning && n.text == "Export cancelled"));
    assert!(!controller.cancel_export());
}

#[tokio::test]
async fn test_save_features_csv() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut controller, _store) = controller(config(10, dir.path()));
    controller.load_dataset(dataset(2, 10)).await;

    let path = dir.path().join("features.csv");
    assert!(matches!(
        controller.save_features_csv(&path),
        Err(ControllerError::Export(ExportError::NothingToSave))
    ));

    controller.start().await.expect("start");
    tick_n(&mut controller, 10).await;
    assert_eq!(controller.save_features_csv(&path).expect("save"), path);
    let text = fs::read_to_string(&path).expect("csv");
    assert!(text.starts_with("ID,happy,sad\n"));
    assert!(text.contains("\nID_2,"));
}

#[tokio::test]
async fn test_reset_clears_everything() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut controller, _store) = controller(config(10, dir.path()));
    controller.load_dataset(dataset(2, 10)).await;
    controller.start().await.expect("start");
    tick_n(&mut controller, 4).await;

    controller.reset().await;
    let status = controller.status();
    assert_eq!(status.history_len, 0);
    assert!(status.active_ids.is_empty());
    assert_eq!(status.displayed_index, None);
    assert!(controller.dataset().is_none());
    assert!(controller.start().await.is_err());
}
