//! Replay Flow Tests
//!
//! Drives a [`Controller`] in replay mode tick by tick: sliding window
//! bounds, scrubbing, stale ticks after stop, focus filtering and playback
//! completion.

mod common;

use slopewatch::pipeline::{ControllerError, TickOutcome};
use slopewatch::session::SeekError;
use slopewatch::{AcquisitionState, StatusKind};

use common::{config, controller, dataset, tick, tick_n};

#[tokio::test]
async fn test_sliding_window_bounds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut controller, store) = controller(config(10, dir.path()));
    assert_eq!(controller.load_dataset(dataset(3, 40)).await, 3);
    assert!(controller.start().await.expect("start"));

    tick_n(&mut controller, 6).await;
    let history = controller.session().history();
    assert_eq!(history.len(), 6);
    assert_eq!(history.sliding(5, 10).expect("window").len(), 6);

    tick_n(&mut controller, 10).await;
    let history = controller.session().history();
    let window = history.sliding(15, 10).expect("window");
    assert_eq!(window.len(), 10);
    assert_eq!(window[0].timestamp, 6.0 * 0.5);
    assert_eq!(window[9].timestamp, 15.0 * 0.5);

    let view = store.latest_view().expect("published view");
    assert_eq!(view.index, 15);
    assert_eq!(view.entity_ids, vec!["ID_1", "ID_2", "ID_3"]);
    assert_eq!(view.full().features.len(), 3);
    assert_eq!(view.sliding().features.len(), 3);
    for row in view.full().features.values() {
        assert_eq!(row.len(), 2);
    }
}

#[tokio::test]
async fn test_playback_completes_and_stops() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut controller, store) = controller(config(10, dir.path()));
    controller.load_dataset(dataset(2, 12)).await;
    controller.start().await.expect("start");

    tick_n(&mut controller, 12).await;
    assert_eq!(tick(&mut controller).await, TickOutcome::Completed);
    assert_eq!(controller.state(), AcquisitionState::Idle);
    assert!(controller.next_tick().is_none());
    assert!(store
        .notices()
        .iter()
        .any(|n| n.kind == StatusKind::Completed && n.text == "Playback complete"));

    // Restarting replays from the beginning.
    assert!(controller.start().await.expect("restart"));
    assert_eq!(controller.session().history().len(), 0);
    tick_n(&mut controller, 1).await;
    assert_eq!(controller.session().history().len(), 1);
}

#[tokio::test]
async fn test_stale_tick_after_stop_is_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut controller, store) = controller(config(10, dir.path()));
    controller.load_dataset(dataset(2, 20)).await;
    controller.start().await.expect("start");
    tick_n(&mut controller, 4).await;

    let (_, pending) = controller.next_tick().expect("armed");
    let published = store.published_count();
    assert!(controller.stop().await);

    assert_eq!(controller.on_tick(pending).await, TickOutcome::Stale);
    assert_eq!(controller.session().history().len(), 4);
    assert_eq!(store.published_count(), published);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut controller, _store) = controller(config(10, dir.path()));
    controller.load_dataset(dataset(1, 20)).await;
    controller.start().await.expect("start");
    tick_n(&mut controller, 3).await;

    let (_, pending) = controller.next_tick().expect("armed");
    assert_eq!(controller.toggle_pause(), Some(AcquisitionState::Paused));
    assert_eq!(controller.on_tick(pending).await, TickOutcome::Stale);
    assert!(controller.next_tick().is_none());

    assert_eq!(controller.toggle_pause(), Some(AcquisitionState::Running));
    tick_n(&mut controller, 1).await;
    assert_eq!(controller.session().history().len(), 4);
}

#[tokio::test]
async fn test_seek_validation_and_return_to_live() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut controller, store) = controller(config(10, dir.path()));

    assert!(matches!(
        controller.seek_to_index(0),
        Err(ControllerError::Seek(SeekError::NoHistory))
    ));

    controller.load_dataset(dataset(2, 30)).await;
    controller.start().await.expect("start");
    tick_n(&mut controller, 20).await;

    assert!(matches!(
        controller.seek_to_index(20),
        Err(ControllerError::Seek(SeekError::IndexOutOfRange { index: 20, len: 20 }))
    ));
    assert!(matches!(
        controller.seek_to_time(f64::NAN),
        Err(ControllerError::Seek(SeekError::NotANumber))
    ));
    assert!(matches!(
        controller.seek_to_time(100.0),
        Err(ControllerError::Seek(SeekError::TimeOutOfRange { .. }))
    ));
    // Rejected seeks leave the loop running.
    assert!(controller.next_tick().is_some());

    let snapshot = controller.seek_to_time(3.1).expect("seek");
    assert_eq!(snapshot.index, 6);
    assert_eq!(store.latest_view().expect("view").index, 6);
    let status = controller.status();
    assert_eq!(status.displayed_index, Some(6));
    assert!(!status.follows_tip);
    assert!(controller.next_tick().is_none());
    assert_eq!(controller.state(), AcquisitionState::Running);

    assert!(controller.return_to_live().is_none());
    assert!(controller.status().follows_tip);
    tick_n(&mut controller, 1).await;
    assert_eq!(store.latest_view().expect("view").index, 20);
}

#[tokio::test]
async fn test_focus_filters_published_views() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut controller, store) = controller(config(10, dir.path()));
    controller.load_dataset(dataset(3, 15)).await;
    controller.start().await.expect("start");
    tick_n(&mut controller, 8).await;

    controller.set_focus(vec!["ID_2".to_string()]);
    let view = store.latest_view().expect("view");
    assert_eq!(view.entity_ids, vec!["ID_2"]);
    assert_eq!(
        view.full().features.keys().collect::<Vec<_>>(),
        vec!["ID_2"]
    );

    tick_n(&mut controller, 1).await;
    let view = store.latest_view().expect("view");
    assert_eq!(view.index, 8);
    assert_eq!(view.sliding().features.len(), 1);

    controller.focus_all();
    assert_eq!(store.latest_view().expect("view").entity_ids.len(), 3);
}

#[tokio::test]
async fn test_display_pause_keeps_acquiring() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut controller, store) = controller(config(10, dir.path()));
    controller.load_dataset(dataset(1, 15)).await;
    controller.start().await.expect("start");
    tick_n(&mut controller, 2).await;

    controller.set_display_paused(true);
    let published = store.published_count();
    tick_n(&mut controller, 3).await;
    assert_eq!(store.published_count(), published);
    assert_eq!(controller.session().history().len(), 5);

    controller.set_display_paused(false);
    assert_eq!(store.latest_view().expect("view").index, 4);
}

#[tokio::test]
async fn test_start_without_dataset_is_refused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut controller, store) = controller(config(10, dir.path()));
    assert!(matches!(
        controller.start().await,
        Err(ControllerError::Acquisition(_))
    ));
    assert_eq!(controller.state(), AcquisitionState::Idle);
    assert!(store.notices().iter().any(|n| n.kind == StatusKind::Error));
}
