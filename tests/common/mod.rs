//! Shared fixtures for the controller integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use slopewatch::pipeline::{Fanout, JobKind, Presenter, TickOutcome, ViewStore};
use slopewatch::{AppConfig, Controller, DataPacket, ReplayDataset};

pub const VARIABLES: [&str; 2] = ["happy", "sad"];

pub fn config(window: usize, output_dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.analysis.variables = VARIABLES.iter().map(|v| v.to_string()).collect();
    config.analysis.sliding_window_samples = window;
    config.analysis.update_interval_ms = 10;
    config.export.output_dir = output_dir.to_path_buf();
    config
}

/// Smooth, non-constant value for `entity` at sample `i`.
pub fn value(entity: usize, i: usize) -> f64 {
    let x = i as f64;
    0.5 + 0.3 * (0.3 * x * (entity as f64 + 1.0)).sin() + 0.005 * x
}

/// `entities` x `samples` recording with half-second timestamps.
pub fn dataset(entities: usize, samples: usize) -> ReplayDataset {
    let packets = (0..samples)
        .map(|i| {
            let mut packet = DataPacket::new(i as f64 * 0.5);
            for e in 0..entities {
                let id = format!("ID_{}", e + 1);
                packet.insert(&id, "happy", value(e, i));
                packet.insert(&id, "sad", 1.0 - value(e, i + 7));
            }
            packet
        })
        .collect();
    ReplayDataset::from_packets(packets).expect("non-empty dataset")
}

pub fn controller(config: AppConfig) -> (Controller, Arc<ViewStore>) {
    let store = Arc::new(ViewStore::new());
    let presenters: Vec<Arc<dyn Presenter>> = vec![store.clone()];
    (Controller::new(config, Arc::new(Fanout(presenters))), store)
}

/// Run the pending scheduled tick.
pub async fn tick(controller: &mut Controller) -> TickOutcome {
    let (_, token) = controller.next_tick().expect("loop should be armed");
    controller.on_tick(token).await
}

pub async fn tick_n(controller: &mut Controller, n: usize) {
    for _ in 0..n {
        let outcome = tick(controller).await;
        assert!(
            matches!(outcome, TickOutcome::Computed { appended: true, .. }),
            "expected an appended packet, got {outcome:?}"
        );
    }
}

/// Poll background jobs until `job` is collected.
pub async fn wait_for_job(controller: &mut Controller, job: JobKind) {
    for _ in 0..1000 {
        if controller.poll_jobs().contains(&job) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{job} job did not finish");
}
