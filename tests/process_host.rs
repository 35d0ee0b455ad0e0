//! Process Host Tests
//!
//! Producer processes speaking the wire protocol over stdout: the bundled
//! synthetic producer, scripts that die mid-stream, and shutdown of a
//! process that ignores stdin closing.

use std::time::{Duration, Instant};

use slopewatch::producer::host::ProcessSpec;
use slopewatch::producer::{producer_channels, ProducerChannels, ProducerError, ProducerHandle};
use slopewatch::{StatusEvent, StatusKind};

const STARTUP: Duration = Duration::from_secs(10);

async fn wait_for_status(channels: &mut ProducerChannels, kind: StatusKind) -> StatusEvent {
    for _ in 0..500 {
        if let Some(event) = channels.drain_status().into_iter().find(|e| e.kind == kind) {
            return event;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no {kind} status arrived");
}

fn synthetic_producer(args: &[&str]) -> ProcessSpec {
    ProcessSpec {
        command: env!("CARGO_BIN_EXE_synthetic-producer").to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        settings_json: "{}".to_string(),
    }
}

#[cfg(unix)]
fn shell(script: &str) -> ProcessSpec {
    ProcessSpec {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        settings_json: "{}".to_string(),
    }
}

#[tokio::test]
async fn test_synthetic_producer_process_emits_then_completes() {
    let (sink, mut channels) = producer_channels();
    let spec = synthetic_producer(&[
        "--packets",
        "5",
        "--interval-ms",
        "0",
        "--seed",
        "3",
        "--entities",
        "2",
        "--frames",
    ]);
    let handle = ProducerHandle::spawn_process(&spec, sink, STARTUP)
        .await
        .expect("synthetic producer starts");

    wait_for_status(&mut channels, StatusKind::Completed).await;
    let packets = channels.drain_packets();
    assert_eq!(packets.len(), 5);
    assert!(packets
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(channels.latest_frame().is_some());
    assert!(channels
        .drain_status()
        .iter()
        .all(|e| e.kind != StatusKind::Error));

    handle.shutdown(Duration::from_secs(2)).await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_process_exit_without_terminal_status_is_an_error() {
    let (sink, mut channels) = producer_channels();
    let spec = shell(
        r#"echo '{"type":"ready"}'; echo '{"type":"data","timestamp":0.0,"entities":{"ID_1":{"happy":0.5}}}'"#,
    );
    let handle = ProducerHandle::spawn_process(&spec, sink, STARTUP)
        .await
        .expect("script starts");

    let event = wait_for_status(&mut channels, StatusKind::Error).await;
    assert_eq!(event.text, "producer process exited unexpectedly");
    assert_eq!(channels.drain_packets().len(), 1);
    handle.shutdown(Duration::from_secs(1)).await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_process_exit_before_ready_fails_start() {
    let (sink, _channels) = producer_channels();
    let result = ProducerHandle::spawn_process(&shell("exit 3"), sink, STARTUP).await;
    assert!(matches!(
        result,
        Err(ProducerError::Init(ref m)) if m.contains("before signalling ready")
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_shutdown_kills_process_after_grace() {
    let (sink, mut channels) = producer_channels();
    let spec = shell(r#"echo '{"type":"ready"}'; exec sleep 30"#);
    let handle = ProducerHandle::spawn_process(&spec, sink, STARTUP)
        .await
        .expect("script starts");

    let started = Instant::now();
    handle.shutdown(Duration::from_millis(200)).await;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(5));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(channels
        .drain_status()
        .iter()
        .all(|e| e.kind != StatusKind::Error));
}
