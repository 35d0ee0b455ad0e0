//! Producer hosts: supervised thread or OS process.
//!
//! Either way the consumer only sees the channels. A panicking thread or a
//! crashing process surfaces as a status Error; it never touches consumer
//! state.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::wire::{self, WireMessage};
use super::{run_capture_loop, CaptureSink, FeatureProducer, ProducerError, ProducerSink};
use crate::config::defaults::PRODUCER_SETTINGS_ENV_VAR;
use crate::types::{StatusEvent, StatusKind};

type ReadySender = oneshot::Sender<Result<(), String>>;

/// How a producer process is started.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub command: String,
    pub args: Vec<String>,
    /// Opaque settings, handed over via `SLOPEWATCH_PRODUCER_SETTINGS`
    pub settings_json: String,
}

enum Host {
    Thread {
        running: Arc<AtomicBool>,
        join: std::thread::JoinHandle<()>,
    },
    Process {
        child: Child,
        stdin: Option<ChildStdin>,
        stopping: Arc<AtomicBool>,
        reader: tokio::task::JoinHandle<()>,
    },
    /// Fed by the embedding application; nothing to supervise
    External,
}

/// Running producer. Dropping it without [`shutdown`](Self::shutdown) kills
/// a producer process and detaches a producer thread.
pub struct ProducerHandle {
    name: String,
    host: Host,
}

impl ProducerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn external(name: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Host::External,
        }
    }

    // ------------------------------------------------------------------------
    // Thread host
    // ------------------------------------------------------------------------

    /// Run `producer` on a dedicated thread and wait for its ready handshake.
    pub async fn spawn_thread(
        producer: Box<dyn FeatureProducer>,
        sink: ProducerSink,
        startup_timeout: Duration,
    ) -> Result<Self, ProducerError> {
        let name = producer.name().to_string();
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_running = Arc::clone(&running);
        let join = std::thread::Builder::new()
            .name(format!("producer-{}", name.to_lowercase()))
            .spawn(move || supervise_thread(producer, sink, thread_running, ready_tx))?;

        match tokio::time::timeout(startup_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                info!("🎥 Producer '{}' ready (thread)", name);
                Ok(Self {
                    name,
                    host: Host::Thread { running, join },
                })
            }
            Ok(Ok(Err(msg))) => Err(ProducerError::Init(msg)),
            Ok(Err(_)) => Err(ProducerError::Init(format!(
                "producer '{name}' exited before signalling ready"
            ))),
            Err(_) => {
                running.store(false, Ordering::Release);
                Err(ProducerError::StartupTimeout(startup_timeout))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Process host
    // ------------------------------------------------------------------------

    /// Spawn a producer process and wait for its `ready` line.
    pub async fn spawn_process(
        spec: &ProcessSpec,
        sink: ProducerSink,
        startup_timeout: Duration,
    ) -> Result<Self, ProducerError> {
        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .env(PRODUCER_SETTINGS_ENV_VAR, &spec.settings_json)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProducerError::Spawn {
                command: spec.command.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProducerError::Init("producer stdout was not captured".to_string()))?;
        let stdin = child.stdin.take();
        let stopping = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();
        let reader = tokio::spawn(read_wire(stdout, sink, Arc::clone(&stopping), ready_tx));

        let failure = match tokio::time::timeout(startup_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                info!(pid = ?child.id(), "🎥 Producer '{}' ready (process)", spec.command);
                return Ok(Self {
                    name: spec.command.clone(),
                    host: Host::Process {
                        child,
                        stdin,
                        stopping,
                        reader,
                    },
                });
            }
            Ok(Ok(Err(msg))) => ProducerError::Init(msg),
            Ok(Err(_)) => ProducerError::Init("producer reader ended unexpectedly".to_string()),
            Err(_) => ProducerError::StartupTimeout(startup_timeout),
        };

        stopping.store(true, Ordering::Release);
        if let Err(e) = child.kill().await {
            debug!("[ProducerHost] kill after failed start: {}", e);
        }
        reader.abort();
        Err(failure)
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Request termination, wait up to `grace`, then force it.
    pub async fn shutdown(self, grace: Duration) {
        let name = self.name;
        match self.host {
            Host::Thread { running, join } => {
                running.store(false, Ordering::Release);
                let deadline = Instant::now() + grace;
                while !join.is_finished() && Instant::now() < deadline {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                if join.is_finished() {
                    let _ = join.join();
                    info!("[ProducerHost] '{}' thread stopped", name);
                } else {
                    // Threads cannot be killed; it exits on its next capture.
                    warn!(
                        "[ProducerHost] '{}' thread did not stop within {:?}, detaching",
                        name, grace
                    );
                }
            }
            Host::Process {
                mut child,
                stdin,
                stopping,
                reader,
            } => {
                stopping.store(true, Ordering::Release);
                drop(stdin);
                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(Ok(status)) => {
                        info!("[ProducerHost] '{}' exited ({})", name, status);
                    }
                    Ok(Err(e)) => {
                        warn!("[ProducerHost] waiting for '{}' failed: {}", name, e);
                    }
                    Err(_) => {
                        warn!(
                            "[ProducerHost] '{}' did not exit within {:?}, killing",
                            name, grace
                        );
                        if let Err(e) = child.kill().await {
                            error!("[ProducerHost] failed to kill '{}': {}", name, e);
                        }
                    }
                }
                reader.abort();
            }
            Host::External => {
                debug!("[ProducerHost] '{}' is externally managed", name);
            }
        }
    }
}

fn supervise_thread(
    mut producer: Box<dyn FeatureProducer>,
    sink: ProducerSink,
    running: Arc<AtomicBool>,
    ready_tx: ReadySender,
) {
    let name = producer.name().to_string();
    let status_sink = sink.clone();
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        run_capture_loop(producer.as_mut(), &sink, &running, |ready| {
            let _ = ready_tx.send(ready);
        });
    }));
    if let Err(panic) = outcome {
        let message = panic_message(panic.as_ref());
        error!("[{}] Producer panicked: {}", name, message);
        status_sink.send_status(StatusEvent::error(format!("producer crashed: {message}")));
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Forward wire messages from a producer's stdout into the channels.
async fn read_wire(
    stdout: ChildStdout,
    sink: ProducerSink,
    stopping: Arc<AtomicBool>,
    ready_tx: ReadySender,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut ready_tx = Some(ready_tx);
    let mut terminal_seen = false;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("[ProducerProcess] stdout read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match wire::decode(&line) {
            Ok(WireMessage::Ready) => {
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(WireMessage::Data(packet)) => {
                sink.send_packet(packet);
            }
            Ok(WireMessage::Frame(frame)) => {
                sink.send_frame(frame);
            }
            Ok(WireMessage::Status(event)) => {
                terminal_seen |= event.is_terminal();
                if event.kind == StatusKind::Error {
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(Err(event.text.clone()));
                    }
                }
                sink.send_status(event);
            }
            Err(e) => {
                warn!("[ProducerProcess] Skipping malformed line: {}", e);
            }
        }
    }

    if let Some(tx) = ready_tx.take() {
        let _ = tx.send(Err("producer process exited before signalling ready".to_string()));
    } else if !terminal_seen && !stopping.load(Ordering::Acquire) {
        sink.send_status(StatusEvent::error("producer process exited unexpectedly"));
    }
}
