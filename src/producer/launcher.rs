//! Producer launchers: how live acquisition obtains a running producer.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::host::ProcessSpec;
use super::{
    CaptureSink, FeatureProducer, ProducerError, ProducerHandle, ProducerSink, SyntheticProducer,
};
use crate::config::{ProducerKind, ProducerSettings};
use crate::types::{DataPacket, Frame, StatusEvent, VariableName};

/// Starts a producer wired to the given sink.
#[async_trait]
pub trait ProducerLauncher: Send {
    /// Human-readable description for logging.
    fn describe(&self) -> String;

    /// Start the producer and wait until it is ready to capture.
    async fn launch(&mut self, sink: ProducerSink) -> Result<ProducerHandle, ProducerError>;
}

/// Build the launcher described by `[producer]`.
pub fn launcher_from_config(
    settings: &ProducerSettings,
    variables: &[VariableName],
) -> Box<dyn ProducerLauncher> {
    match settings.kind {
        ProducerKind::Synthetic => {
            let synthetic = settings.synthetic.clone();
            let variables = variables.to_vec();
            Box::new(ThreadLauncher::new(
                move || {
                    Box::new(SyntheticProducer::new(&synthetic, variables.clone()))
                        as Box<dyn FeatureProducer>
                },
                settings.startup_timeout(),
            ))
        }
        ProducerKind::Process => Box::new(ProcessLauncher::new(
            ProcessSpec {
                command: settings.command.clone().unwrap_or_default(),
                args: settings.args.clone(),
                settings_json: settings.settings_json(),
            },
            settings.startup_timeout(),
        )),
    }
}

// ============================================================================
// Thread
// ============================================================================

type ProducerFactory = Box<dyn FnMut() -> Box<dyn FeatureProducer> + Send>;

/// Runs a fresh producer from `factory` on a supervised thread per start.
pub struct ThreadLauncher {
    factory: ProducerFactory,
    startup_timeout: Duration,
}

impl ThreadLauncher {
    pub fn new<F>(factory: F, startup_timeout: Duration) -> Self
    where
        F: FnMut() -> Box<dyn FeatureProducer> + Send + 'static,
    {
        Self {
            factory: Box::new(factory),
            startup_timeout,
        }
    }
}

#[async_trait]
impl ProducerLauncher for ThreadLauncher {
    fn describe(&self) -> String {
        "supervised thread".to_string()
    }

    async fn launch(&mut self, sink: ProducerSink) -> Result<ProducerHandle, ProducerError> {
        let producer = (self.factory)();
        ProducerHandle::spawn_thread(producer, sink, self.startup_timeout).await
    }
}

// ============================================================================
// Process
// ============================================================================

/// Spawns an OS process speaking the wire protocol per start.
pub struct ProcessLauncher {
    spec: ProcessSpec,
    startup_timeout: Duration,
}

impl ProcessLauncher {
    pub fn new(spec: ProcessSpec, startup_timeout: Duration) -> Self {
        Self {
            spec,
            startup_timeout,
        }
    }
}

#[async_trait]
impl ProducerLauncher for ProcessLauncher {
    fn describe(&self) -> String {
        format!("process '{} {}'", self.spec.command, self.spec.args.join(" "))
    }

    async fn launch(&mut self, sink: ProducerSink) -> Result<ProducerHandle, ProducerError> {
        ProducerHandle::spawn_process(&self.spec, sink, self.startup_timeout).await
    }
}

// ============================================================================
// In-Process Feed
// ============================================================================

/// Hands the sink to the embedding application instead of starting a
/// producer. The paired [`InProcessFeed`] pushes captures directly.
pub struct InProcessLauncher {
    slot: Arc<Mutex<Option<ProducerSink>>>,
    init_error: Option<String>,
}

/// Application-side handle of an [`InProcessLauncher`].
#[derive(Clone)]
pub struct InProcessFeed {
    slot: Arc<Mutex<Option<ProducerSink>>>,
}

impl InProcessLauncher {
    pub fn pair() -> (Self, InProcessFeed) {
        let slot = Arc::new(Mutex::new(None));
        (
            Self {
                slot: Arc::clone(&slot),
                init_error: None,
            },
            InProcessFeed { slot },
        )
    }

    /// Make the next launch fail as if the producer could not initialise.
    pub fn fail_next_launch(&mut self, message: &str) {
        self.init_error = Some(message.to_string());
    }
}

#[async_trait]
impl ProducerLauncher for InProcessLauncher {
    fn describe(&self) -> String {
        "in-process feed".to_string()
    }

    async fn launch(&mut self, sink: ProducerSink) -> Result<ProducerHandle, ProducerError> {
        if let Some(msg) = self.init_error.take() {
            sink.send_status(StatusEvent::error(msg.clone()));
            return Err(ProducerError::Init(msg));
        }
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(sink);
        Ok(ProducerHandle::external("in-process"))
    }
}

impl InProcessFeed {
    fn with_sink<T>(&self, f: impl FnOnce(&ProducerSink) -> T) -> Option<T> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().map(f)
    }

    /// Whether acquisition has launched this feed and is still listening.
    pub fn is_connected(&self) -> bool {
        self.with_sink(ProducerSink::is_connected).unwrap_or(false)
    }

    pub fn send_packet(&self, packet: DataPacket) -> bool {
        self.with_sink(|s| s.send_packet(packet)).unwrap_or(false)
    }

    pub fn send_frame(&self, frame: Frame) -> bool {
        self.with_sink(|s| s.send_frame(frame)).unwrap_or(false)
    }

    pub fn send_status(&self, event: StatusEvent) -> bool {
        self.with_sink(|s| s.send_status(event)).unwrap_or(false)
    }

    /// Drop the sink, as a producer that went away would.
    pub fn disconnect(&self) {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}
