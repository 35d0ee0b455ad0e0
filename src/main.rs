//! slopewatch command-line front end.
//!
//! ```bash
//! slopewatch replay --data session.csv --export
//! slopewatch live --packets 120
//! slopewatch batch --entity-files person_ID_1.csv person_ID_2.csv --export
//! slopewatch export --data session.csv --time 42.5 --artifact feature-table
//! slopewatch produce --entities 4 | consumer
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use slopewatch::config::{AppConfig, ProducerKind};
use slopewatch::pipeline::{Fanout, LogPresenter, Presenter, ViewStore};
use slopewatch::producer::{wire, SyntheticProducer};
use slopewatch::{
    AcquisitionState, Artifact, Controller, ControllerDriver, ControllerHandle, ExportSelection,
    ModeKind, ReplayDataset, Snapshot,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "slopewatch")]
#[command(about = "Spectral-slope features over replayed or live per-entity streams")]
#[command(version)]
struct CliArgs {
    /// Config file (defaults: $SLOPEWATCH_CONFIG, then ./slopewatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Scheduling loop period in milliseconds
    #[arg(long, global = true)]
    interval_ms: Option<u64>,

    /// Sliding window length in samples
    #[arg(long, global = true)]
    window: Option<usize>,

    /// Root directory for export folders
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Args, Debug)]
struct DataArgs {
    /// Wide table with `<entity>_<variable>` columns
    #[arg(long, conflicts_with = "entity_files", required_unless_present = "entity_files")]
    data: Option<PathBuf>,

    /// Per-entity CSV files; the entity id comes from `ID_<n>` in the file name
    #[arg(long, num_args = 1..)]
    entity_files: Vec<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Replay a recording at the configured cadence
    Replay {
        #[command(flatten)]
        data: DataArgs,
        /// Export every artifact when playback completes
        #[arg(long)]
        export: bool,
        /// Save the final full-window feature table to this path
        #[arg(long)]
        features_csv: Option<PathBuf>,
    },

    /// Consume a live producer
    Live {
        /// Run this wire-protocol producer instead of the configured one
        #[arg(long)]
        producer_command: Option<String>,
        /// Arguments for --producer-command
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        producer_args: Vec<String>,
        /// Synthetic producer: stop after this many packets
        #[arg(long)]
        packets: Option<usize>,
        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
        /// Export every artifact when acquisition ends
        #[arg(long)]
        export: bool,
    },

    /// Recompute the whole recording in one pass
    Batch {
        #[command(flatten)]
        data: DataArgs,
        /// Export every artifact when the batch completes
        #[arg(long)]
        export: bool,
    },

    /// Export the state at one point of a recording
    Export {
        #[command(flatten)]
        data: DataArgs,
        /// History index to export (default: last)
        #[arg(long, conflicts_with = "time")]
        index: Option<usize>,
        /// Timestamp to export; the closest packet is used
        #[arg(long)]
        time: Option<f64>,
        /// Artifacts to write (default: all)
        #[arg(long = "artifact", value_enum)]
        artifacts: Vec<ArtifactArg>,
    },

    /// Run the synthetic producer on stdout (wire protocol)
    Produce {
        #[arg(long)]
        entities: Option<usize>,
        #[arg(long)]
        packets: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        /// Capture period in milliseconds
        #[arg(long)]
        rate_ms: Option<u64>,
        /// Emit preview frames
        #[arg(long)]
        frames: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ArtifactArg {
    FeatureTable,
    SlopeTable,
    Clustering,
    Kmeans,
    Heatmap,
    Spectrum,
    Radar,
}

impl From<ArtifactArg> for Artifact {
    fn from(arg: ArtifactArg) -> Self {
        match arg {
            ArtifactArg::FeatureTable => Artifact::FeatureTable,
            ArtifactArg::SlopeTable => Artifact::SlopeTable,
            ArtifactArg::Clustering => Artifact::Clustering,
            ArtifactArg::Kmeans => Artifact::KMeans,
            ArtifactArg::Heatmap => Artifact::Heatmap,
            ArtifactArg::Spectrum => Artifact::Spectrum,
            ArtifactArg::Radar => Artifact::Radar,
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout is reserved for results and the producer wire protocol.
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AppConfig::load(),
    };
    if let Some(ms) = args.interval_ms {
        config.analysis.update_interval_ms = ms;
    }
    if let Some(w) = args.window {
        config.analysis.sliding_window_samples = w;
    }
    if let Some(dir) = &args.output_dir {
        config.export.output_dir = dir.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn load_dataset(data: &DataArgs, config: &AppConfig) -> Result<ReplayDataset> {
    let variables = &config.analysis.variables;
    let dataset = match &data.data {
        Some(path) => ReplayDataset::load_wide(path, variables)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ReplayDataset::load_per_entity(&data.entity_files, variables)
            .context("Failed to load per-entity files")?,
    };
    Ok(dataset)
}

// ============================================================================
// Flows
// ============================================================================

const WAIT_POLL: Duration = Duration::from_millis(200);

/// Poll the controller until `done` holds or shutdown is requested.
async fn wait_until<F>(handle: &ControllerHandle, cancel: &CancellationToken, done: F) -> Result<bool>
where
    F: Fn(&slopewatch::pipeline::ControllerStatus) -> bool,
{
    loop {
        if done(&handle.status().await?) {
            return Ok(true);
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(false),
            _ = tokio::time::sleep(WAIT_POLL) => {}
        }
    }
}

async fn export_and_wait(
    handle: &ControllerHandle,
    cancel: &CancellationToken,
    selection: ExportSelection,
) -> Result<()> {
    let total = handle.start_export(selection).await?;
    info!("💾 Export started ({} steps)", total);
    let finished = wait_until(handle, cancel, |s| s.export_progress.is_none()).await?;
    if !finished {
        handle.cancel_export().await?;
        // Let the worker observe the flag before the driver goes away.
        tokio::time::sleep(WAIT_POLL).await;
    }
    Ok(())
}

async fn run_replay(
    handle: &ControllerHandle,
    cancel: &CancellationToken,
    dataset: ReplayDataset,
    export: bool,
    features_csv: Option<PathBuf>,
) -> Result<()> {
    handle.load_dataset(dataset).await?;
    handle.start().await?;
    if !wait_until(handle, cancel, |s| s.state == AcquisitionState::Idle).await? {
        return Ok(());
    }
    if let Some(path) = features_csv {
        handle.save_features_csv(path).await?;
    }
    if export {
        export_and_wait(handle, cancel, ExportSelection::all()).await?;
    }
    Ok(())
}

async fn run_live(
    handle: &ControllerHandle,
    cancel: &CancellationToken,
    duration: Option<Duration>,
    export: bool,
) -> Result<()> {
    handle.select_mode(ModeKind::Live).await?;
    handle.start().await?;

    let idle = wait_until(handle, cancel, |s| s.state == AcquisitionState::Idle);
    let completed = match duration {
        Some(d) => tokio::time::timeout(d, idle).await.unwrap_or(Ok(true))?,
        None => idle.await?,
    };
    handle.stop().await?;
    if completed && export {
        export_and_wait(handle, cancel, ExportSelection::all()).await?;
    }
    Ok(())
}

async fn run_batch(
    handle: &ControllerHandle,
    cancel: &CancellationToken,
    dataset: ReplayDataset,
    export: bool,
) -> Result<()> {
    handle.load_dataset(dataset).await?;
    handle.start_batch().await?;
    if !wait_until(handle, cancel, |s| !s.batch_running).await? {
        return Ok(());
    }
    if export {
        export_and_wait(handle, cancel, ExportSelection::all()).await?;
    }
    Ok(())
}

async fn run_export(
    handle: &ControllerHandle,
    cancel: &CancellationToken,
    dataset: ReplayDataset,
    index: Option<usize>,
    time: Option<f64>,
    selection: ExportSelection,
) -> Result<()> {
    handle.load_dataset(dataset).await?;
    handle.start_batch().await?;
    if !wait_until(handle, cancel, |s| !s.batch_running).await? {
        return Ok(());
    }
    match (index, time) {
        (Some(i), _) => {
            handle.seek_to_index(i).await?;
        }
        (None, Some(t)) => {
            handle.seek_to_time(t).await?;
        }
        (None, None) => {}
    }
    export_and_wait(handle, cancel, selection).await
}

fn run_produce(
    mut config: AppConfig,
    entities: Option<usize>,
    packets: Option<usize>,
    seed: Option<u64>,
    rate_ms: Option<u64>,
    frames: bool,
) -> Result<()> {
    let synthetic = &mut config.producer.synthetic;
    if let Some(n) = entities {
        synthetic.entities = n;
    }
    synthetic.packets = packets.or(synthetic.packets);
    synthetic.seed = seed.or(synthetic.seed);
    if let Some(ms) = rate_ms {
        synthetic.interval_ms = ms;
    }
    synthetic.frames |= frames;

    let mut producer = SyntheticProducer::new(synthetic, config.analysis.variables.clone());
    wire::serve_stdio(&mut producer).context("Synthetic producer failed")
}

fn print_summary(view: Option<&Snapshot>) {
    let Some(view) = view else {
        println!("No features computed.");
        return;
    };
    println!();
    println!("━━━ Full-window slopes at index {} (t = {:.3}) ━━━", view.index, view.timestamp);
    for (entity, row) in &view.full().features {
        let fitted: Vec<f64> = row.values().copied().filter(|s| *s != 0.0).collect();
        let mean = if fitted.is_empty() {
            0.0
        } else {
            fitted.iter().sum::<f64>() / fitted.len() as f64
        };
        println!(
            "  {:<10} {:>2}/{} variables fitted, mean slope {:+.3}",
            entity,
            fitted.len(),
            row.len(),
            mean
        );
    }
    println!();
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.json_logs);

    let mut config = load_config(&args)?;

    if let SubCommand::Produce {
        entities,
        packets,
        seed,
        rate_ms,
        frames,
    } = args.command
    {
        return tokio::task::spawn_blocking(move || {
            run_produce(config, entities, packets, seed, rate_ms, frames)
        })
        .await
        .context("Producer thread panicked")?;
    }

    if let SubCommand::Live {
        producer_command: Some(command),
        producer_args,
        ..
    } = &args.command
    {
        config.producer.kind = ProducerKind::Process;
        config.producer.command = Some(command.clone());
        config.producer.args = producer_args.clone();
    }
    if let SubCommand::Live {
        packets: Some(n), ..
    } = &args.command
    {
        config.producer.synthetic.packets = Some(*n);
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  slopewatch - spectral-slope feature engine");
    info!(
        "  interval {} ms | window {} samples | {} variables",
        config.analysis.update_interval_ms,
        config.analysis.sliding_window_samples,
        config.analysis.variables.len()
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let store = Arc::new(ViewStore::new());
    let presenters: Vec<Arc<dyn Presenter>> = vec![store.clone(), Arc::new(LogPresenter)];
    let controller = Controller::new(config.clone(), Arc::new(Fanout(presenters)));
    let (driver, handle) = ControllerDriver::new(controller, cancel_token.clone());
    let driver_task = tokio::spawn(driver.run());

    let flow = match args.command {
        SubCommand::Replay {
            data,
            export,
            features_csv,
        } => {
            let dataset = load_dataset(&data, &config)?;
            run_replay(&handle, &cancel_token, dataset, export, features_csv).await
        }
        SubCommand::Live {
            duration_secs,
            export,
            ..
        } => {
            run_live(
                &handle,
                &cancel_token,
                duration_secs.map(Duration::from_secs),
                export,
            )
            .await
        }
        SubCommand::Batch { data, export } => {
            let dataset = load_dataset(&data, &config)?;
            run_batch(&handle, &cancel_token, dataset, export).await
        }
        SubCommand::Export {
            data,
            index,
            time,
            artifacts,
        } => {
            let dataset = load_dataset(&data, &config)?;
            let selection = if artifacts.is_empty() {
                ExportSelection::all()
            } else {
                ExportSelection::only(artifacts.into_iter().map(Artifact::from))
            };
            run_export(&handle, &cancel_token, dataset, index, time, selection).await
        }
        SubCommand::Produce { .. } => Ok(()),
    };
    if let Err(e) = &flow {
        warn!("{:#}", e);
    }

    cancel_token.cancel();
    drop(handle);
    driver_task.await.context("Controller driver panicked")?;

    print_summary(store.latest_view().as_deref());
    for notice in store.notices() {
        if notice.kind == slopewatch::StatusKind::Error {
            warn!("{}", notice);
        }
    }
    flow
}
