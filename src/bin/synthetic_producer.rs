//! Synthetic Feature Producer
//!
//! Standalone wire-protocol producer for exercising the live path without a
//! camera pipeline. Packets carry `ID_<n>` entities with random-walk values
//! for every configured variable.
//!
//! Base settings come from the JSON document in `SLOPEWATCH_PRODUCER_SETTINGS`
//! (set by the host when it launches a process producer); flags override them.
//!
//! # Usage
//! ```bash
//! ./synthetic-producer --entities 3 --packets 500 --seed 7
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use slopewatch::config::defaults::PRODUCER_SETTINGS_ENV_VAR;
use slopewatch::config::{default_variables, SyntheticSettings};
use slopewatch::producer::{wire, SyntheticProducer};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "synthetic-producer")]
#[command(about = "Synthetic per-entity feature producer (wire protocol on stdout)")]
#[command(version)]
struct Args {
    /// Number of entities (ID_1 .. ID_n)
    #[arg(short, long)]
    entities: Option<usize>,

    /// Capture period in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Stop after this many packets
    #[arg(short, long)]
    packets: Option<usize>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Emit preview frames alongside packets
    #[arg(long)]
    frames: bool,

    /// Variables to emit (default: the built-in catalogue)
    #[arg(long, value_delimiter = ',')]
    variables: Vec<String>,
}

fn base_settings() -> SyntheticSettings {
    let Ok(raw) = std::env::var(PRODUCER_SETTINGS_ENV_VAR) else {
        return SyntheticSettings::default();
    };
    match serde_json::from_str(&raw) {
        Ok(settings) => settings,
        Err(e) => {
            warn!("[Producer] Ignoring malformed {}: {}", PRODUCER_SETTINGS_ENV_VAR, e);
            SyntheticSettings::default()
        }
    }
}

fn main() -> Result<()> {
    // stdout carries the wire protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut settings = base_settings();
    if let Some(n) = args.entities {
        settings.entities = n;
    }
    if let Some(ms) = args.interval_ms {
        settings.interval_ms = ms;
    }
    settings.packets = args.packets.or(settings.packets);
    settings.seed = args.seed.or(settings.seed);
    settings.frames |= args.frames;

    let variables = if args.variables.is_empty() {
        default_variables()
    } else {
        args.variables
    };

    info!(
        "[Producer] {} entities, {} variables, {} ms period, {}",
        settings.entities,
        variables.len(),
        settings.interval_ms,
        settings
            .packets
            .map(|n| format!("{n} packets"))
            .unwrap_or_else(|| "unbounded".to_string())
    );

    let mut producer = SyntheticProducer::new(&settings, variables);
    wire::serve_stdio(&mut producer).context("Synthetic producer failed")?;
    info!("[Producer] Finished");
    Ok(())
}
