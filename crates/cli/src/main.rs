//! dircast: replicate one flat directory across participants
//!
//! Every participant monitors its own shared directory, publishes
//! changes over the topic bus, and applies what peers publish,
//! converging on a last-writer-wins state keyed by modification time.

use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects};
use clap::{builder::Styles, Parser};
use color_eyre::Result;
use tracing::info;

use dircast_engine::{validate_shared_dir, EngineConfig, ReplicationEngine};
use dircast_transport::MemBus;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser)]
#[command(name = "dircast")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Replicate a flat directory across pub/sub participants")]
#[command(long_about = r#"
dircast keeps one flat directory in sync across every participant on
the bus.

Each participant:
  • polls its shared directory and publishes created/modified/deleted
    files as events plus integrity-checked transfers
  • applies changes published by peers under last-writer-wins,
    preserving the originator's modification times
  • suppresses re-publication of writes it applied on a peer's behalf

Example:
  dircast /srv/shared            Share /srv/shared
  dircast -v /srv/shared         Same, with debug logging
"#)]
struct Cli {
    /// Shared directory to replicate
    directory: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Runtime configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let dir = validate_shared_dir(&cli.directory)?;

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    info!(
        "dircast starting, monitoring {} (poll every {}ms)",
        dir.display(),
        config.poll_interval_ms,
    );

    let bus = MemBus::new();
    let engine = ReplicationEngine::new(dir, bus.join(), config)?;
    engine.start()?;

    // Runs until interrupted
    engine.wait();
    Ok(())
}
