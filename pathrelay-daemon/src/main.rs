mod logging;
mod runtime;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pathrelay_config::{ConfigLoad, ConfigLoader};
use pathrelay_core::{MigrationRecord, MigrationState};
use tracing::info;

use runtime::Engine;

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "pathrelay")]
#[command(
    about = "Moves settled files from a staging tree into the media library and keeps the catalog in step"
)]
struct Cli {
    /// Config file (TOML or JSON). Defaults to ./config.toml when present.
    #[arg(short, long, env = "PATHRELAY_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Watch the staging tree and sweep originals until interrupted (default)
    Run,
    /// Run one cleanup sweep and exit
    Sweep,
    /// Finish or undo migrations interrupted by a crash and exit
    Recover,
    /// Print migration records, newest first
    Records {
        /// Only show records in this state (staging, migrated, purged)
        #[arg(long, value_parser = parse_state)]
        state: Option<MigrationState>,

        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

fn parse_state(raw: &str) -> Result<MigrationState, String> {
    raw.parse().map_err(|err| format!("{err}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_config_path(path);
    }
    let ConfigLoad { config, warnings } = loader.load().context("failed to load configuration")?;

    logging::init(&config.logging)?;

    if let Some(path) = config.metadata.config_path() {
        info!(path = %path.display(), "configuration loaded");
    }
    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    warnings.log();

    config
        .ensure_directories()
        .context("failed to prepare data directories")?;

    let engine = Engine::open(config).await?;
    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => engine.run().await,
        Command::Sweep => engine.sweep().await.map(|report| {
            info!(
                purged = report.purged,
                already_absent = report.already_absent,
                failed = report.failed,
                "sweep complete"
            );
        }),
        Command::Recover => engine.recover().await.map(|report| {
            info!(
                resumed = report.resumed,
                finalized = report.finalized,
                abandoned = report.abandoned,
                failed = report.failed,
                "recovery complete"
            );
        }),
        Command::Records { state, limit } => engine
            .records(state, limit)
            .await
            .map(|records| print_records(&records)),
    };

    engine.close().await;
    result
}

fn print_records(records: &[MigrationRecord]) {
    for record in records {
        let delete_at = record
            .delete_at
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>6}  {:<8}  {}  ->  {}  delete_at={}",
            record.id,
            record.state,
            record.source_path.display(),
            record.target_path.display(),
            delete_at
        );
    }
}
