use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daemon::{
    config::LoggingConfig,
    DaemonConfig, Orchestrator, ProcessedDatabase, ToolLocations,
};
use log::{error, info, warn, LevelFilter};
use std::fs::OpenOptions;
use std::path::PathBuf;

/// Backs up disc rips to a remote and transcodes them into the media library
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, or JSON for any other extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process both libraries once (the default)
    Run {
        /// Print the run report as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Print input files that are backed up and converted and still on disk
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = DaemonConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    init_logging(&cfg.logging, args.verbose)?;

    let db = ProcessedDatabase::open(&cfg.logging.db)
        .with_context(|| format!("Failed to open status database: {}", cfg.logging.db.display()))?;

    match args.command.unwrap_or(Command::Run { json: false }) {
        Command::Run { json } => run(&cfg, db, json).await,
        Command::List => list(&db),
    }
}

/// `RUST_LOG` wins over the configured level; `--verbose` wins over both
fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.format_timestamp_secs();

    let configured = logging.level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
    builder.filter_level(configured);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    }

    if let Some(path) = &logging.file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        builder
            .target(env_logger::Target::Pipe(Box::new(file)))
            .write_style(env_logger::WriteStyle::Never);
    }

    builder.init();

    if logging.level.parse::<LevelFilter>().is_err() {
        warn!("Unknown log level '{}', using info", logging.level);
    }
    Ok(())
}

async fn run(cfg: &DaemonConfig, db: ProcessedDatabase, json: bool) -> Result<()> {
    info!("ripd starting");
    info!("Configuration loaded:");
    info!("  Movies: {} -> {}", cfg.directories.movie_in.display(), cfg.directories.movie_out.display());
    info!("  TV: {} -> {}", cfg.directories.tv_in.display(), cfg.directories.tv_out.display());
    info!("  Working dir: {}", cfg.directories.working.display());
    info!("  Backup remote: {}", cfg.backup.remote_path);
    info!("  Status db: {}", cfg.logging.db.display());

    std::fs::create_dir_all(&cfg.directories.working)
        .with_context(|| format!("Failed to create working directory: {}", cfg.directories.working.display()))?;

    let tools = ToolLocations::resolve(&cfg.tools).context("Failed to locate external tools")?;
    let orchestrator = Orchestrator::new(cfg, tools, db).context("Invalid transcode settings")?;

    let report = match orchestrator.run().await {
        Ok(report) => report,
        Err(e) => {
            error!("Run aborted: {}", e);
            return Err(e).context("Status database failure");
        }
    };

    info!(
        "Movies: {}/{} processed, {} errors",
        report.movie_processed, report.movie_total, report.movie_errors
    );
    info!(
        "TV: {}/{} processed, {} errors",
        report.tv_processed, report.tv_total, report.tv_errors
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn list(db: &ProcessedDatabase) -> Result<()> {
    let done = db.all_existing_success().context("Failed to read status database")?;
    for status in &done {
        println!("{}", status.input_file.display());
    }
    info!("{} completed files", done.len());
    Ok(())
}
