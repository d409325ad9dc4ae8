use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use harvest_core::{load_harvest_config, HarvestConfig, LaunchOverrides};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

pub mod commands;

use commands::files::FilesCommands;
use commands::harvest::HarvestArgs;

pub type Result<T> = std::result::Result<T, AppError>;

const DEFAULT_CONFIG: &str = "configs/harvest.toml";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] harvest_core::ConfigError),
    #[error("invalid request: {0}")]
    Request(#[from] harvest_core::RequestError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),
    #[error("no such file in download directory: {0}")]
    MissingFile(String),
    #[error("logging setup failed: {0}")]
    Logging(String),
    #[error("harvest did not complete")]
    HarvestFailed,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Call-recording harvester control interface", long_about = None)]
pub struct Cli {
    /// Path to harvest.toml (defaults to configs/harvest.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Overrides downloads.directory
    #[arg(long)]
    pub download_dir: Option<PathBuf>,
    /// Run Chromium with a visible window
    #[arg(long)]
    pub headed: bool,
    /// Debug-level logs (RUST_LOG takes precedence)
    #[arg(short, long)]
    pub verbose: bool,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Harvest recordings for a destination and date range
    Harvest(HarvestArgs),
    /// Inspect and retrieve downloaded recordings
    #[command(subcommand)]
    Files(FilesCommands),
}

pub fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.verbose)?;
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Harvest(args) => {
            // Validated up front so a bad request never launches a browser.
            let request = args.to_request()?;
            let overrides = LaunchOverrides {
                headless: cli.headed.then_some(false),
            };
            let report = commands::harvest::execute(config, request, overrides)?;
            render(&report, cli.format)?;
            if report.run.outcome.is_failure() {
                return Err(AppError::HarvestFailed);
            }
        }
        Commands::Files(command) => {
            let dir = &config.downloads.directory;
            match command {
                FilesCommands::List => {
                    let listing = commands::files::list(dir, &config.downloads.partial_suffixes)?;
                    render(&listing, cli.format)?;
                }
                FilesCommands::Get(args) => {
                    let copied = commands::files::get(dir, &args.name, args.output.as_deref())?;
                    render(&copied, cli.format)?;
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| AppError::Logging(err.to_string()))
}

pub fn load_config(cli: &Cli) -> Result<HarvestConfig> {
    let mut config = match &cli.config {
        Some(path) => load_harvest_config(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => load_harvest_config(DEFAULT_CONFIG)?,
        None => {
            debug!("no config file found, using defaults");
            let mut config = HarvestConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            config
        }
    };
    if let Some(dir) = &cli.download_dir {
        config.downloads.directory = dir.clone();
    }
    info!(download_dir = %config.downloads.directory.display(), "configuration loaded");
    Ok(config)
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}
