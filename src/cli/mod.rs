//! Command-line interface.

mod live;
mod query;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use crossterm::tty::IsTty;
use tracing::info;
use tracing_subscriber::EnvFilter;

use honeybot::classify::BotRegistry;
use honeybot::config::{self, Settings};
use honeybot::reports::ReportKind;
use honeybot::repository::{DieselTrafficStore, MemoryTrafficStore};
use honeybot::TrafficStore;

#[derive(Parser)]
#[command(name = "honeybot")]
#[command(about = "Real-time web traffic intelligence", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file (defaults to <data_dir>/honeybot.db)
    #[arg(long, global = true, env = "HONEYBOT_DB")]
    db: Option<PathBuf>,

    /// Known-bot registry file (defaults to <data_dir>/bots.txt)
    #[arg(long, global = true, env = "HONEYBOT_REGISTRY")]
    registry: Option<PathBuf>,

    /// Keep aggregates in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow an access log with the live dashboard and narration
    Watch {
        /// Log file to follow, or - for stdin
        log: String,

        /// Log requests instead of drawing the dashboard
        #[arg(long)]
        no_dashboard: bool,

        /// Read the existing file content before following
        #[arg(long)]
        from_start: bool,

        /// Disable the heartbeat, the show and speech output
        #[arg(long)]
        no_narration: bool,
    },

    /// Import an existing access log into the store
    Ingest {
        /// Log file to import
        log: PathBuf,
    },

    /// Print a traffic report
    Report {
        #[arg(value_enum)]
        kind: ReportKind,

        /// Lookback window in days, including today
        #[arg(long)]
        days: Option<u32>,

        /// Maximum rows
        #[arg(long)]
        limit: Option<usize>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Rank agents missing from the bot registry
    Classify {
        /// Lookback window in days, including today
        #[arg(long)]
        days: Option<u32>,

        /// Maximum candidates
        #[arg(long)]
        limit: Option<usize>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Read or adjust a persistent counter
    Counter {
        key: String,

        /// Amount to add (may be negative)
        #[arg(long, allow_hyphen_values = true)]
        add: Option<i64>,
    },
}

/// Resolved runtime dependencies shared by every command.
pub(crate) struct AppContext {
    pub settings: Settings,
    pub store: Arc<dyn TrafficStore>,
    pub registry: Arc<BotRegistry>,
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default = if verbose { "honeybot=debug" } else { "honeybot=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn open_store(cli: &Cli, settings: &Settings) -> Result<Arc<dyn TrafficStore>> {
    if cli.ephemeral {
        info!("Using an in-memory store; nothing will be persisted");
        return Ok(Arc::new(MemoryTrafficStore::new()));
    }
    let path = cli.db.clone().unwrap_or_else(|| settings.database_path());
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = DieselTrafficStore::open(&path)
        .with_context(|| format!("Failed to open store {}", path.display()))?;
    info!("Opened store {}", path.display());
    Ok(Arc::new(store))
}

pub async fn run(cli: Cli) -> Result<()> {
    let settings = config::load_settings().await;

    let dashboard = matches!(cli.command, Commands::Watch { no_dashboard: false, .. })
        && std::io::stdout().is_tty();
    if dashboard {
        settings
            .ensure_directories()
            .with_context(|| format!("Failed to create {}", settings.data_dir.display()))?;
        init_logging(cli.verbose, Some(&settings.log_path()))?;
    } else {
        init_logging(cli.verbose, None)?;
    }

    let store = open_store(&cli, &settings)?;
    let registry_path = cli
        .registry
        .clone()
        .unwrap_or_else(|| settings.registry_path.clone());
    let registry = Arc::new(BotRegistry::load_or_empty(&registry_path));

    let ctx = AppContext {
        settings,
        store,
        registry,
    };

    match cli.command {
        Commands::Watch {
            log,
            from_start,
            no_narration,
            ..
        } => {
            live::watch(
                &ctx,
                live::WatchArgs {
                    log,
                    from_start,
                    dashboard,
                    narration: !no_narration,
                },
            )
            .await
        }
        Commands::Ingest { log } => live::ingest(&ctx, log).await,
        Commands::Report {
            kind,
            days,
            limit,
            json,
        } => query::report(&ctx, kind, days, limit, json).await,
        Commands::Classify { days, limit, json } => query::classify(&ctx, days, limit, json).await,
        Commands::Counter { key, add } => query::counter(&ctx, &key, add).await,
    }
}
