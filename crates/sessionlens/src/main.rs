mod config;
mod sessions;
mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use sessionlens_git::GitMetadata;
use sessionlens_logging::{init_tracing, LogFormat, Logger};
use sessionlens_sessions::SessionStore;

use config::AppConfig;
use sessions::SessionsAction;

#[derive(Parser, Debug)]
#[command(
    name = "sessionlens",
    about = "Live monitor and usage analytics for coding-assistant sessions",
    version,
    author
)]
struct Cli {
    /// Config file (default: <config dir>/sessionlens/sessionlens.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Projects directory holding the transcripts (default: ~/.claude/projects)
    #[arg(long, global = true)]
    projects_dir: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormatChoice>,

    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Sessions(SessionsAction),

    /// Watch transcripts live until Ctrl+C
    Watch {
        /// Also append every event as JSON to this file
        #[arg(long)]
        event_log: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;

    // CLI flags win over the config file
    let log_format = match cli.log_format {
        Some(choice) => choice.into(),
        None => config.log_format()?.unwrap_or_default(),
    };
    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level().to_string());
    let _guard = init_tracing(&log_level, log_format, config.log_dir.as_deref());
    match AppConfig::source_path(cli.config.as_deref()) {
        Some(path) => tracing::debug!(path = %path.display(), "Loaded configuration"),
        None => tracing::debug!("No configuration file, using defaults"),
    }

    let store = build_store(&cli, &config)?;

    match cli.command {
        Command::Sessions(action) => sessions::handle_sessions_command(&store, action)?,
        Command::Watch { event_log } => {
            let logger = match event_log {
                Some(path) => Logger::with_file(log_format, &path)
                    .with_context(|| format!("Failed to open {}", path.display()))?,
                None => Logger::new(log_format),
            };
            watch::run_watch(store, config.watch.debounce, logger).await?;
        }
    }

    Ok(())
}

fn build_store(cli: &Cli, config: &AppConfig) -> Result<SessionStore> {
    let projects_dir = match cli.projects_dir.clone().or_else(|| config.projects_dir.clone()) {
        Some(dir) => dir,
        None => SessionStore::default_projects_dir().context("Could not determine home directory")?,
    };

    Ok(SessionStore::with_dir(projects_dir)
        .with_pricing(config.pricing_table())
        .with_vcs(Arc::new(GitMetadata::new()))
        .with_active_window(config.analytics.active_window)
        .with_peak_hours(config.analytics.peak_hours))
}
