#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI relaying monitoring alert emails to Telegram

use alertmail::{
    Config, ConsoleNotifier, Dispatcher, ImapConnector, LogRotation, RunReport, TelegramNotifier,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "alertmail", version)]
#[command(about = "Relay monitoring alert emails from IMAP mailboxes to Telegram")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file [default: $ALERTMAIL_CONFIG or ./config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level used when `RUST_LOG` is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Dispatch every message of every configured mailbox once
    Run {
        /// Do not send notifications
        #[arg(long)]
        no_notify: bool,

        /// Keep handled messages in the mailbox
        #[arg(long)]
        no_delete: bool,
    },

    /// Print the rendered alerts without sending or deleting anything
    Preview,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;

    let log_file = args.log_file.clone().or_else(|| config.log_file.clone());
    setup_logging(&args.log_level, log_file.as_deref(), &config)?;

    let report = match args.command {
        Command::Run {
            no_notify,
            no_delete,
        } => {
            config.notify &= !no_notify;
            config.delete &= !no_delete;
            cmd_run(&config).await?
        }
        Command::Preview => cmd_preview(config).await?,
    };

    info!("Run finished: {}", report.total());
    if report.has_failures() {
        for (label, result) in &report.mailboxes {
            if let Err(e) = result {
                eprintln!("{label}: {e}");
            }
        }
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Set up tracing with stderr output and optional rotating file logging.
fn setup_logging(level: &str, log_file: Option<&Path>, config: &Config) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let file_layer = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let stem = path
                .file_stem()
                .with_context(|| format!("Invalid log file path {}", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create log directory {}", dir.display()))?;

            let rotation = match config.log_rotation {
                LogRotation::Hourly => Rotation::HOURLY,
                LogRotation::Daily => Rotation::DAILY,
                LogRotation::Never => Rotation::NEVER,
            };
            let mut builder = RollingFileAppender::builder()
                .rotation(rotation)
                .filename_prefix(stem.to_string_lossy().into_owned())
                .max_log_files(config.log_max_files);
            if let Some(ext) = path.extension() {
                builder = builder.filename_suffix(ext.to_string_lossy().into_owned());
            }
            let appender = builder
                .build(dir)
                .with_context(|| format!("Cannot open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(appender),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

async fn cmd_run(config: &Config) -> anyhow::Result<RunReport> {
    if !config.delete {
        warn!("Deletion disabled, handled messages stay in their mailbox");
    }

    if config.notify {
        let notifier = TelegramNotifier::new(&config.telegram)?;
        let dispatcher = Dispatcher::new(ImapConnector, notifier, config)?;
        Ok(dispatcher.dispatch(&config.mailboxes).await)
    } else {
        warn!("Notifications disabled, alerts will not be sent");
        // Never called with notify off.
        let dispatcher = Dispatcher::new(ImapConnector, ConsoleNotifier, config)?;
        Ok(dispatcher.dispatch(&config.mailboxes).await)
    }
}

async fn cmd_preview(mut config: Config) -> anyhow::Result<RunReport> {
    config.notify = true;
    config.delete = false;

    let dispatcher = Dispatcher::new(ImapConnector, ConsoleNotifier, &config)?;
    Ok(dispatcher.dispatch(&config.mailboxes).await)
}
