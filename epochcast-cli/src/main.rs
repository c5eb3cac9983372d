//! Epochcast CLI - drive the training notifier from the terminal.
//!
//! Checks Telegram credentials, replays recorded training histories through the full
//! notification lifecycle, and renders metric charts offline.

mod commands;

use clap::Parser;
use epochcast_core::{ChatId, ConfigOverrides};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Epochcast: training progress, delivered to Telegram
#[derive(Parser, Debug)]
#[command(name = "epochcast", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Chat to notify: numeric id or @channel name (overrides config)
    #[arg(long, global = true, value_parser = parse_chat_id)]
    chat_id: Option<ChatId>,

    /// Bot token (overrides config)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Send a test message to check the token, chat id, and proxy
    Ping {
        /// Message text
        #[arg(short, long, default_value = "Epochcast is connected.")]
        message: String,
    },
    /// Feed a JSON-lines training history through the notifier as if training live
    Replay {
        /// History file, one `{"epoch": N, "logs": {...}}` object per line
        history: PathBuf,
        /// Model name used in the start message
        #[arg(short, long, default_value = "model")]
        model: String,
        /// Metrics to chart, comma separated (default: every tracked metric)
        #[arg(long, value_delimiter = ',')]
        metrics: Vec<String>,
        /// Send a chart every N epochs
        #[arg(long)]
        plot_every: Option<usize>,
        /// Send text only
        #[arg(long)]
        no_plot: bool,
    },
    /// Render the metrics chart for a history file without sending anything
    Render {
        /// History file, one `{"epoch": N, "logs": {...}}` object per line
        history: PathBuf,
        /// Output image; the extension picks the format
        #[arg(short, long, default_value = "chart.jpg")]
        output: PathBuf,
        /// Metrics to chart, comma separated (default: every tracked metric)
        #[arg(long, value_delimiter = ',')]
        metrics: Vec<String>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default configuration file to the user config directory
    Init,
    /// Show the merged configuration (token masked)
    Show,
}

fn parse_chat_id(raw: &str) -> Result<ChatId, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("chat id cannot be empty".into());
    }
    Ok(raw
        .parse::<i64>()
        .map(ChatId::Id)
        .unwrap_or_else(|_| ChatId::Username(raw.to_string())))
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "epochcast", "epochcast")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "epochcast.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let overrides = ConfigOverrides {
        chat_id: cli.chat_id,
        token: cli.token,
        ..Default::default()
    };

    commands::handle_command(cli.command, cli.config.as_deref(), overrides)
}
