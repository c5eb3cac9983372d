//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use anyhow::Context;
use epochcast_core::config::user_config_path;
use epochcast_core::{
    ChartRenderer, ConfigOverrides, EpochLogs, ModelInfo, NotifierConfig, TelegramCallback,
    TrackedMetrics, TrainingCallback, create_telegram_notifier, load_config, load_history,
    render_metrics,
};
use std::path::{Path, PathBuf};

/// Handle a CLI subcommand.
pub fn handle_command(
    command: Commands,
    config_file: Option<&Path>,
    overrides: ConfigOverrides,
) -> anyhow::Result<()> {
    match command {
        Commands::Ping { message } => handle_ping(&message, config_file, &overrides),
        Commands::Replay {
            history,
            model,
            metrics,
            plot_every,
            no_plot,
        } => {
            let overrides = ConfigOverrides {
                plot_n_epochs: plot_every,
                plot_metrics: no_plot.then_some(false),
                ..overrides
            };
            let model = ModelInfo::new(model).with_metrics(metrics);
            handle_replay(&history, &model, config_file, &overrides)
        }
        Commands::Render {
            history,
            output,
            metrics,
        } => handle_render(&history, output, &metrics, config_file, &overrides),
        Commands::Config { action } => handle_config(action, config_file, &overrides),
    }
}

fn load(config_file: Option<&Path>, overrides: &ConfigOverrides) -> anyhow::Result<NotifierConfig> {
    load_config(config_file, Some(overrides))
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

fn handle_ping(
    message: &str,
    config_file: Option<&Path>,
    overrides: &ConfigOverrides,
) -> anyhow::Result<()> {
    let config = load(config_file, overrides)?;
    config.validate()?;
    let notifier = create_telegram_notifier(&config)?;
    notifier
        .send_text(message)
        .with_context(|| format!("Could not reach chat {}", config.chat_id))?;
    println!("Message sent to chat {}.", config.chat_id);
    Ok(())
}

fn handle_replay(
    history: &Path,
    model: &ModelInfo,
    config_file: Option<&Path>,
    overrides: &ConfigOverrides,
) -> anyhow::Result<()> {
    let config = load(config_file, overrides)?;
    let entries = load_history(history)
        .with_context(|| format!("Failed to read history {}", history.display()))?;
    let mut callback = TelegramCallback::from_config(&config)?;

    tracing::info!(
        model = %model.name,
        epochs = entries.len(),
        history = %history.display(),
        "Replaying training history"
    );
    let empty = EpochLogs::new();
    callback.on_train_begin(model, &empty);
    for (epoch, logs) in &entries {
        callback.on_epoch_end(model, *epoch, logs);
    }
    let last = entries.last().map(|(_, logs)| logs).unwrap_or(&empty);
    callback.on_train_end(model, last);

    println!(
        "Replayed {} epochs of '{}' to chat {}.",
        entries.len(),
        model.name,
        config.chat_id
    );
    Ok(())
}

fn handle_render(
    history: &Path,
    output: PathBuf,
    metrics: &[String],
    config_file: Option<&Path>,
    overrides: &ConfigOverrides,
) -> anyhow::Result<()> {
    let config = load(config_file, overrides)?;
    let entries = load_history(history)
        .with_context(|| format!("Failed to read history {}", history.display()))?;
    let tracked = tracked_from(&entries);

    let mut render = config.render_config();
    render.image_path = output;
    let renderer = ChartRenderer::new(&render);
    let spec = render_metrics(&renderer, &tracked, metrics, &render.image_path)?;

    println!("Wrote {}", render.image_path.display());
    for panel in &spec.panels {
        println!("  {}", panel.title.join(" "));
    }
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    config_file: Option<&Path>,
    overrides: &ConfigOverrides,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = user_config_path()
                .context("Could not determine the user configuration directory")?;
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)?;
            }

            let toml_str = toml::to_string_pretty(&NotifierConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            println!("Set chat_id and token before running ping or replay.");
            Ok(())
        }
        ConfigAction::Show => {
            let mut config = load(config_file, overrides)?;
            config.token = mask_token(&config.token);
            if let Some(proxy) = config.proxy.as_mut() {
                if proxy.password.is_some() {
                    proxy.password = Some("****".into());
                }
            }
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn tracked_from(entries: &[(usize, EpochLogs)]) -> TrackedMetrics {
    let mut tracked = TrackedMetrics::new();
    for (epoch, logs) in entries {
        tracked.record(*epoch, logs);
    }
    tracked
}

/// Keep the bot id (before `:`) readable and hide the secret.
fn mask_token(token: &str) -> String {
    match token.split_once(':') {
        Some((bot_id, _)) => format!("{bot_id}:****"),
        None if token.is_empty() => String::new(),
        None => "****".into(),
    }
}
