//! # Epochcast Core
//!
//! Training-progress notifications for Telegram.
//! Provides metric accumulation, chart rendering, the Bot API notifier,
//! lifecycle callbacks, and configuration.

pub mod callback;
pub mod chart;
pub mod config;
pub mod error;
pub mod metrics;
pub mod telegram;

// Re-export commonly used types at the crate root.
pub use callback::{ModelInfo, TelegramCallback, TrainingCallback, TrainingState};
pub use chart::{ChartRenderer, ChartSpec, PanelSpec, SeriesSpec, render_metrics};
pub use config::{ChatId, ConfigOverrides, NotifierConfig, ProxyConfig, RenderConfig, load_config};
pub use error::{ConfigError, DeliveryError, EpochcastError, RenderError, Result};
pub use metrics::{EpochLogs, Extremum, ExtremumPolicy, TrackedMetrics, load_history};
pub use telegram::{
    RealTelegramHttp, TelegramHttpClient, TelegramNotifier, create_telegram_notifier,
};
