//! Configuration system for Epochcast.
//!
//! Uses `figment` for layered configuration: defaults -> user config -> explicit config file ->
//! environment -> CLI overrides. The user-level file lives at `~/.config/epochcast/config.toml`.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Font used for chart text when none is configured.
pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

/// Telegram chat identifier: a numeric id or a public `@channel` username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatId {
    Id(i64),
    Username(String),
}

impl ChatId {
    /// A zero id or blank username means the field was never set.
    pub fn is_unset(&self) -> bool {
        match self {
            ChatId::Id(id) => *id == 0,
            ChatId::Username(name) => name.trim().is_empty(),
        }
    }
}

impl Default for ChatId {
    fn default() -> Self {
        ChatId::Id(0)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatId::Id(id) => write!(f, "{id}"),
            ChatId::Username(name) => write!(f, "{name}"),
        }
    }
}

/// HTTP(S) proxy used for every Bot API request.
///
/// A present `username` selects basic auth; `password` defaults to empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub proxy_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProxyConfig {
    pub fn new(proxy_url: impl Into<String>) -> Self {
        Self {
            proxy_url: proxy_url.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// `(username, password)` when basic auth is configured.
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        self.username
            .as_deref()
            .map(|user| (user, self.password.as_deref().unwrap_or("")))
    }
}

/// Top-level configuration for a Telegram training notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Recipient chat.
    pub chat_id: ChatId,
    /// Bot API token issued by @BotFather.
    pub token: String,
    /// Render and send charts at all.
    pub plot_metrics: bool,
    /// Scratch file the latest chart is written to before upload.
    pub temp_image_path: PathBuf,
    /// Send an intermediate chart every N epochs.
    pub plot_n_epochs: usize,
    /// Width and height of one chart panel, in inches.
    pub figsize: (f64, f64),
    /// TrueType font used for titles and axis labels.
    pub font_path: PathBuf,
    /// Per-request timeout; unset means wait indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            chat_id: ChatId::default(),
            token: String::new(),
            plot_metrics: true,
            temp_image_path: PathBuf::from("temp.jpg"),
            plot_n_epochs: 100,
            figsize: (10.0, 5.0),
            font_path: PathBuf::from(DEFAULT_FONT_PATH),
            request_timeout_secs: None,
            proxy: None,
        }
    }
}

impl NotifierConfig {
    pub fn new(chat_id: ChatId, token: impl Into<String>) -> Self {
        Self {
            chat_id,
            token: token.into(),
            ..Default::default()
        }
    }

    /// Check required fields and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chat_id.is_unset() {
            return Err(ConfigError::MissingField {
                field: "chat_id".into(),
            });
        }
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "token".into(),
            });
        }
        if self.plot_n_epochs == 0 {
            return Err(ConfigError::Invalid {
                message: "plot_n_epochs must be a positive integer".into(),
            });
        }
        let (width, height) = self.figsize;
        if !(width > 0.0 && height > 0.0) {
            return Err(ConfigError::Invalid {
                message: format!("figsize must be positive, got {width}x{height}"),
            });
        }
        if let Some(proxy) = &self.proxy {
            if proxy.proxy_url.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: "proxy.proxy_url".into(),
                });
            }
        }
        Ok(())
    }

    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            image_path: self.temp_image_path.clone(),
            figsize: self.figsize,
            plot_metrics: self.plot_metrics,
            plot_n_epochs: self.plot_n_epochs.max(1),
            font_path: self.font_path.clone(),
        }
    }

    pub fn chat_target(&self) -> ChatTarget {
        ChatTarget {
            chat_id: self.chat_id.clone(),
            token: self.token.clone(),
            proxy: self.proxy.clone(),
        }
    }
}

/// Chart settings captured once when the notifier is built.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub image_path: PathBuf,
    pub figsize: (f64, f64),
    pub plot_metrics: bool,
    pub plot_n_epochs: usize,
    pub font_path: PathBuf,
}

impl Default for RenderConfig {
    fn default() -> Self {
        NotifierConfig::default().render_config()
    }
}

/// Where messages go and how to authenticate. Never mutated after setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTarget {
    pub chat_id: ChatId,
    pub token: String,
    pub proxy: Option<ProxyConfig>,
}

/// Command-line overrides; only the fields that are set take effect.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot_metrics: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_image_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot_n_epochs: Option<usize>,
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides
/// 2. Environment variables (prefixed with `EPOCHCAST_`, `__` for nesting)
/// 3. Explicit config file
/// 4. User config (`~/.config/epochcast/config.toml`)
/// 5. Built-in defaults
///
/// The result is not validated; call [`NotifierConfig::validate`] before sending anything.
pub fn load_config(
    config_file: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<NotifierConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(NotifierConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = config_file {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    // EPOCHCAST_TOKEN, EPOCHCAST_PROXY__PROXY_URL, etc.
    figment = figment.merge(Env::prefixed("EPOCHCAST_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    Ok(figment.extract()?)
}

/// `~/.config/epochcast/config.toml` (or the platform equivalent).
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "epochcast", "epochcast")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NotifierConfig::default();
        assert!(config.plot_metrics);
        assert_eq!(config.temp_image_path, PathBuf::from("temp.jpg"));
        assert_eq!(config.plot_n_epochs, 100);
        assert_eq!(config.figsize, (10.0, 5.0));
        assert!(config.proxy.is_none());
    }

    #[test]
    fn test_validate_requires_chat_and_token() {
        let config = NotifierConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField { field }) if field == "chat_id"
        ));

        let config = NotifierConfig::new(ChatId::Id(42), "  ");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField { field }) if field == "token"
        ));

        let config = NotifierConfig::new(ChatId::Username("@runs".into()), "123:ABC");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = NotifierConfig::new(ChatId::Id(42), "123:ABC");
        config.plot_n_epochs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_validate_rejects_empty_proxy_url() {
        let mut config = NotifierConfig::new(ChatId::Id(42), "123:ABC");
        config.proxy = Some(ProxyConfig::new(""));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField { field }) if field == "proxy.proxy_url"
        ));
    }

    #[test]
    fn test_proxy_basic_auth() {
        let plain = ProxyConfig::new("http://proxy:3128");
        assert_eq!(plain.basic_auth(), None);

        let authed = ProxyConfig::new("http://proxy:3128").with_basic_auth("alice", "s3cret");
        assert_eq!(authed.basic_auth(), Some(("alice", "s3cret")));

        let no_password = ProxyConfig {
            proxy_url: "http://proxy:3128".into(),
            username: Some("bob".into()),
            password: None,
        };
        assert_eq!(no_password.basic_auth(), Some(("bob", "")));
    }

    #[test]
    fn test_chat_id_display() {
        assert_eq!(ChatId::Id(-100123).to_string(), "-100123");
        assert_eq!(ChatId::Username("@runs".into()).to_string(), "@runs");
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("epochcast.toml");
        std::fs::write(
            &path,
            r#"
chat_id = 987654
token = "123:ABC"
plot_n_epochs = 5
figsize = [12, 4]

[proxy]
proxy_url = "http://proxy.local:8080"
username = "alice"
password = "pw"
"#,
        )
        .unwrap();

        let config = load_config(Some(&path), None).unwrap();
        assert_eq!(config.chat_id, ChatId::Id(987654));
        assert_eq!(config.token, "123:ABC");
        assert_eq!(config.plot_n_epochs, 5);
        assert_eq!(config.figsize, (12.0, 4.0));
        assert_eq!(config.temp_image_path, PathBuf::from("temp.jpg"));
        let proxy = config.proxy.unwrap();
        assert_eq!(proxy.basic_auth(), Some(("alice", "pw")));
    }

    #[test]
    fn test_load_config_overrides_win() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("epochcast.toml");
        std::fs::write(&path, "chat_id = 1\ntoken = \"file-token\"\nplot_n_epochs = 10\n").unwrap();

        let overrides = ConfigOverrides {
            plot_n_epochs: Some(3),
            plot_metrics: Some(false),
            ..Default::default()
        };
        let config = load_config(Some(&path), Some(&overrides)).unwrap();
        assert_eq!(config.token, "file-token");
        assert_eq!(config.plot_n_epochs, 3);
        assert!(!config.plot_metrics);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config(Some(Path::new("/nonexistent/epochcast.toml")), None);
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_render_config_from_notifier_config() {
        let mut config = NotifierConfig::new(ChatId::Id(7), "t");
        config.temp_image_path = PathBuf::from("/tmp/chart.png");
        let render = config.render_config();
        assert_eq!(render.image_path, PathBuf::from("/tmp/chart.png"));
        assert_eq!(render.plot_n_epochs, 100);
        assert!(render.plot_metrics);
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let toml_str = toml::to_string_pretty(&NotifierConfig::default()).unwrap();
        assert!(toml_str.contains("plot_n_epochs = 100"));
        assert!(toml_str.contains("temp_image_path = \"temp.jpg\""));
        assert!(!toml_str.contains("proxy"));

        let parsed: NotifierConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.figsize, (10.0, 5.0));
    }
}
