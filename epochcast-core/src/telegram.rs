//! Telegram Bot API notifier.
//!
//! Uses the Bot API via blocking reqwest for `sendMessage` / `sendPhoto`. Every call runs on
//! the caller's thread. In tests, the `TelegramHttpClient` trait allows mocking.

use crate::config::{ChatId, NotifierConfig, ProxyConfig};
use crate::error::DeliveryError;
use reqwest::blocking::multipart::{Form, Part};
use std::path::Path;
use std::time::Duration;

const API_BASE: &str = "https://api.telegram.org";

/// Trait for HTTP interactions, allowing test mocking.
///
/// Both calls return the id of the message Telegram created.
pub trait TelegramHttpClient: Send + Sync {
    fn send_message(&self, chat_id: &ChatId, text: &str) -> Result<i64, DeliveryError>;
    fn send_photo(
        &self,
        chat_id: &ChatId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<i64, DeliveryError>;
}

/// Sends text and chart images to one chat.
///
/// Failures are logged here and handed back to the caller, which is expected to drop them:
/// a lost notification must never stop training.
pub struct TelegramNotifier {
    chat_id: ChatId,
    http_client: Box<dyn TelegramHttpClient>,
}

impl TelegramNotifier {
    pub fn new(chat_id: ChatId, http_client: Box<dyn TelegramHttpClient>) -> Self {
        Self {
            chat_id,
            http_client,
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn send_text(&self, text: &str) -> Result<(), DeliveryError> {
        match self.http_client.send_message(&self.chat_id, text) {
            Ok(message_id) => {
                tracing::info!(chat_id = %self.chat_id, message_id, "Message sent");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(chat_id = %self.chat_id, error = %e, "Message did not send");
                Err(e)
            }
        }
    }

    /// Upload the image at `path`. On failure a best-effort text describing the error is sent.
    pub fn send_image(&self, path: &Path) -> Result<(), DeliveryError> {
        match self.upload(path) {
            Ok(message_id) => {
                tracing::info!(chat_id = %self.chat_id, message_id, path = %path.display(), "Image sent");
                Ok(())
            }
            Err(e) => {
                let _ = self.send_text(&format!("Image did not send. Error: {e}."));
                tracing::warn!(chat_id = %self.chat_id, path = %path.display(), error = %e, "Image did not send");
                Err(e)
            }
        }
    }

    fn upload(&self, path: &Path) -> Result<i64, DeliveryError> {
        // The file is closed as soon as it has been read, before the request goes out.
        let bytes = std::fs::read(path).map_err(|e| DeliveryError::ImageRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("chart.jpg");
        self.http_client.send_photo(&self.chat_id, file_name, bytes)
    }
}

/// Real Telegram Bot API HTTP client using blocking reqwest.
pub struct RealTelegramHttp {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl RealTelegramHttp {
    /// Build a client for `bot_token`. The proxy, if any, applies to every request.
    pub fn new(
        bot_token: &str,
        proxy: Option<&ProxyConfig>,
        timeout: Option<Duration>,
    ) -> Result<Self, DeliveryError> {
        Self::with_base_url(API_BASE, bot_token, proxy, timeout)
    }

    /// Same as [`RealTelegramHttp::new`] against a self-hosted Bot API server.
    pub fn with_base_url(
        api_base: &str,
        bot_token: &str,
        proxy: Option<&ProxyConfig>,
        timeout: Option<Duration>,
    ) -> Result<Self, DeliveryError> {
        let mut builder = reqwest::blocking::Client::builder().timeout(timeout);
        if let Some(proxy) = proxy {
            builder = builder.proxy(build_proxy(proxy)?);
            tracing::debug!(proxy_url = %proxy.proxy_url, auth = proxy.basic_auth().is_some(), "Using proxy");
        }
        let client = builder.build().map_err(|e| DeliveryError::Http {
            message: e.to_string(),
        })?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), bot_token),
        })
    }

    fn finish(&self, resp: reqwest::blocking::Response) -> Result<i64, DeliveryError> {
        let status = resp.status().as_u16();
        let body: serde_json::Value = resp.json().map_err(|e| DeliveryError::ResponseParse {
            message: e.to_string(),
        })?;
        parse_response(status, &body)
    }
}

impl TelegramHttpClient for RealTelegramHttp {
    fn send_message(&self, chat_id: &ChatId, text: &str) -> Result<i64, DeliveryError> {
        let url = format!("{}/sendMessage", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
            }))
            .send()
            .map_err(|e| DeliveryError::Http {
                message: e.to_string(),
            })?;
        self.finish(resp)
    }

    fn send_photo(
        &self,
        chat_id: &ChatId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<i64, DeliveryError> {
        let url = format!("{}/sendPhoto", self.base_url);
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", Part::bytes(bytes).file_name(file_name.to_string()));
        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .map_err(|e| DeliveryError::Http {
                message: e.to_string(),
            })?;
        self.finish(resp)
    }
}

fn build_proxy(config: &ProxyConfig) -> Result<reqwest::Proxy, DeliveryError> {
    let proxy = reqwest::Proxy::all(&config.proxy_url).map_err(|e| DeliveryError::Proxy {
        url: config.proxy_url.clone(),
        message: e.to_string(),
    })?;
    Ok(match config.basic_auth() {
        Some((username, password)) => proxy.basic_auth(username, password),
        None => proxy,
    })
}

/// Interpret a Bot API response body: `{"ok": true, "result": {"message_id": 7, ...}}`.
fn parse_response(status: u16, body: &serde_json::Value) -> Result<i64, DeliveryError> {
    if !body["ok"].as_bool().unwrap_or(false) {
        let description = body["description"]
            .as_str()
            .unwrap_or("unknown error")
            .to_string();
        return Err(DeliveryError::Api {
            status,
            description,
        });
    }
    Ok(body["result"]["message_id"].as_i64().unwrap_or(0))
}

/// Create a notifier with a real HTTP client from a validated configuration.
pub fn create_telegram_notifier(config: &NotifierConfig) -> Result<TelegramNotifier, DeliveryError> {
    let target = config.chat_target();
    let http = RealTelegramHttp::new(
        &target.token,
        target.proxy.as_ref(),
        config.request_timeout_secs.map(Duration::from_secs),
    )?;
    Ok(TelegramNotifier::new(target.chat_id, Box::new(http)))
}
