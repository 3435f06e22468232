//! Chat destinations
//!
//! A [`Notifier`] delivers one rendered alert to one destination and
//! reports whether it got there. The dispatcher only deletes a message
//! after a successful send.

use crate::config::TelegramConfig;
use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivers rendered alerts.
pub trait Notifier: Sync {
    /// Send `text` to `destination`.
    ///
    /// # Errors
    ///
    /// [`Error::Delivery`] if the destination did not accept the
    /// message.
    fn send(&self, destination: &str, text: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Telegram Bot API `sendMessage` client.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_url: String,
    token: String,
    parse_mode: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    /// # Errors
    ///
    /// [`Error::Config`] if no bot token is configured or the HTTP
    /// client cannot be built.
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(
                    "Telegram bot token missing (set telegram.token or TELEGRAM_BOT_TOKEN)".into(),
                )
            })?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            parse_mode: config.parse_mode.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.token)
    }
}

impl Notifier for TelegramNotifier {
    async fn send(&self, destination: &str, text: &str) -> Result<()> {
        debug!("Sending {} bytes to chat {}", text.len(), destination);
        let body = json!({
            "chat_id": destination,
            "text": text,
            "parse_mode": self.parse_mode,
            "disable_web_page_preview": true,
        });

        // The token is part of the URL; keep reqwest's error text out of it.
        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("Request failed: {}", e.without_url())))?;

        let status = response.status();
        let resp: Option<ApiResponse> = response.json().await.ok();

        match resp {
            Some(ApiResponse { ok: true, .. }) if status.is_success() => {
                info!("Notification delivered to chat {}", destination);
                Ok(())
            }
            Some(ApiResponse { description, .. }) => Err(Error::Delivery(format!(
                "Telegram rejected message ({status}): {}",
                description.unwrap_or_else(|| "no description".into())
            ))),
            None => Err(Error::Delivery(format!(
                "Unexpected response from Telegram ({status})"
            ))),
        }
    }
}

/// Prints alerts to stdout instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    async fn send(&self, destination: &str, text: &str) -> Result<()> {
        println!("--- {destination}\n{text}\n");
        Ok(())
    }
}
