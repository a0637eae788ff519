//! Telegram Bot API adapter.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::MessagingConfig;
use crate::notifier::Messenger;

pub const API_BASE: &str = "https://api.telegram.org";
pub const SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Subset of the Bot API response envelope.
#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// Sends messages with `sendMessage` in HTML parse mode.
///
/// Traffic goes directly to Telegram, not through the betting proxy.
#[derive(Clone)]
pub struct TelegramMessenger {
    client: Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramMessenger {
    pub fn new(config: &MessagingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("failed to build Telegram HTTP client")?;
        Ok(Self {
            client,
            endpoint: send_message_url(API_BASE, &config.bot_token),
            chat_id: config.chat_id.clone(),
        })
    }
}

pub fn send_message_url(base: &str, token: &str) -> String {
    format!("{}/bot{token}/sendMessage", base.trim_end_matches('/'))
}

/// Map an HTTP status and body to delivery success.
pub fn check_response(status: u16, body: &str) -> Result<()> {
    let parsed: Option<ApiResponse> = serde_json::from_str(body).ok();
    if !(200..300).contains(&status) {
        let reason = parsed
            .and_then(|r| r.description)
            .unwrap_or_else(|| body.chars().take(200).collect());
        bail!("Telegram returned HTTP {status}: {reason}");
    }
    match parsed {
        Some(ApiResponse { ok: true, .. }) => Ok(()),
        Some(ApiResponse { description, .. }) => {
            bail!("Telegram rejected message: {}", description.unwrap_or_default())
        }
        None => bail!("malformed Telegram response"),
    }
}

impl Messenger for TelegramMessenger {
    async fn send(&self, text: &str) -> Result<()> {
        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .context("Telegram request failed")?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        check_response(status, &body)
    }
}
