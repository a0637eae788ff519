//! Telegram probe: sends one status message with the configured bot token
//! and chat id.

use std::process::ExitCode;

use anyhow::{Context, Result};
use betslip_monitor::config::{self, MessagingConfig};
use betslip_monitor::notifier::Notifier;
use betslip_monitor::telegram::TelegramMessenger;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    config::load_env_file()?;
    let messaging = MessagingConfig::new(
        std::env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN is not set")?,
        std::env::var("TELEGRAM_CHAT_ID").context("TELEGRAM_CHAT_ID is not set")?,
    )?;

    let text = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("Test message from betwatch at {}", chrono::Local::now()));
    let notifier = Notifier::new(TelegramMessenger::new(&messaging)?);

    if notifier.notify_status(&text).await {
        println!("Delivered to chat {}", messaging.chat_id);
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Delivery failed (see log)");
        Ok(ExitCode::FAILURE)
    }
}
