use anyhow::Result;
use tracing::{error, info};

use crate::types::BetRecord;

/// Delivers one pre-formatted HTML message to the chat channel.
#[allow(async_fn_in_trait)]
pub trait Messenger {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Logs messages instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMessenger;

impl Messenger for LogMessenger {
    async fn send(&self, text: &str) -> Result<()> {
        info!("[dry-run] would send:\n{text}");
        Ok(())
    }
}

/// Formats bet and status events and hands them to a `Messenger`.
///
/// Delivery is at most once per call. Failures are logged and reported as
/// `false`, never propagated.
pub struct Notifier<M> {
    messenger: M,
}

impl<M: Messenger> Notifier<M> {
    pub fn new(messenger: M) -> Self {
        Self { messenger }
    }

    pub fn messenger(&self) -> &M {
        &self.messenger
    }

    pub async fn notify_bet(&self, bet: &BetRecord) -> bool {
        match self.messenger.send(&bet_message(bet)).await {
            Ok(()) => {
                info!("Telegram notification sent for {}", bet.betslip_id);
                true
            }
            Err(e) => {
                error!("Failed to send notification for {}: {e:#}", bet.betslip_id);
                false
            }
        }
    }

    pub async fn notify_status(&self, message: &str) -> bool {
        match self.messenger.send(&status_message(message)).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send status update: {e:#}");
                false
            }
        }
    }
}

/// Telegram HTML body for a newly detected bet.
pub fn bet_message(bet: &BetRecord) -> String {
    format!(
        "🎯 <b>NEW BET DETECTED!</b>\n\
         \n\
         🆔 <b>Bet ID:</b> <code>{}</code>\n\
         ⚽ <b>Match:</b> {}\n\
         📊 <b>Market:</b> {}\n\
         💰 <b>Stake:</b> {}\n\
         🎲 <b>Odds:</b> {}\n\
         🏆 <b>Potential Win:</b> {}\n\
         🕐 <b>Time:</b> {}\n\
         📌 <b>Status:</b> {}\n\
         \n\
         🍀 Good luck!",
        escape_html(&bet.betslip_id),
        escape_html(&bet.teams),
        escape_html(&bet.market),
        escape_html(&bet.stake),
        escape_html(&bet.odds),
        escape_html(&bet.possible_winnings),
        escape_html(&bet.bet_time),
        escape_html(&bet.status),
    )
}

pub fn status_message(message: &str) -> String {
    format!("ℹ️ <b>Status Update:</b>\n{}", escape_html(message))
}

/// Escape the characters Telegram's HTML parse mode treats as markup.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
