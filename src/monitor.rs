use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::SettingsConfig;
use crate::extractor::BetExtractor;
use crate::lifecycle::SessionLifecycle;
use crate::notifier::{Messenger, Notifier};
use crate::page;
use crate::reporter;
use crate::session::Browser;
use crate::state::DedupStore;
use crate::types::{MonitorEvent, RunSummary, StopReason};

/// Loop cadence and limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    pub check_interval: Duration,
    /// Consecutive failed iterations tolerated before stopping.
    pub max_errors: u32,
    /// Refresh the page every N iterations.
    pub refresh_every: u64,
    /// Send a status summary every N successful iterations.
    pub status_every: u64,
    pub history_path: PathBuf,
    pub refresh_settle: Duration,
}

impl LoopSettings {
    pub fn from_settings(settings: &SettingsConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(settings.check_interval_secs),
            max_errors: settings.max_errors.max(1),
            refresh_every: settings.refresh_every.max(1),
            status_every: settings.status_every(),
            history_path: PathBuf::from(&settings.history_path),
            refresh_settle: settings.timings().refresh_settle,
        }
    }
}

/// The running monitor. Owns the session lifecycle, the dedup store and the
/// notifier for the whole run.
pub struct MonitorLoop<B, M> {
    lifecycle: SessionLifecycle<B>,
    notifier: Notifier<M>,
    store: DedupStore,
    extractor: BetExtractor,
    settings: LoopSettings,
    run_id: String,
}

impl<B: Browser, M: Messenger> MonitorLoop<B, M> {
    pub fn new(
        lifecycle: SessionLifecycle<B>,
        notifier: Notifier<M>,
        store: DedupStore,
        settings: LoopSettings,
    ) -> Self {
        Self {
            lifecycle,
            notifier,
            store,
            extractor: BetExtractor::default(),
            settings,
            run_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn store(&self) -> &DedupStore {
        &self.store
    }

    /// Check for new bets until `shutdown` resolves or the error budget is
    /// spent, then flush history and release the session.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> RunSummary {
        let span = info_span!("monitor", run_id = %self.run_id);
        self.run_inner(shutdown).instrument(span).await
    }

    async fn run_inner(mut self, shutdown: impl Future<Output = ()>) -> RunSummary {
        let started_at = chrono::Utc::now().to_rfc3339();
        let interval = self.settings.check_interval;
        let max_errors = self.settings.max_errors;
        info!(
            "Starting monitoring loop (checking every {}s). Press Ctrl+C to stop.",
            interval.as_secs()
        );

        tokio::pin!(shutdown);
        let mut iteration: u64 = 0;
        let mut consecutive_errors: u32 = 0;

        let stop_reason = loop {
            iteration += 1;
            info!("Check #{iteration} - Looking for new bets...");

            match self.check_once(iteration).await {
                Ok(()) => {
                    consecutive_errors = 0;
                    if iteration % self.settings.status_every == 0 {
                        self.notifier
                            .notify_status(&format!(
                                "Monitor active - {iteration} checks completed\nTotal bets tracked: {}",
                                self.store.len()
                            ))
                            .await;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!("Monitoring error ({consecutive_errors}/{max_errors}): {e:#}");
                    if consecutive_errors >= max_errors {
                        error!("Max errors reached - stopping monitor");
                        self.notifier
                            .notify_status("⚠️ Monitor stopped: Too many errors")
                            .await;
                        break StopReason::ErrorBudgetExhausted;
                    }
                    if !self.lifecycle.recover().await {
                        warn!("Recovery could not confirm the bet history page");
                    }
                }
            }

            info!("Waiting {}s until next check...", interval.as_secs());
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Monitor stopped by user");
                    self.notifier.notify_status("Monitor stopped by user").await;
                    break StopReason::UserInterrupt;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        };

        if let Err(e) = self.store.persist(&self.settings.history_path) {
            error!("Failed to save bet history on shutdown: {e:#}");
        }
        self.lifecycle.stop().await;

        RunSummary {
            started_at,
            stopped_at: chrono::Utc::now().to_rfc3339(),
            iterations: iteration,
            total_bets: self.store.len(),
            stop_reason,
        }
    }

    /// One scan → filter → notify → persist cycle.
    async fn check_once(&mut self, iteration: u64) -> Result<()> {
        let browser = self
            .lifecycle
            .session()
            .context("no active browser session")?;

        if iteration % self.settings.refresh_every == 0 {
            info!("Refreshing bet history page...");
            browser.refresh().await?;
            tokio::time::sleep(self.settings.refresh_settle).await;
        }

        let found = page::scan_for_bets(browser, &self.extractor).await?;
        let new_bets = self.store.accept(found);
        if new_bets.is_empty() {
            info!("No new bets found");
            return Ok(());
        }

        info!("Found {} new bet(s)!", new_bets.len());
        for bet in &new_bets {
            self.notifier.notify_bet(bet).await;
        }
        if let Err(e) = self.store.persist(&self.settings.history_path) {
            error!("Failed to save bet history: {e:#}");
        }

        reporter::report_event(&MonitorEvent {
            timestamp: chrono::Utc::now().to_rfc3339(),
            iteration,
            new_bets,
            total_tracked: self.store.len(),
        });
        Ok(())
    }
}
