//! Startup state machine.
//!
//! `Idle → VerifyingProxy → LaunchingSession → Authenticating →
//! NavigatingToHistory → Monitoring`, with every stage gated on the previous
//! one. A failure before Monitoring is a kill switch: the partial session is
//! torn down and the lifecycle ends in `Stopped`.

use std::future::Future;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::auth::{self, AuthPolicy};
use crate::config::{Credentials, SettingsConfig, Timings};
use crate::notifier::{Messenger, Notifier};
use crate::page;
use crate::proxy::{self, EchoProbe, ProxyGate};
use crate::session::{Browser, BrowserLauncher};
use crate::types::MonitorState;

/// A startup check that failed. Never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KillSwitch {
    #[error("proxy verification failed (expected egress {expected})")]
    ProxyMismatch { expected: String },
    #[error("browser session could not be established: {0}")]
    SessionLaunch(String),
    #[error("login failed after {attempts} attempt(s)")]
    AuthenticationExhausted { attempts: u32 },
    #[error("cannot access bet history")]
    HistoryUnreachable,
}

/// How a startup raced against a shutdown request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Startup {
    Ready,
    Interrupted,
}

pub struct SessionLifecycle<B> {
    state: MonitorState,
    session: Option<B>,
    policy: AuthPolicy,
    timings: Timings,
}

impl<B: Browser> SessionLifecycle<B> {
    pub fn new(policy: AuthPolicy, timings: Timings) -> Self {
        Self {
            state: MonitorState::Idle,
            session: None,
            policy,
            timings,
        }
    }

    pub fn from_settings(settings: &SettingsConfig) -> Self {
        Self::new(AuthPolicy::from_settings(settings), settings.timings())
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// The live session, once launched and until stopped.
    pub fn session(&self) -> Option<&B> {
        self.session.as_ref()
    }

    fn transition(&mut self, next: MonitorState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!("Ignoring illegal transition {} -> {next}", self.state);
            return false;
        }
        info!("State: {} -> {next}", self.state);
        self.state = next;
        true
    }

    /// Run every startup stage in order. On failure a status notification is
    /// sent, any session is quit and the lifecycle is `Stopped`.
    pub async fn initialize<P, L, M>(
        &mut self,
        gate: &ProxyGate<P>,
        launcher: &L,
        credentials: &Credentials,
        notifier: &Notifier<M>,
    ) -> Result<(), KillSwitch>
    where
        P: EchoProbe,
        L: BrowserLauncher<Browser = B>,
        M: Messenger,
    {
        let result = self.startup(gate, launcher, credentials, notifier).await;
        if let Err(kill) = &result {
            error!("KILL SWITCH: {kill}");
            notifier
                .notify_status(&format!("⚠️ Monitor startup failed: {kill}"))
                .await;
            self.stop().await;
        }
        result
    }

    /// `initialize`, abandoned as soon as `shutdown` resolves. An abandoned
    /// startup quits whatever session it had launched and ends in `Stopped`.
    pub async fn initialize_until<P, L, M>(
        &mut self,
        gate: &ProxyGate<P>,
        launcher: &L,
        credentials: &Credentials,
        notifier: &Notifier<M>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<Startup, KillSwitch>
    where
        P: EchoProbe,
        L: BrowserLauncher<Browser = B>,
        M: Messenger,
    {
        let finished = tokio::select! {
            biased;
            _ = shutdown => None,
            result = self.initialize(gate, launcher, credentials, notifier) => Some(result),
        };
        match finished {
            Some(result) => result.map(|()| Startup::Ready),
            None => {
                warn!("Startup interrupted during {}", self.state);
                notifier.notify_status("Monitor stopped by user").await;
                self.stop().await;
                Ok(Startup::Interrupted)
            }
        }
    }

    async fn startup<P, L, M>(
        &mut self,
        gate: &ProxyGate<P>,
        launcher: &L,
        credentials: &Credentials,
        notifier: &Notifier<M>,
    ) -> Result<(), KillSwitch>
    where
        P: EchoProbe,
        L: BrowserLauncher<Browser = B>,
        M: Messenger,
    {
        info!("Step 1/4: Verifying proxy connection...");
        self.transition(MonitorState::VerifyingProxy);
        if !gate.verify().await {
            return Err(KillSwitch::ProxyMismatch {
                expected: gate.expected_ip().to_string(),
            });
        }

        info!("Step 2/4: Launching browser session...");
        self.transition(MonitorState::LaunchingSession);
        let browser = launcher
            .launch()
            .await
            .map_err(|e| KillSwitch::SessionLaunch(format!("{e:#}")))?;
        let browser = &*self.session.insert(browser);
        notifier.notify_status("🚀 Bet monitor starting up...").await;

        info!("Step 3/4: Confirming browser egress...");
        proxy::confirm_session_egress(browser, gate.expected_ip(), &self.timings)
            .await
            .map_err(|e| KillSwitch::SessionLaunch(format!("{e:#}")))?;

        info!("Step 4/4: Logging in...");
        self.transition(MonitorState::Authenticating);
        let Some(browser) = self.session.as_ref() else {
            return Err(KillSwitch::SessionLaunch("session lost".to_string()));
        };
        auth::authenticate(browser, credentials, &self.policy, &self.timings)
            .await
            .map_err(|_| KillSwitch::AuthenticationExhausted {
                attempts: self.policy.max_attempts,
            })?;

        self.transition(MonitorState::NavigatingToHistory);
        let Some(browser) = self.session.as_ref() else {
            return Err(KillSwitch::SessionLaunch("session lost".to_string()));
        };
        page::navigate_to_history(browser, &self.timings)
            .await
            .map_err(|_| KillSwitch::HistoryUnreachable)?;

        self.transition(MonitorState::Monitoring);
        notifier
            .notify_status(&format!(
                "✅ Bet monitor initialized successfully!\nProxy IP: {}\nMonitoring active bets...",
                gate.expected_ip()
            ))
            .await;
        info!("All components initialized successfully");
        Ok(())
    }

    /// Re-run history navigation once. Returns to Monitoring whatever the
    /// outcome; the return value says whether the page was confirmed.
    pub async fn recover(&mut self) -> bool {
        if !self.transition(MonitorState::Recovering) {
            return false;
        }
        info!("Attempting to recover...");
        let confirmed = match &self.session {
            Some(browser) => page::navigate_to_history(browser, &self.timings)
                .await
                .is_ok(),
            None => false,
        };
        self.transition(MonitorState::Monitoring);
        confirmed
    }

    /// Quit the session, if any, and move to Stopped. Safe to call twice.
    pub async fn stop(&mut self) {
        if let Some(browser) = self.session.take() {
            match browser.quit().await {
                Ok(()) => info!("Browser session closed"),
                Err(e) => warn!("Error closing browser session: {e:#}"),
            }
        }
        if self.state != MonitorState::Stopped {
            self.transition(MonitorState::Stopped);
        }
    }
}
