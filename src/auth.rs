use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{error, info, warn};

use crate::config::{Credentials, SettingsConfig, Timings};
use crate::session::{Browser, first_match};

/// Login page; redirects to the bet history once authenticated.
pub const LOGIN_URL: &str = "https://www.bwin.com/en/labelhost/login?rurlauth=1&rurl=https:%2F%2Fwww.bwin.com%2Fen%2Fsports%2Fmy-bets";

pub const USERNAME_SELECTORS: [&str; 4] = [
    r#"input[name="username"]"#,
    r#"input[type="email"]"#,
    "#userId",
    r#"input[formcontrolname="username"]"#,
];

pub const PASSWORD_SELECTOR: &str = r#"input[type="password"]"#;

pub const SUBMIT_SELECTORS: [&str; 3] = [
    r#"button[type="submit"]"#,
    "button.login-button",
    r#"input[type="submit"]"#,
];

/// UI affordances only shown to a signed-in user.
pub const USER_INDICATORS: [&str; 4] = [
    ".user-menu",
    ".account-balance",
    r#"[class*="balance"]"#,
    r#"[class*="user"]"#,
];

/// Retry policy for the authentication stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl AuthPolicy {
    pub fn from_settings(settings: &SettingsConfig) -> Self {
        Self {
            max_attempts: settings.login_attempts.max(1),
            backoff: Duration::from_secs(settings.login_backoff_secs),
        }
    }
}

/// How a successful login was recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Left the login page and a signed-in affordance was found.
    Confirmed(&'static str),
    /// Left the login page; no affordance found. Accepted leniently.
    UrlChanged,
}

/// Log in, retrying up to `policy.max_attempts` times with a fixed backoff.
pub async fn authenticate<B: Browser>(
    browser: &B,
    credentials: &Credentials,
    policy: &AuthPolicy,
    timings: &Timings,
) -> Result<AuthOutcome> {
    for attempt in 1..=policy.max_attempts {
        info!("Login attempt {attempt}/{}", policy.max_attempts);

        match attempt_login(browser, credentials, timings).await {
            Ok(Some(outcome)) => return Ok(outcome),
            Ok(None) => warn!("Login may have failed - still on login page"),
            Err(e) => warn!("Login error: {e:#}"),
        }

        if attempt < policy.max_attempts {
            warn!("Login failed, retrying in {:?}...", policy.backoff);
            tokio::time::sleep(policy.backoff).await;
        }
    }

    error!("All login attempts failed");
    bail!("authentication failed after {} attempt(s)", policy.max_attempts)
}

/// One pass through the login form. `Ok(None)` means the form was submitted
/// but the browser is still on the login page.
async fn attempt_login<B: Browser>(
    browser: &B,
    credentials: &Credentials,
    timings: &Timings,
) -> Result<Option<AuthOutcome>> {
    info!("Navigating to login page");
    browser.goto(LOGIN_URL).await?;
    tokio::time::sleep(timings.navigation_settle).await;

    let (username_field, selector) = first_match(browser, &USERNAME_SELECTORS)
        .await
        .context("username field not found")?;
    info!("Found username field: {selector}");
    browser.clear(&username_field).await?;
    browser.send_keys(&username_field, &credentials.username).await?;
    tokio::time::sleep(timings.input_pause).await;

    let password_field = browser
        .find_all(PASSWORD_SELECTOR)
        .await?
        .into_iter()
        .next()
        .context("password field not found")?;
    browser.clear(&password_field).await?;
    browser.send_keys(&password_field, &credentials.password).await?;
    tokio::time::sleep(timings.input_pause).await;

    match first_match(browser, &SUBMIT_SELECTORS).await {
        Some((button, _)) => browser.click(&button).await?,
        None => warn!("No submit control found"),
    }

    info!("Waiting for login to complete...");
    tokio::time::sleep(timings.login_settle).await;

    let current = browser.current_url().await?;
    info!("Current URL after login: {current}");
    if current.to_lowercase().contains("login") {
        return Ok(None);
    }

    for indicator in USER_INDICATORS {
        if !browser.find_all(indicator).await.unwrap_or_default().is_empty() {
            info!("Login successful - found {indicator}");
            return Ok(Some(AuthOutcome::Confirmed(indicator)));
        }
    }
    info!("Login appears successful (left login page)");
    Ok(Some(AuthOutcome::UrlChanged))
}
