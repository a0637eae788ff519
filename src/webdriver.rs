//! Minimal W3C WebDriver client for a locally running chromedriver.
//!
//! Each launch gets a throwaway profile directory holding the Chrome user
//! data and an unpacked extension that routes traffic through the
//! authenticated proxy. Quitting the session deletes that directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reqwest::{Client, Method};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ProxyConfig, SettingsConfig};
use crate::session::{Browser, BrowserLauncher, ElementId};

/// Key under which W3C element references are returned.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52f-4a5ef9d3a9a5";

pub const PAGE_LOAD_TIMEOUT_MS: u64 = 60_000;
pub const IMPLICIT_WAIT_MS: u64 = 10_000;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum WebDriverError {
    #[error("webdriver transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webdriver returned {status} ({error}): {message}")]
    Command {
        status: u16,
        error: String,
        message: String,
    },
    #[error("unexpected webdriver response: {0}")]
    Protocol(String),
    #[error("invalid webdriver url: {0}")]
    Url(#[from] url::ParseError),
}

/// Decode a WebDriver response body into its `value` member.
pub fn parse_response(status: u16, body: &str) -> Result<Value, WebDriverError> {
    let parsed: Value = serde_json::from_str(body)
        .map_err(|e| WebDriverError::Protocol(format!("invalid JSON ({e}): {body}")))?;
    let value = parsed.get("value").cloned().unwrap_or(Value::Null);
    if (200..300).contains(&status) {
        return Ok(value);
    }
    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Err(WebDriverError::Command {
        status,
        error: field("error"),
        message: field("message"),
    })
}

/// Element references from a `find elements` response.
pub fn element_ids(value: &Value) -> Result<Vec<ElementId>, WebDriverError> {
    let items = value
        .as_array()
        .ok_or_else(|| WebDriverError::Protocol(format!("expected element array, got {value}")))?;
    items
        .iter()
        .map(|item| {
            item.get(ELEMENT_KEY)
                .and_then(Value::as_str)
                .map(ElementId::new)
                .ok_or_else(|| {
                    WebDriverError::Protocol(format!("not an element reference: {item}"))
                })
        })
        .collect()
}

/// Base URL with a trailing slash so `join` appends instead of replacing.
pub fn normalize_endpoint(raw: &str) -> Result<Url, WebDriverError> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Write an unpacked Chrome extension that pins the proxy and answers its
/// authentication challenge.
pub fn write_proxy_extension(dir: &Path, proxy: &ProxyConfig) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let manifest = json!({
        "version": "1.0.0",
        "manifest_version": 2,
        "name": "Proxy Auth Extension",
        "permissions": [
            "proxy",
            "tabs",
            "unlimitedStorage",
            "storage",
            "<all_urls>",
            "webRequest",
            "webRequestBlocking",
            "webRequestAuthProvider"
        ],
        "background": {"scripts": ["background.js"], "persistent": true},
        "minimum_chrome_version": "22.0.0"
    });
    fs::write(dir.join("manifest.json"), serde_json::to_string_pretty(&manifest)?)
        .context("failed to write extension manifest")?;
    fs::write(dir.join("background.js"), proxy_script(proxy)?)
        .context("failed to write extension script")?;
    Ok(())
}

fn proxy_script(proxy: &ProxyConfig) -> Result<String> {
    let host = serde_json::to_string(&proxy.host)?;
    let username = serde_json::to_string(&proxy.username)?;
    let password = serde_json::to_string(&proxy.password)?;
    Ok(format!(
        r#"var config = {{
    mode: "fixed_servers",
    rules: {{
        singleProxy: {{ scheme: "http", host: {host}, port: {port} }},
        bypassList: ["localhost", "127.0.0.1"]
    }}
}};

chrome.proxy.settings.set({{ value: config, scope: "regular" }}, function() {{}});

chrome.webRequest.onAuthRequired.addListener(
    function(details) {{
        return {{ authCredentials: {{ username: {username}, password: {password} }} }};
    }},
    {{ urls: ["<all_urls>"] }},
    ["blocking"]
);
"#,
        port = proxy.port,
    ))
}

/// Launches Chrome sessions through chromedriver.
pub struct WebDriverLauncher {
    client: Client,
    endpoint: Url,
    chrome_binary: Option<String>,
    headless: bool,
    proxy: ProxyConfig,
}

impl WebDriverLauncher {
    pub fn new(settings: &SettingsConfig, proxy: &ProxyConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to build WebDriver HTTP client")?;
        Ok(Self {
            client,
            endpoint: normalize_endpoint(&settings.webdriver_url)?,
            chrome_binary: settings.chrome_binary.clone(),
            headless: settings.headless,
            proxy: proxy.clone(),
        })
    }

    /// `new session` capabilities for a profile rooted at `profile`.
    pub fn capabilities(&self, profile: &Path) -> Value {
        let extension = profile.join("proxy-ext");
        let mut args = vec![
            format!("--user-data-dir={}", profile.join("user-data").display()),
            format!("--load-extension={}", extension.display()),
            format!("--disable-extensions-except={}", extension.display()),
            format!("--proxy-server=http://{}", self.proxy.endpoint()),
            format!("--user-agent={USER_AGENT}"),
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            "--disable-sync".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
            args.push("--window-size=1920,1080".to_string());
        } else {
            args.push("--start-maximized".to_string());
        }
        if !self.proxy.verify_tls {
            args.push("--ignore-certificate-errors".to_string());
        }

        let mut chrome = json!({
            "args": args,
            "excludeSwitches": ["enable-automation"],
        });
        if let Some(binary) = &self.chrome_binary {
            chrome["binary"] = json!(binary);
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": chrome,
                    "timeouts": {
                        "pageLoad": PAGE_LOAD_TIMEOUT_MS,
                        "implicit": IMPLICIT_WAIT_MS,
                    }
                }
            }
        })
    }
}

impl BrowserLauncher for WebDriverLauncher {
    type Browser = WebDriverSession;

    async fn launch(&self) -> Result<WebDriverSession> {
        let url = self.endpoint.join("session")?;
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let profile = std::env::temp_dir().join(format!("chrome-session-{}", &suffix[..8]));
        prepare_profile(&profile, &self.proxy)?;
        info!("Created browser profile at {}", profile.display());

        let capabilities = self.capabilities(&profile);
        let response = send(&self.client, Method::POST, url, Some(capabilities)).await;
        let value = match response {
            Ok(value) => value,
            Err(e) => {
                remove_profile(&profile);
                return Err(e).context("failed to start Chrome session");
            }
        };
        let Some(session_id) = value.get("sessionId").and_then(Value::as_str) else {
            remove_profile(&profile);
            return Err(WebDriverError::Protocol(format!("no sessionId in {value}")).into());
        };
        info!("Chrome session {session_id} started");

        Ok(WebDriverSession {
            client: self.client.clone(),
            base: self.endpoint.join(&format!("session/{session_id}/"))?,
            profile,
        })
    }
}

async fn send(
    client: &Client,
    method: Method,
    url: Url,
    body: Option<Value>,
) -> Result<Value, WebDriverError> {
    debug!("{method} {url}");
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let resp = request.send().await?;
    let status = resp.status().as_u16();
    let text = resp.text().await?;
    parse_response(status, &text)
}

/// Write the proxy extension into a fresh profile. A half-written profile is
/// removed before the error is returned.
fn prepare_profile(profile: &Path, proxy: &ProxyConfig) -> Result<()> {
    if let Err(e) = write_proxy_extension(&profile.join("proxy-ext"), proxy) {
        remove_profile(profile);
        return Err(e);
    }
    Ok(())
}

fn remove_profile(profile: &Path) {
    if let Err(e) = fs::remove_dir_all(profile) {
        warn!("Could not remove browser profile {}: {e}", profile.display());
    }
}

/// A live chromedriver session.
pub struct WebDriverSession {
    client: Client,
    /// `<endpoint>/session/<id>/`
    base: Url,
    profile: PathBuf,
}

impl WebDriverSession {
    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = self.base.join(path)?;
        Ok(send(&self.client, method, url, body).await?)
    }

    async fn get_string(&self, path: &str) -> Result<String> {
        let value = self.call(Method::GET, path, None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WebDriverError::Protocol(format!("expected string, got {value}")).into())
    }

    fn element_path(element: &ElementId, suffix: &str) -> String {
        format!("element/{}/{suffix}", element.0)
    }
}

impl Browser for WebDriverSession {
    async fn goto(&self, url: &str) -> Result<()> {
        self.call(Method::POST, "url", Some(json!({ "url": url }))).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        self.get_string("url").await
    }

    async fn refresh(&self) -> Result<()> {
        self.call(Method::POST, "refresh", Some(json!({}))).await?;
        Ok(())
    }

    async fn page_source(&self) -> Result<String> {
        self.get_string("source").await
    }

    async fn find_all(&self, css: &str) -> Result<Vec<ElementId>> {
        let body = json!({ "using": "css selector", "value": css });
        let value = self.call(Method::POST, "elements", Some(body)).await?;
        Ok(element_ids(&value)?)
    }

    async fn find_within(&self, parent: &ElementId, css: &str) -> Result<Vec<ElementId>> {
        let body = json!({ "using": "css selector", "value": css });
        let value = self
            .call(Method::POST, &Self::element_path(parent, "elements"), Some(body))
            .await?;
        Ok(element_ids(&value)?)
    }

    async fn text(&self, element: &ElementId) -> Result<String> {
        self.get_string(&Self::element_path(element, "text")).await
    }

    async fn attribute(&self, element: &ElementId, name: &str) -> Result<Option<String>> {
        let value = self
            .call(Method::GET, &Self::element_path(element, &format!("attribute/{name}")), None)
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn clear(&self, element: &ElementId) -> Result<()> {
        self.call(Method::POST, &Self::element_path(element, "clear"), Some(json!({})))
            .await?;
        Ok(())
    }

    async fn send_keys(&self, element: &ElementId, text: &str) -> Result<()> {
        self.call(
            Method::POST,
            &Self::element_path(element, "value"),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    async fn click(&self, element: &ElementId) -> Result<()> {
        self.call(Method::POST, &Self::element_path(element, "click"), Some(json!({})))
            .await?;
        Ok(())
    }

    async fn quit(&self) -> Result<()> {
        // The session resource itself; the trailing slash would address a child.
        let mut url = self.base.clone();
        let path = url.path().trim_end_matches('/').to_string();
        url.set_path(&path);
        let result = send(&self.client, Method::DELETE, url, None).await;
        remove_profile(&self.profile);
        result.context("failed to end Chrome session")?;
        Ok(())
    }
}
