//! In-memory collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow, bail};

use crate::notifier::Messenger;
use crate::proxy::EchoProbe;
use crate::session::{Browser, BrowserLauncher, ElementId};

pub const LOGGED_IN_URL: &str = "https://www.bwin.com/en/sports/my-bets";

/// Scriptable page state behind a `FakeBrowser`.
#[derive(Default)]
pub struct FakePage {
    pub url: String,
    pub source: String,
    /// CSS selector -> element ids.
    pub selectors: HashMap<String, Vec<String>>,
    /// (parent id, CSS selector) -> child element ids.
    pub children: HashMap<(String, String), Vec<String>>,
    pub texts: HashMap<String, String>,
    /// (element id, attribute) -> value.
    pub attrs: HashMap<(String, String), String>,
    /// Where the browser lands after the element `submit` is clicked.
    pub url_after_submit: Option<String>,
    pub fail_queries: bool,
    /// One entry per bet scan, consumed in order; `true` fails that scan.
    pub scan_failures: VecDeque<bool>,
    pub fail_navigation: bool,
    /// URL prefixes whose navigation fails.
    pub blocked: Vec<String>,
    pub log: Vec<String>,
}

impl FakePage {
    pub fn register(&mut self, selector: &str, id: &str) {
        self.selectors
            .entry(selector.to_string())
            .or_default()
            .push(id.to_string());
    }
}

#[derive(Clone, Default)]
pub struct FakeBrowser {
    page: Arc<Mutex<FakePage>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Browser that egresses via `expected_ip`, accepts the login form and
    /// shows a recognisable bet-history page.
    pub fn cooperative(expected_ip: &str) -> Self {
        let browser = Self::new();
        browser.with(|page| {
            page.source = format!(r#"{{"ip":"{expected_ip}"}}"#);
            page.register(crate::auth::USERNAME_SELECTORS[0], "username");
            page.register(crate::auth::PASSWORD_SELECTOR, "password");
            page.register(crate::auth::SUBMIT_SELECTORS[0], "submit");
            page.register(crate::page::HISTORY_INDICATORS[0], "history-root");
            page.url_after_submit = Some(LOGGED_IN_URL.to_string());
        });
        browser
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakePage) -> R) -> R {
        let mut page = self.page.lock().unwrap();
        f(&mut page)
    }

    /// Add a bet container found by the first container selector.
    pub fn add_container(&self, id: &str, native_id: Option<&str>, text: &str) {
        self.with(|page| {
            page.register(crate::page::CONTAINER_SELECTORS[0], id);
            page.texts.insert(id.to_string(), text.to_string());
            if let Some(native) = native_id {
                page.attrs
                    .insert((id.to_string(), "id".to_string()), native.to_string());
            }
        });
    }

    /// Add a table row with the given cell texts.
    pub fn add_row(&self, id: &str, cells: &[&str]) {
        self.with(|page| {
            page.register(crate::page::ROW_SELECTOR, id);
            let mut cell_ids = Vec::new();
            for (i, cell) in cells.iter().enumerate() {
                let cell_id = format!("{id}-td{i}");
                page.texts.insert(cell_id.clone(), cell.to_string());
                cell_ids.push(cell_id);
            }
            page.children
                .insert((id.to_string(), "td".to_string()), cell_ids);
        });
    }

    pub fn log(&self) -> Vec<String> {
        self.with(|page| page.log.clone())
    }

    /// Number of log entries starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.with(|page| page.log.iter().filter(|l| l.starts_with(prefix)).count())
    }
}

impl Browser for FakeBrowser {
    async fn goto(&self, url: &str) -> Result<()> {
        // Navigation is a suspension point, as it is over the wire.
        tokio::task::yield_now().await;
        self.with(|page| {
            page.log.push(format!("goto:{url}"));
            if page.fail_navigation || page.blocked.iter().any(|b| url.starts_with(b.as_str())) {
                bail!("navigation failed");
            }
            page.url = url.to_string();
            Ok(())
        })
    }

    async fn current_url(&self) -> Result<String> {
        self.with(|page| Ok(page.url.clone()))
    }

    async fn refresh(&self) -> Result<()> {
        self.with(|page| {
            page.log.push("refresh".to_string());
            if page.fail_navigation {
                bail!("refresh failed");
            }
            Ok(())
        })
    }

    async fn page_source(&self) -> Result<String> {
        self.with(|page| Ok(page.source.clone()))
    }

    async fn find_all(&self, css: &str) -> Result<Vec<ElementId>> {
        self.with(|page| {
            page.log.push(format!("find:{css}"));
            if page.fail_queries {
                bail!("no such window");
            }
            if css == crate::page::CONTAINER_SELECTORS[0]
                && page.scan_failures.pop_front() == Some(true)
            {
                bail!("stale element reference");
            }
            Ok(page
                .selectors
                .get(css)
                .map(|ids| ids.iter().map(ElementId::new).collect())
                .unwrap_or_default())
        })
    }

    async fn find_within(&self, parent: &ElementId, css: &str) -> Result<Vec<ElementId>> {
        self.with(|page| {
            if page.fail_queries {
                bail!("no such window");
            }
            Ok(page
                .children
                .get(&(parent.0.clone(), css.to_string()))
                .map(|ids| ids.iter().map(ElementId::new).collect())
                .unwrap_or_default())
        })
    }

    async fn text(&self, element: &ElementId) -> Result<String> {
        self.with(|page| {
            page.texts
                .get(&element.0)
                .cloned()
                .ok_or_else(|| anyhow!("stale element reference: {}", element.0))
        })
    }

    async fn attribute(&self, element: &ElementId, name: &str) -> Result<Option<String>> {
        self.with(|page| Ok(page.attrs.get(&(element.0.clone(), name.to_string())).cloned()))
    }

    async fn clear(&self, element: &ElementId) -> Result<()> {
        self.with(|page| page.log.push(format!("clear:{}", element.0)));
        Ok(())
    }

    async fn send_keys(&self, element: &ElementId, text: &str) -> Result<()> {
        self.with(|page| page.log.push(format!("keys:{}:{text}", element.0)));
        Ok(())
    }

    async fn click(&self, element: &ElementId) -> Result<()> {
        self.with(|page| {
            page.log.push(format!("click:{}", element.0));
            if element.0 == "submit" {
                if let Some(next) = page.url_after_submit.clone() {
                    page.url = next;
                }
            }
        });
        Ok(())
    }

    async fn quit(&self) -> Result<()> {
        self.with(|page| page.log.push("quit".to_string()));
        Ok(())
    }
}

/// Hands out clones of one `FakeBrowser` and counts launches.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    pub browser: FakeBrowser,
    pub fail: bool,
    launches: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new(browser: FakeBrowser) -> Self {
        Self {
            browser,
            ..Self::default()
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl BrowserLauncher for FakeLauncher {
    type Browser = FakeBrowser;

    async fn launch(&self) -> Result<FakeBrowser> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("chromedriver not reachable");
        }
        Ok(self.browser.clone())
    }
}

/// Canned IP-echo responses keyed by URL; unknown URLs fail.
#[derive(Default)]
pub struct FakeProbe {
    responses: HashMap<String, (u16, String)>,
    calls: Mutex<Vec<String>>,
}

impl FakeProbe {
    pub fn respond(mut self, url: &str, status: u16, body: &str) -> Self {
        self.responses
            .insert(url.to_string(), (status, body.to_string()));
        self
    }

    pub fn fail(mut self, url: &str) -> Self {
        self.responses.remove(url);
        self
    }

    /// Probe answering every default service with `ip`.
    pub fn answering(ip: &str) -> Self {
        crate::proxy::default_services()
            .into_iter()
            .fold(Self::default(), |probe, service| {
                probe.respond(&service.url, 200, &format!(r#"{{"ip":"{ip}"}}"#))
            })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl EchoProbe for FakeProbe {
    async fn fetch(&self, url: &str) -> Result<(u16, String)> {
        self.calls.lock().unwrap().push(url.to_string());
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("connection refused"))
    }
}

/// Records every delivered message; optionally fails every delivery.
#[derive(Clone, Default)]
pub struct RecordingMessenger {
    sent: Arc<Mutex<Vec<String>>>,
    pub fail: bool,
}

impl RecordingMessenger {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of delivered messages containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.sent().iter().filter(|m| m.contains(needle)).count()
    }
}

impl Messenger for RecordingMessenger {
    async fn send(&self, text: &str) -> Result<()> {
        if self.fail {
            bail!("Bad Gateway");
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
