//! Browser collaborator seam.
//!
//! The monitor only needs a handful of DOM operations; anything that can
//! navigate, query CSS selectors and read element text can drive it.

use anyhow::Result;

/// Opaque reference to an element in the live page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// A live browsing session.
#[allow(async_fn_in_trait)]
pub trait Browser {
    async fn goto(&self, url: &str) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    async fn refresh(&self) -> Result<()>;
    async fn page_source(&self) -> Result<String>;
    /// All elements matching a CSS selector, in document order.
    async fn find_all(&self, css: &str) -> Result<Vec<ElementId>>;
    /// Descendants of `parent` matching a CSS selector.
    async fn find_within(&self, parent: &ElementId, css: &str) -> Result<Vec<ElementId>>;
    /// Rendered text of an element.
    async fn text(&self, element: &ElementId) -> Result<String>;
    async fn attribute(&self, element: &ElementId, name: &str) -> Result<Option<String>>;
    async fn clear(&self, element: &ElementId) -> Result<()>;
    async fn send_keys(&self, element: &ElementId, text: &str) -> Result<()>;
    async fn click(&self, element: &ElementId) -> Result<()>;
    /// End the session and release everything it holds.
    async fn quit(&self) -> Result<()>;
}

/// First element matching any of `selectors`, tried in order, together with
/// the selector that found it. Query errors on one selector fall through to
/// the next.
pub async fn first_match<'s, B: Browser>(
    browser: &B,
    selectors: &[&'s str],
) -> Option<(ElementId, &'s str)> {
    for &selector in selectors {
        match browser.find_all(selector).await {
            Ok(found) => {
                if let Some(element) = found.into_iter().next() {
                    return Some((element, selector));
                }
            }
            Err(e) => tracing::debug!("Selector {selector} failed: {e:#}"),
        }
    }
    None
}

/// Starts browser sessions.
#[allow(async_fn_in_trait)]
pub trait BrowserLauncher {
    type Browser: Browser;

    async fn launch(&self) -> Result<Self::Browser>;
}
