use std::collections::HashSet;

use anyhow::{Result, bail};
use tracing::{debug, error, info, warn};

use crate::config::Timings;
use crate::extractor::{BetExtractor, ContainerFragment, PageSnapshot};
use crate::session::Browser;
use crate::types::BetRecord;

/// Bet-history entry points, most specific first.
pub const HISTORY_URLS: [&str; 3] = [
    "https://www.bwin.com/en/sports/my-bets/open",
    "https://www.bwin.com/en/sports/my-bets",
    "https://www.bwin.com/en/mybets",
];

/// Markers that identify a bet-related page.
pub const HISTORY_INDICATORS: [&str; 5] = [
    r#"[class*="bet"]"#,
    r#"[class*="slip"]"#,
    r#"[class*="ticket"]"#,
    ".my-bets",
    "#betHistory",
];

/// Candidate bet containers.
pub const CONTAINER_SELECTORS: [&str; 6] = [
    r#"[class*="betslip"]"#,
    r#"[class*="bet-slip"]"#,
    r#"[class*="ticket"]"#,
    r#"[data-testid*="bet"]"#,
    ".card",
    r#"[class*="coupon"]"#,
];

/// Table rows used when no container yields a bet.
pub const ROW_SELECTOR: &str = r#"tr[class*="bet"], tbody tr"#;

/// Navigate to the first history entry point that confirms as a bet page.
/// Returns the URL that worked.
pub async fn navigate_to_history<B: Browser>(browser: &B, timings: &Timings) -> Result<String> {
    for url in HISTORY_URLS {
        info!("Trying URL: {url}");
        if let Err(e) = browser.goto(url).await {
            warn!("Navigation to {url} failed: {e:#}");
            continue;
        }
        tokio::time::sleep(timings.navigation_settle).await;

        if confirm_history_page(browser).await {
            info!("Successfully navigated to bet history");
            return Ok(url.to_string());
        }
    }
    error!("Could not navigate to bet history");
    bail!("no bet history entry point could be confirmed")
}

/// Whether the current page looks like a bet page: any known marker element,
/// or failing that a `bet` substring in the URL.
pub async fn confirm_history_page<B: Browser>(browser: &B) -> bool {
    for indicator in HISTORY_INDICATORS {
        match browser.find_all(indicator).await {
            Ok(found) if !found.is_empty() => {
                info!("Found bet indicator: {indicator}");
                return true;
            }
            Ok(_) => {}
            Err(e) => debug!("Indicator {indicator} query failed: {e:#}"),
        }
    }
    match browser.current_url().await {
        Ok(url) => url.to_lowercase().contains("bet"),
        Err(_) => false,
    }
}

/// Collect every unique candidate container with its rendered text.
///
/// A failing selector query is an error; an element that can no longer be
/// read is skipped.
pub async fn capture_containers<B: Browser>(browser: &B) -> Result<Vec<ContainerFragment>> {
    let mut seen = HashSet::new();
    let mut elements = Vec::new();
    for selector in CONTAINER_SELECTORS {
        let found = browser.find_all(selector).await?;
        if !found.is_empty() {
            debug!("Found {} elements with selector: {selector}", found.len());
        }
        for element in found {
            if seen.insert(element.clone()) {
                elements.push(element);
            }
        }
    }

    let mut fragments = Vec::with_capacity(elements.len());
    for (index, element) in elements.iter().enumerate() {
        let text = match browser.text(element).await {
            Ok(text) => text,
            Err(e) => {
                debug!("Could not read element {index}: {e:#}");
                continue;
            }
        };
        let native_id = browser
            .attribute(element, "id")
            .await
            .ok()
            .flatten()
            .filter(|id| !id.trim().is_empty());
        fragments.push(ContainerFragment { native_id, text });
    }
    Ok(fragments)
}

/// Collect the cell texts of every candidate table row.
pub async fn capture_rows<B: Browser>(browser: &B) -> Result<Vec<Vec<String>>> {
    let rows = browser.find_all(ROW_SELECTOR).await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let cells = match browser.find_within(row, "td").await {
            Ok(cells) => cells,
            Err(e) => {
                debug!("Could not read row cells: {e:#}");
                continue;
            }
        };
        let mut texts = Vec::with_capacity(cells.len());
        for cell in &cells {
            texts.push(browser.text(cell).await.unwrap_or_default().trim().to_string());
        }
        out.push(texts);
    }
    Ok(out)
}

/// Scan the current page for bets. Table rows are only read when no
/// container produced a record.
pub async fn scan_for_bets<B: Browser>(
    browser: &B,
    extractor: &BetExtractor,
) -> Result<Vec<BetRecord>> {
    info!("Scanning for active bets...");
    let mut snapshot = PageSnapshot {
        containers: capture_containers(browser).await?,
        rows: Vec::new(),
    };
    let mut bets = extractor.extract(&snapshot);
    if bets.is_empty() {
        debug!("Trying table-based bet detection...");
        snapshot.rows = capture_rows(browser).await?;
        bets = extractor.extract(&snapshot);
    }
    info!("Found {} total bets", bets.len());
    Ok(bets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBrowser;

    const SLIP: &str = "Arsenal vs Chelsea\n1X2 Home\n€25.00 stake\n2.40\nPossible win €60.00";

    #[tokio::test]
    async fn first_confirmed_entry_point_wins() {
        let browser = FakeBrowser::new();
        browser.with(|page| page.register(".my-bets", "root"));
        let url = navigate_to_history(&browser, &Timings::immediate()).await.unwrap();
        assert_eq!(url, HISTORY_URLS[0]);
        assert_eq!(browser.count("goto:"), 1);
    }

    #[tokio::test]
    async fn url_substring_confirms_without_markers() {
        let browser = FakeBrowser::new();
        assert!(navigate_to_history(&browser, &Timings::immediate()).await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_history_fails_after_all_entry_points() {
        let browser = FakeBrowser::new();
        browser.with(|page| page.fail_navigation = true);
        assert!(navigate_to_history(&browser, &Timings::immediate()).await.is_err());
        assert_eq!(browser.count("goto:"), HISTORY_URLS.len());
    }

    #[tokio::test]
    async fn unrelated_page_is_not_confirmed() {
        let browser = FakeBrowser::new();
        browser.with(|page| page.url = "https://www.bwin.com/en/sports".to_string());
        assert!(!confirm_history_page(&browser).await);
    }

    #[tokio::test]
    async fn containers_are_deduplicated_across_selectors() {
        let browser = FakeBrowser::new();
        browser.add_container("el-1", Some("slip-1"), SLIP);
        browser.with(|page| page.register(".card", "el-1"));
        let fragments = capture_containers(&browser).await.unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].native_id.as_deref(), Some("slip-1"));
    }

    #[tokio::test]
    async fn unreadable_container_is_skipped() {
        let browser = FakeBrowser::new();
        browser.add_container("el-1", None, SLIP);
        browser.with(|page| page.register(".card", "ghost"));
        let fragments = capture_containers(&browser).await.unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].native_id, None);
    }

    #[tokio::test]
    async fn query_failure_propagates() {
        let browser = FakeBrowser::new();
        browser.with(|page| page.fail_queries = true);
        assert!(scan_for_bets(&browser, &BetExtractor::new()).await.is_err());
    }

    #[tokio::test]
    async fn rows_only_read_when_containers_yield_nothing() {
        let browser = FakeBrowser::new();
        browser.add_container("el-1", Some("slip-1"), SLIP);
        browser.add_row("row-1", &["A vs B", "Over 2.5", "€10.00"]);
        let bets = scan_for_bets(&browser, &BetExtractor::new()).await.unwrap();
        assert_eq!(bets.len(), 1);
        assert_eq!(bets[0].betslip_id, "slip-1");
        assert_eq!(browser.count(&format!("find:{ROW_SELECTOR}")), 0);
    }

    #[tokio::test]
    async fn falls_back_to_table_rows() {
        let browser = FakeBrowser::new();
        browser.add_row("row-1", &["A vs B", "Over 2.5", "€10.00", "1.85", "€18.50"]);
        let bets = scan_for_bets(&browser, &BetExtractor::new()).await.unwrap();
        assert_eq!(bets.len(), 1);
        assert_eq!(bets[0].teams, "A vs B");
        assert_eq!(bets[0].possible_winnings, "€18.50");
    }
}
