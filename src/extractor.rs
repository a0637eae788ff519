use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::types::BetRecord;

/// Container text shorter than this is not a bet.
pub const MIN_TEXT_LEN: usize = 10;

/// Table rows with fewer cells are not bets.
pub const MIN_ROW_CELLS: usize = 3;

pub const TEAMS_SENTINEL: &str = "Unknown Teams";
pub const MARKET_SENTINEL: &str = "Unknown Market";
pub const STAKE_SENTINEL: &str = "Unknown Stake";
pub const ODDS_SENTINEL: &str = "Unknown Odds";
pub const PAYOUT_SENTINEL: &str = "Unknown Winnings";

/// Placeholder for a missing table cell.
pub const CELL_SENTINEL: &str = "Unknown";

const TEAM_SEPARATORS: [&str; 3] = [" vs ", " v ", " - "];
const MARKET_KEYWORDS: [&str; 6] = ["1X2", "Over", "Under", "BTTS", "Handicap", "Draw"];
const CURRENCY_SYMBOLS: [char; 3] = ['€', '$', '£'];
const PAYOUT_KEYWORDS: [&str; 3] = ["win", "return", "payout"];

static ODDS_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d{2}$").expect("valid odds regex"));
static ODDS_ANYWHERE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\d{2}").expect("valid odds regex"));

/// Rendered text of one candidate bet container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFragment {
    /// The element's own `id` attribute, when it has a non-empty one.
    pub native_id: Option<String>,
    pub text: String,
}

/// Everything the extractor needs from the page, already read out of the DOM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSnapshot {
    pub containers: Vec<ContainerFragment>,
    /// Cell texts per table row.
    pub rows: Vec<Vec<String>>,
}

/// A field matcher: the first qualifying line, if any.
pub type Matcher = fn(&[&str]) -> Option<String>;

/// Ordered matchers for one field, with the sentinel used when none match.
#[derive(Clone)]
pub struct FieldRule {
    pub sentinel: &'static str,
    pub matchers: Vec<Matcher>,
}

impl FieldRule {
    pub fn new(sentinel: &'static str, matchers: Vec<Matcher>) -> Self {
        Self { sentinel, matchers }
    }

    pub fn resolve(&self, lines: &[&str]) -> String {
        self.matchers
            .iter()
            .find_map(|m| m(lines))
            .unwrap_or_else(|| self.sentinel.to_string())
    }
}

// ── Matchers ───────────────────────────────────────────────────────

/// Line naming both sides, e.g. `Arsenal vs Chelsea`.
pub fn teams_by_separator(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .find(|l| TEAM_SEPARATORS.iter().any(|sep| l.contains(sep)))
        .map(|l| l.to_string())
}

pub fn first_line(lines: &[&str]) -> Option<String> {
    lines.first().map(|l| l.to_string())
}

pub fn market_by_keyword(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .find(|l| MARKET_KEYWORDS.iter().any(|kw| l.contains(kw)))
        .map(|l| l.to_string())
}

pub fn stake_by_currency(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .find(|l| l.contains(CURRENCY_SYMBOLS))
        .map(|l| l.to_string())
}

/// Line consisting of nothing but decimal odds, e.g. `2.40`.
pub fn odds_exact(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .find(|l| ODDS_TOKEN.is_match(l))
        .map(|l| l.to_string())
}

/// Line containing decimal odds that is not a money amount.
pub fn odds_embedded(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .find(|l| ODDS_ANYWHERE.is_match(l) && !l.contains(CURRENCY_SYMBOLS))
        .map(|l| l.to_string())
}

pub fn payout_by_keyword(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .find(|l| {
            let lower = l.to_lowercase();
            PAYOUT_KEYWORDS.iter().any(|kw| lower.contains(kw))
        })
        .map(|l| l.to_string())
}

// ── Identifiers ────────────────────────────────────────────────────

fn normalize(field: &str) -> String {
    field
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Identifier derived from the bet's content, stable across scans.
///
/// `None` when every keyed field is a placeholder, since such a key would
/// collide for unrelated bets.
pub fn content_key(prefix: &str, keyed: [&str; 4], placeholders: &[&str]) -> Option<String> {
    if keyed.iter().all(|f| placeholders.contains(f)) {
        return None;
    }
    let mut hasher = Sha256::new();
    for (i, field) in keyed.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(normalize(field).as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    Some(format!("{prefix}_{}", &digest[..16]))
}

fn positional_id(prefix: &str, index: usize) -> String {
    format!("{prefix}_{}_{index}", chrono::Utc::now().timestamp())
}

// ── Extraction ─────────────────────────────────────────────────────

/// Turns page snapshots into bet records using ordered heuristic rules.
#[derive(Clone)]
pub struct BetExtractor {
    pub teams: FieldRule,
    pub market: FieldRule,
    pub stake: FieldRule,
    pub odds: FieldRule,
    pub payout: FieldRule,
}

impl Default for BetExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl BetExtractor {
    pub fn new() -> Self {
        Self {
            teams: FieldRule::new(
                TEAMS_SENTINEL,
                vec![teams_by_separator as Matcher, first_line as Matcher],
            ),
            market: FieldRule::new(MARKET_SENTINEL, vec![market_by_keyword as Matcher]),
            stake: FieldRule::new(STAKE_SENTINEL, vec![stake_by_currency as Matcher]),
            odds: FieldRule::new(
                ODDS_SENTINEL,
                vec![odds_exact as Matcher, odds_embedded as Matcher],
            ),
            payout: FieldRule::new(PAYOUT_SENTINEL, vec![payout_by_keyword as Matcher]),
        }
    }

    /// Containers first; table rows only when no container produced a bet.
    pub fn extract(&self, snapshot: &PageSnapshot) -> Vec<BetRecord> {
        let from_containers: Vec<BetRecord> = snapshot
            .containers
            .iter()
            .enumerate()
            .filter_map(|(i, c)| self.extract_container(c, i))
            .collect();
        if !from_containers.is_empty() {
            return from_containers;
        }
        snapshot
            .rows
            .iter()
            .enumerate()
            .filter_map(|(i, cells)| self.extract_row(cells, i))
            .collect()
    }

    pub fn extract_container(
        &self,
        fragment: &ContainerFragment,
        index: usize,
    ) -> Option<BetRecord> {
        let text = fragment.text.trim();
        if text.chars().count() < MIN_TEXT_LEN {
            debug!("Skipping container {index}: text too short");
            return None;
        }
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let teams = self.teams.resolve(&lines);
        let market = self.market.resolve(&lines);
        let stake = self.stake.resolve(&lines);
        let odds = self.odds.resolve(&lines);
        let payout = self.payout.resolve(&lines);

        let id = match &fragment.native_id {
            Some(id) => id.clone(),
            None => content_key(
                "bet",
                [&teams, &market, &stake, &odds],
                &[TEAMS_SENTINEL, MARKET_SENTINEL, STAKE_SENTINEL, ODDS_SENTINEL],
            )
            .unwrap_or_else(|| positional_id("bet", index)),
        };

        Some(BetRecord::detected(id, teams, market, stake, odds, payout))
    }

    /// Map the first five cells positionally to teams, market, stake, odds
    /// and payout.
    pub fn extract_row(&self, cells: &[String], index: usize) -> Option<BetRecord> {
        if cells.len() < MIN_ROW_CELLS {
            return None;
        }
        let cell = |i: usize| {
            cells
                .get(i)
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .unwrap_or(CELL_SENTINEL)
                .to_string()
        };
        let (teams, market, stake, odds, payout) = (cell(0), cell(1), cell(2), cell(3), cell(4));

        let id = content_key("row", [&teams, &market, &stake, &odds], &[CELL_SENTINEL])
            .unwrap_or_else(|| positional_id("row_bet", index));

        Some(BetRecord::detected(id, teams, market, stake, odds, payout))
    }
}
