use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::types::{BetRecord, HistoryLedger};

impl HistoryLedger {
    /// Read a previously persisted ledger.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let ledger: Self = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(ledger)
    }

    /// Write the ledger as pretty JSON, replacing `path` only once the new
    /// contents are fully on disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize bet history")?;
        let tmp = temp_path(path);
        {
            let mut file = File::create(&tmp)
                .with_context(|| format!("failed to create {}", tmp.display()))?;
            file.write_all(json.as_bytes())
                .with_context(|| format!("failed to write {}", tmp.display()))?;
            file.sync_all()
                .with_context(|| format!("failed to sync {}", tmp.display()))?;
        }
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Tracks which bets have been seen this run and keeps the append-only
/// history of every accepted one.
#[derive(Debug, Default)]
pub struct DedupStore {
    seen: HashSet<String>,
    ledger: HistoryLedger,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a persisted ledger so its bets are not reported again.
    pub fn resume(ledger: HistoryLedger) -> Self {
        let seen = ledger.bets.iter().map(|b| b.betslip_id.clone()).collect();
        Self { seen, ledger }
    }

    /// Keep only records whose identifier has not been seen before, in input
    /// order. Accepted records are appended to the ledger.
    pub fn accept(&mut self, records: Vec<BetRecord>) -> Vec<BetRecord> {
        let mut accepted = Vec::new();
        for record in records {
            if self.seen.insert(record.betslip_id.clone()) {
                info!("New bet detected: {}", record.betslip_id);
                self.ledger.bets.push(record.clone());
                accepted.push(record);
            }
        }
        if !accepted.is_empty() {
            self.ledger.total_bets = self.ledger.bets.len();
            self.ledger.last_updated = chrono::Utc::now().to_rfc3339();
        }
        accepted
    }

    pub fn contains(&self, betslip_id: &str) -> bool {
        self.seen.contains(betslip_id)
    }

    /// Number of distinct bets tracked.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    /// Persist the ledger atomically, stamping the write time.
    pub fn persist(&mut self, path: &Path) -> Result<()> {
        self.ledger.total_bets = self.ledger.bets.len();
        self.ledger.last_updated = chrono::Utc::now().to_rfc3339();
        self.ledger.save(path)?;
        info!("Saved bet history to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bet(id: &str) -> BetRecord {
        BetRecord {
            betslip_id: id.to_string(),
            teams: format!("{id} Home vs {id} Away"),
            market: "1X2 Home".to_string(),
            stake: "€10.00".to_string(),
            odds: "1.95".to_string(),
            possible_winnings: "Win €19.50".to_string(),
            bet_time: "2025-03-01 18:30:00".to_string(),
            status: "Active".to_string(),
        }
    }

    #[test]
    fn accepts_only_unseen() {
        let mut store = DedupStore::new();
        let first = store.accept(vec![bet("a"), bet("b")]);
        assert_eq!(first.len(), 2);
        let second = store.accept(vec![bet("b"), bet("c")]);
        assert_eq!(second, vec![bet("c")]);
        assert_eq!(store.len(), 3);
        assert_eq!(store.ledger().total_bets, 3);
    }

    #[test]
    fn repeated_identifier_is_idempotent() {
        let mut store = DedupStore::new();
        store.accept(vec![bet("a")]);
        for _ in 0..3 {
            assert!(store.accept(vec![bet("a")]).is_empty());
        }
        assert_eq!(store.ledger().bets.len(), 1);
    }

    #[test]
    fn duplicates_within_one_batch_collapse() {
        let mut store = DedupStore::new();
        let accepted = store.accept(vec![bet("a"), bet("a"), bet("b")]);
        assert_eq!(accepted.len(), 2);
        assert_eq!(store.ledger().bets.len(), 2);
    }

    #[test]
    fn ledger_preserves_acceptance_order() {
        let mut store = DedupStore::new();
        store.accept(vec![bet("c"), bet("a")]);
        store.accept(vec![bet("b")]);
        let ids: Vec<_> = store.ledger().bets.iter().map(|b| b.betslip_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn persist_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bet_history.json");
        let mut store = DedupStore::new();
        store.accept((0..25).map(|i| bet(&format!("bet-{i}"))).collect());
        store.persist(&path).unwrap();

        let loaded = HistoryLedger::load(&path).unwrap();
        assert_eq!(loaded.total_bets, 25);
        assert_eq!(loaded.bets, store.ledger().bets);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn persisted_document_has_expected_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.json");
        let mut store = DedupStore::new();
        store.accept(vec![bet("a")]);
        store.persist(&path).unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(doc["last_updated"].is_string());
        assert_eq!(doc["total_bets"], 1);
        assert_eq!(doc["bets"][0]["betslip_id"], "a");
        assert_eq!(doc["bets"][0]["possible_winnings"], "Win €19.50");
    }

    #[test]
    fn stale_temp_file_does_not_affect_good_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.json");
        let mut store = DedupStore::new();
        store.accept(vec![bet("a")]);
        store.persist(&path).unwrap();

        // A crash mid-write leaves only a partial temp file behind.
        fs::write(temp_path(&path), "{\"last_updated\": \"2025-").unwrap();
        assert_eq!(HistoryLedger::load(&path).unwrap().bets.len(), 1);

        store.accept(vec![bet("b")]);
        store.persist(&path).unwrap();
        assert_eq!(HistoryLedger::load(&path).unwrap().bets.len(), 2);
    }

    #[test]
    fn persist_into_missing_directory_fails_without_clobbering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("h.json");
        let mut store = DedupStore::new();
        store.accept(vec![bet("a")]);
        assert!(store.persist(&path).is_err());
    }

    #[test]
    fn resume_seeds_seen_set() {
        let mut original = DedupStore::new();
        original.accept(vec![bet("a"), bet("b")]);
        let mut resumed = DedupStore::resume(original.ledger().clone());
        assert!(resumed.contains("a"));
        assert!(resumed.accept(vec![bet("a"), bet("b")]).is_empty());
        assert_eq!(resumed.accept(vec![bet("c")]).len(), 1);
        assert_eq!(resumed.ledger().total_bets, 3);
    }
}
