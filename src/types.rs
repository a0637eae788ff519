use serde::{Deserialize, Serialize};

/// Status assigned to every freshly detected bet.
pub const ACTIVE_STATUS: &str = "Active";

/// Format of `BetRecord::bet_time`.
pub const BET_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One detected wager, as scraped from the bet-history view.
///
/// Label fields hold either the matched page line or an explicit
/// `"Unknown <Field>"` sentinel; they are never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetRecord {
    pub betslip_id: String,
    pub teams: String,
    pub market: String,
    pub stake: String,
    pub odds: String,
    pub possible_winnings: String,
    pub bet_time: String,
    pub status: String,
}

impl BetRecord {
    /// Build a record stamped with the current local time and `Active` status.
    pub fn detected(
        betslip_id: String,
        teams: String,
        market: String,
        stake: String,
        odds: String,
        possible_winnings: String,
    ) -> Self {
        Self {
            betslip_id,
            teams,
            market,
            stake,
            odds,
            possible_winnings,
            bet_time: chrono::Local::now().format(BET_TIME_FORMAT).to_string(),
            status: ACTIVE_STATUS.to_string(),
        }
    }
}

/// Durable record of every bet accepted during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLedger {
    pub last_updated: String,
    pub total_bets: usize,
    pub bets: Vec<BetRecord>,
}

/// Lifecycle phase of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorState {
    Idle,
    VerifyingProxy,
    LaunchingSession,
    Authenticating,
    NavigatingToHistory,
    Monitoring,
    Recovering,
    Stopped,
}

impl MonitorState {
    /// Whether `next` is a legal successor of `self`.
    ///
    /// Startup stages only move forward one step at a time; Monitoring and
    /// Recovering alternate; anything may stop; Stopped is terminal.
    pub fn can_transition_to(self, next: MonitorState) -> bool {
        use MonitorState::*;
        match (self, next) {
            (Stopped, _) => false,
            (_, Stopped) => true,
            (Idle, VerifyingProxy)
            | (VerifyingProxy, LaunchingSession)
            | (LaunchingSession, Authenticating)
            | (Authenticating, NavigatingToHistory)
            | (NavigatingToHistory, Monitoring)
            | (Monitoring, Recovering)
            | (Recovering, Monitoring) => true,
            _ => false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MonitorState::Idle => "idle",
            MonitorState::VerifyingProxy => "verifying-proxy",
            MonitorState::LaunchingSession => "launching-session",
            MonitorState::Authenticating => "authenticating",
            MonitorState::NavigatingToHistory => "navigating-to-history",
            MonitorState::Monitoring => "monitoring",
            MonitorState::Recovering => "recovering",
            MonitorState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Why the monitoring loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    UserInterrupt,
    ErrorBudgetExhausted,
}

/// Emitted on stdout each time a scan accepts new bets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub timestamp: String,
    pub iteration: u64,
    pub new_bets: Vec<BetRecord>,
    pub total_tracked: usize,
}

/// Emitted once when the monitoring loop exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: String,
    pub stopped_at: String,
    pub iterations: u64,
    pub total_bets: usize,
    pub stop_reason: StopReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_startup_chain_is_legal() {
        use MonitorState::*;
        let chain = [
            Idle,
            VerifyingProxy,
            LaunchingSession,
            Authenticating,
            NavigatingToHistory,
            Monitoring,
        ];
        for pair in chain.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn no_skipping_or_going_back() {
        use MonitorState::*;
        assert!(!Idle.can_transition_to(LaunchingSession));
        assert!(!Authenticating.can_transition_to(VerifyingProxy));
        assert!(!NavigatingToHistory.can_transition_to(Recovering));
        assert!(!Monitoring.can_transition_to(Authenticating));
    }

    #[test]
    fn monitoring_and_recovering_alternate() {
        use MonitorState::*;
        assert!(Monitoring.can_transition_to(Recovering));
        assert!(Recovering.can_transition_to(Monitoring));
    }

    #[test]
    fn stopped_is_terminal_and_always_reachable() {
        use MonitorState::*;
        for s in [
            Idle,
            VerifyingProxy,
            LaunchingSession,
            Authenticating,
            NavigatingToHistory,
            Monitoring,
            Recovering,
        ] {
            assert!(s.can_transition_to(Stopped));
            assert!(!Stopped.can_transition_to(s));
        }
        assert!(!Stopped.can_transition_to(Stopped));
    }

    #[test]
    fn bet_record_serializes_with_persisted_field_names() {
        let bet = BetRecord {
            betslip_id: "b1".into(),
            teams: "A vs B".into(),
            market: "1X2 Home".into(),
            stake: "€5.00".into(),
            odds: "1.90".into(),
            possible_winnings: "Win €9.50".into(),
            bet_time: "2025-01-01 12:00:00".into(),
            status: ACTIVE_STATUS.into(),
        };
        let value = serde_json::to_value(&bet).unwrap();
        for key in [
            "betslip_id",
            "teams",
            "market",
            "stake",
            "odds",
            "possible_winnings",
            "bet_time",
            "status",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn detected_record_is_active() {
        let bet = BetRecord::detected(
            "id".into(),
            "t".into(),
            "m".into(),
            "s".into(),
            "o".into(),
            "p".into(),
        );
        assert_eq!(bet.status, ACTIVE_STATUS);
        assert_eq!(bet.bet_time.len(), "2025-01-01 12:00:00".len());
    }
}
