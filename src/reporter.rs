use crate::types::{MonitorEvent, RunSummary};

/// Emit a batch of newly accepted bets as a single JSON line to stdout.
pub fn report_event(event: &MonitorEvent) {
    if let Ok(json) = serde_json::to_string(event) {
        println!("{json}");
    }
}

/// Emit the run summary as pretty-printed JSON to stdout.
pub fn report_run_summary(summary: &RunSummary) {
    if let Ok(json) = serde_json::to_string_pretty(summary) {
        println!("{json}");
    }
}
