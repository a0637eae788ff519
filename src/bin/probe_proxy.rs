//! Proxy probe: runs every IP-echo service through the configured proxy and
//! prints what each one reports, then the overall kill-switch verdict.
//!
//! Reads the same PROXY_* / EXPECTED_PROXY_IP keys as the monitor.

use std::process::ExitCode;

use anyhow::{Context, Result};
use betslip_monitor::config::{self, ProxyConfig};
use betslip_monitor::proxy::{ProbeOutcome, ProxyGate, default_services};

fn var(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} is not set"))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    if let Some(file) = config::load_env_file()? {
        println!("Loaded environment from {file}");
    }
    let port: u32 = var("PROXY_PORT")?.trim().parse().context("PROXY_PORT is not a number")?;
    let proxy = ProxyConfig::new(
        var("PROXY_HOST")?,
        port,
        var("PROXY_USERNAME")?,
        var("PROXY_PASSWORD")?,
        var("EXPECTED_PROXY_IP")?.trim(),
    )?;

    println!("=== Proxy probe ===");
    println!("Proxy:    {}", proxy.endpoint());
    println!("Expected: {}", proxy.expected_ip);
    println!();

    let gate = ProxyGate::from_config(&proxy)?;
    for service in default_services() {
        let outcome = gate.probe(&service).await;
        let line = match &outcome {
            ProbeOutcome::Matched(ip) => format!("MATCH     {ip}"),
            ProbeOutcome::Mismatched(ip) => format!("MISMATCH  {ip}"),
            ProbeOutcome::Failed(reason) => format!("FAILED    {reason}"),
        };
        println!("{:<28} {line}", service.url);
    }
    println!();

    if gate.verify().await {
        println!("Verdict: proxy verified");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Verdict: KILL SWITCH would fire");
        Ok(ExitCode::FAILURE)
    }
}
