//! Proxy kill switch.
//!
//! Before anything else touches the network, the configured proxy must prove
//! it egresses from the expected address. IP-echo services are tried in a
//! fixed order; any single service being down never fails the check on its
//! own, only all of them failing or disagreeing does.

use anyhow::{Context, Result, bail};
use reqwest::Proxy;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{ProxyConfig, Timings};
use crate::session::Browser;

/// How an IP-echo service reports the caller's address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoFormat {
    /// JSON object with the address under the given field.
    JsonField(&'static str),
    /// Bare address as the whole body.
    PlainText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoService {
    pub url: String,
    pub format: EchoFormat,
}

impl EchoService {
    pub fn new(url: impl Into<String>, format: EchoFormat) -> Self {
        Self {
            url: url.into(),
            format,
        }
    }
}

/// The IP-echo services, in priority order.
pub fn default_services() -> Vec<EchoService> {
    vec![
        EchoService::new(crate::IPIFY_JSON_URL, EchoFormat::JsonField("ip")),
        EchoService::new("https://ifconfig.me/ip", EchoFormat::PlainText),
        EchoService::new("https://api.myip.com", EchoFormat::JsonField("ip")),
    ]
}

/// Fetches a URL through the proxy, returning status code and body.
#[allow(async_fn_in_trait)]
pub trait EchoProbe {
    async fn fetch(&self, url: &str) -> Result<(u16, String)>;
}

/// reqwest client routed through the configured proxy.
pub struct ProxiedProbe {
    client: reqwest::Client,
}

impl ProxiedProbe {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        // Credentials in the URL are sent as Proxy-Authorization.
        let proxy = Proxy::all(config.proxy_url()?).context("invalid proxy address")?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .context("failed to build proxied HTTP client")?;
        Ok(Self { client })
    }
}

impl EchoProbe for ProxiedProbe {
    async fn fetch(&self, url: &str) -> Result<(u16, String)> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok((status, body))
    }
}

/// Extract the reported address from an echo response.
pub fn parse_echo(format: &EchoFormat, status: u16, body: &str) -> Result<String> {
    if status != 200 {
        bail!("unexpected status {status}");
    }
    let ip = match format {
        EchoFormat::PlainText => body.trim().to_string(),
        EchoFormat::JsonField(field) => {
            let value: Value = serde_json::from_str(body).context("malformed JSON body")?;
            value
                .get(*field)
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .with_context(|| format!("missing string field '{field}'"))?
        }
    };
    if ip.is_empty() {
        bail!("empty address in response");
    }
    Ok(ip)
}

/// Outcome of probing one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Matched(String),
    Mismatched(String),
    Failed(String),
}

/// The proxy kill switch.
pub struct ProxyGate<P> {
    probe: P,
    services: Vec<EchoService>,
    expected_ip: String,
}

impl ProxyGate<ProxiedProbe> {
    /// Gate probing the default services through the configured proxy.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        info!("Verifying proxy connection to {}", config.endpoint());
        Ok(Self::new(
            ProxiedProbe::new(config)?,
            default_services(),
            config.expected_ip.clone(),
        ))
    }
}

impl<P: EchoProbe> ProxyGate<P> {
    pub fn new(probe: P, services: Vec<EchoService>, expected_ip: impl Into<String>) -> Self {
        Self {
            probe,
            services,
            expected_ip: expected_ip.into(),
        }
    }

    pub fn expected_ip(&self) -> &str {
        &self.expected_ip
    }

    /// Probe a single service.
    pub async fn probe(&self, service: &EchoService) -> ProbeOutcome {
        let (status, body) = match self.probe.fetch(&service.url).await {
            Ok(resp) => resp,
            Err(e) => return ProbeOutcome::Failed(format!("{e:#}")),
        };
        match parse_echo(&service.format, status, &body) {
            Ok(ip) if ip == self.expected_ip => ProbeOutcome::Matched(ip),
            Ok(ip) => ProbeOutcome::Mismatched(ip),
            Err(e) => ProbeOutcome::Failed(format!("{e:#}")),
        }
    }

    /// True as soon as one service reports the expected address; false only
    /// when every service failed or disagreed.
    pub async fn verify(&self) -> bool {
        for service in &self.services {
            info!("Testing proxy with {}", service.url);
            match self.probe(service).await {
                ProbeOutcome::Matched(ip) => {
                    info!("Proxy verification successful (egress {ip})");
                    return true;
                }
                ProbeOutcome::Mismatched(ip) => {
                    error!(
                        "IP mismatch via {}! Expected: {}, Got: {ip}",
                        service.url, self.expected_ip
                    );
                }
                ProbeOutcome::Failed(reason) => {
                    warn!("Service {} failed: {reason}", service.url);
                }
            }
        }
        error!("KILL SWITCH: All proxy verification attempts failed");
        false
    }
}

/// Confirm a freshly launched browser egresses through the proxy by loading
/// the ipify endpoint and comparing its reported address with the expected one.
pub async fn confirm_session_egress<B: Browser>(
    browser: &B,
    expected_ip: &str,
    timings: &Timings,
) -> Result<()> {
    info!("Verifying proxy in browser...");
    browser.goto(crate::IPIFY_JSON_URL).await?;
    tokio::time::sleep(timings.egress_settle).await;
    let source = browser.page_source().await?;
    let ip = parse_echo(&EchoFormat::JsonField("ip"), 200, rendered_json(&source))
        .context("browser egress check returned no address")?;
    if ip != expected_ip {
        bail!("browser egress {ip} does not match expected address {expected_ip}");
    }
    info!("Browser proxy verified: {expected_ip}");
    Ok(())
}

/// Chrome wraps a JSON document in `<html>...<pre>`; keep the object only.
fn rendered_json(source: &str) -> &str {
    match (source.find('{'), source.rfind('}')) {
        (Some(start), Some(end)) if start < end => &source[start..=end],
        _ => source,
    }
}
