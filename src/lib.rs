pub mod auth;
pub mod config;
pub mod extractor;
pub mod lifecycle;
pub mod monitor;
pub mod notifier;
pub mod page;
pub mod proxy;
pub mod reporter;
pub mod session;
pub mod state;
pub mod telegram;
pub mod types;
pub mod webdriver;

#[cfg(test)]
mod testing;

/// ipify JSON endpoint; first IP-echo service and the in-browser egress check.
pub const IPIFY_JSON_URL: &str = "https://api.ipify.org?format=json";
