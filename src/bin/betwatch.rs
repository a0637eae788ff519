use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use betslip_monitor::config::{self, AppConfig, SETTINGS_PATH, SettingsConfig};
use betslip_monitor::lifecycle::{SessionLifecycle, Startup};
use betslip_monitor::monitor::{LoopSettings, MonitorLoop};
use betslip_monitor::notifier::{LogMessenger, Messenger, Notifier};
use betslip_monitor::proxy::ProxyGate;
use betslip_monitor::reporter;
use betslip_monitor::state::DedupStore;
use betslip_monitor::telegram::TelegramMessenger;
use betslip_monitor::types::HistoryLedger;
use betslip_monitor::webdriver::WebDriverLauncher;

#[derive(Parser)]
#[command(name = "betwatch", about = "Watch a bwin account for new bets and relay them to Telegram")]
struct Args {
    /// Tuning file ([settings] table); missing file means defaults
    #[arg(long, default_value = SETTINGS_PATH)]
    settings: PathBuf,

    /// Write the effective settings to this path and exit
    #[arg(long)]
    write_settings: Option<PathBuf>,

    /// Log notifications instead of sending them to Telegram
    #[arg(long)]
    dry_run: bool,

    /// Bet history file (overrides settings and HISTORY_PATH)
    #[arg(long)]
    history: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut settings = if args.settings.exists() {
        let loaded = SettingsConfig::load(&args.settings)?;
        info!("Loaded settings from {}", args.settings.display());
        loaded
    } else {
        SettingsConfig::default()
    };
    if let Some(history) = &args.history {
        settings.history_path = history.display().to_string();
    }

    if let Some(path) = &args.write_settings {
        config::load_env_file()?;
        if let Err(e) = settings.apply_overrides(|key| std::env::var(key).ok()) {
            error!("Configuration error: {e}");
            return Ok(ExitCode::FAILURE);
        }
        settings.save(path)?;
        info!("Wrote settings to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let (mut config, env_file) = match AppConfig::from_env(settings) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Configuration error: {e:#}");
            return Ok(ExitCode::FAILURE);
        }
    };
    if let Some(history) = &args.history {
        config.settings.history_path = history.display().to_string();
    }
    match env_file {
        Some(file) => info!("Loaded environment from {file}"),
        None => warn!("No config.env or .env found, using process environment"),
    }

    if args.dry_run {
        info!("Dry run: notifications are logged, not sent");
        run(config, LogMessenger).await
    } else {
        let messenger = TelegramMessenger::new(&config.messaging)?;
        run(config, messenger).await
    }
}

async fn run<M: Messenger>(config: AppConfig, messenger: M) -> Result<ExitCode> {
    let history_path = Path::new(&config.settings.history_path);
    let store = if config.settings.resume_history && history_path.exists() {
        let ledger = HistoryLedger::load(history_path)?;
        info!(
            "Resuming with {} known bet(s) from {}",
            ledger.bets.len(),
            history_path.display()
        );
        DedupStore::resume(ledger)
    } else {
        DedupStore::new()
    };

    info!(
        "Starting bet monitor - proxy={} expected_ip={} check={}s headless={}",
        config.proxy.endpoint(),
        config.proxy.expected_ip,
        config.settings.check_interval_secs,
        config.settings.headless,
    );

    let gate = ProxyGate::from_config(&config.proxy)?;
    let launcher = WebDriverLauncher::new(&config.settings, &config.proxy)?;
    let notifier = Notifier::new(messenger);
    let mut lifecycle = SessionLifecycle::from_settings(&config.settings);

    // One listener for the whole run. Its first poll, which installs the
    // Ctrl+C handler, happens before any startup stage.
    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };
    tokio::pin!(interrupted);

    match lifecycle
        .initialize_until(
            &gate,
            &launcher,
            &config.credentials,
            &notifier,
            &mut interrupted,
        )
        .await
    {
        Ok(Startup::Ready) => {}
        Ok(Startup::Interrupted) => {
            info!("Stopped before monitoring began");
            return Ok(ExitCode::SUCCESS);
        }
        Err(kill) => {
            error!("Startup aborted: {kill}");
            return Ok(ExitCode::FAILURE);
        }
    }

    let monitor = MonitorLoop::new(
        lifecycle,
        notifier,
        store,
        LoopSettings::from_settings(&config.settings),
    );
    info!("Run id: {}", monitor.run_id());

    let summary = monitor.run(interrupted).await;
    reporter::report_run_summary(&summary);

    Ok(ExitCode::SUCCESS)
}
