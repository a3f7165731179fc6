use anyhow::Context;
use clap::Parser;
use event_notifier::alerts::{NotificationDispatcher, ThrottleLedger, ThrottlePolicy};
use event_notifier::clock::{Clock, SystemClock};
use event_notifier::collectors::EventCollector;
use event_notifier::config::{mask_value, Config};
use event_notifier::credentials::CredentialCache;
use event_notifier::intake::EventIntake;
use event_notifier::provider::{MessagingProvider, MockProvider, WeChatProvider};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Queue depth between the event source and the intake loop
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Command-line arguments for the event notifier
#[derive(Parser)]
#[command(
    name = "event-notifier",
    about = "Host event log watcher with rate-limited WeChat notifications",
    long_about = "Watches the host's Application event log and sends a WeChat template \
                  message for every error-level event, subject to a daily cap and a \
                  minimum interval between notifications."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "config.toml",
        help = "Configuration file path (TOML format); created with empty values if missing"
    )]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Log notifications instead of sending them
    #[arg(long, help = "Use an in-process provider that accepts every message")]
    dry_run: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// A missing config file is fine; it is created on startup.
    fn validate(&self) -> Result<(), String> {
        if self.config.exists() {
            if !self.config.is_file() {
                return Err(format!(
                    "Configuration path is not a file: {}",
                    self.config.display()
                ));
            }

            if let Some(extension) = self.config.extension() {
                if extension != "toml" {
                    warn!(
                        "Configuration file does not have .toml extension: {}",
                        self.config.display()
                    );
                }
            }
        }

        Ok(())
    }
}

/// Load the configuration, falling back to defaults if it cannot be used
fn load_config(path: &Path) -> Config {
    info!("Loading configuration from: {}", path.display());
    match Config::load_or_create(path) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error in '{}': {}", path.display(), e);
            warn!("Using default configuration due to invalid config file");
            Config::default()
        }
    }
}

fn log_config(config: &Config) {
    info!("WeChat AppId: {}", mask_value(&config.wechat.app_id));
    info!("WeChat AppSecret: {}", mask_value(&config.wechat.app_secret));
    info!("WeChat recipient: {}", mask_value(&config.wechat.recipient_id));
    info!("WeChat template: {}", mask_value(&config.wechat.template_id));

    if config.wechat.app_id.is_empty() || config.wechat.app_secret.is_empty() {
        warn!("WeChat credentials are empty; notifications will fail until they are set");
    }
}

/// Wire up all components and run until interrupted
async fn run(config: Config, dry_run: bool) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let provider: Arc<dyn MessagingProvider> = if dry_run {
        warn!("Dry run: notifications will not leave this process");
        Arc::new(MockProvider::success())
    } else {
        Arc::new(
            WeChatProvider::new(config.provider.base_url.clone(), config.provider.timeout())
                .context("Failed to build WeChat HTTP client")?,
        )
    };

    let credentials = Arc::new(CredentialCache::new(
        Arc::clone(&provider),
        config.wechat.app_id.clone(),
        config.wechat.app_secret.clone(),
        config.state.credential_path.clone(),
        chrono::Duration::seconds(
            i64::try_from(config.state.token_safety_margin_seconds)
                .context("token_safety_margin_seconds is out of range")?,
        ),
        Arc::clone(&clock),
    ));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        credentials,
        provider,
        config.wechat.recipient_id.clone(),
        config.wechat.template_id.clone(),
    ));
    let ledger = Arc::new(ThrottleLedger::new(
        config.state.ledger_path.clone(),
        ThrottlePolicy::from(&config.throttle),
    ));
    let intake = Arc::new(EventIntake::new(
        ledger,
        dispatcher,
        clock,
        config.source.max_concurrent_events,
    ));

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let mut collector = EventCollector::new(config.source.command.clone(), event_tx);
    collector.start().context("Failed to start event source")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .context("Error setting SIGINT handler for graceful shutdown")?;

    info!("Event notifier is running. Press Ctrl+C to stop.");

    let intake_task = tokio::spawn(Arc::clone(&intake).run(event_rx, shutdown_rx));
    let intake_result = intake_task.await;

    if let Err(e) = collector.stop() {
        error!("Error stopping event source: {}", e);
    }
    intake_result.context("Event intake task failed")?;

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting event notifier");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config = load_config(&cli.config);
    log_config(&config);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config, cli.dry_run)) {
        error!("{:#}", e);
        std::process::exit(1);
    }

    info!("Event notifier shutdown complete");
}
