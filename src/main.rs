//! Account balance monitor CLI
//!
//! Starts one watcher per configured account, logs every delivered balance
//! change, and keeps running until the optional duration elapses or SIGINT
//! arrives. All monitors are stopped through their handles before exit, so
//! subscriptions are always released.

#![deny(unused_imports)]
#![deny(unused_mut)]
#![warn(unused_must_use)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use account_monitor::config::Config;
use account_monitor::watcher::{
    start_multi_monitor, BalanceChangeCallback, MultiMonitorSettings, PubsubTransport,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Account address to monitor (repeatable, adds to the config file list)
    #[arg(short, long)]
    account: Vec<String>,

    /// Stop after this many seconds (overrides the config file)
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose)?;

    info!("🚀 Starting account balance monitor");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    info!("📋 Loading configuration from: {}", args.config);
    let config = load_config(&args.config)?;

    // Merge config file accounts with --account flags, first occurrence wins
    let mut accounts: Vec<String> = config.watch.accounts.clone();
    for account in &args.account {
        if !accounts.contains(account) {
            accounts.push(account.clone());
        }
    }
    if accounts.is_empty() {
        bail!("no accounts to monitor; add [watch] accounts to the config file or pass --account");
    }

    info!("🌐 RPC endpoint: {}", config.rpc.http_endpoint);
    info!("🔌 WS endpoint: {}", config.rpc.ws_endpoint);
    info!(
        "👁️ Monitoring {} account(s) at commitment '{}'",
        accounts.len(),
        config.watch.commitment
    );

    let transport = Arc::new(PubsubTransport::new(
        &config.rpc.http_endpoint,
        &config.rpc.ws_endpoint,
    ));

    let mut callbacks: HashMap<String, BalanceChangeCallback> = HashMap::new();
    for account in accounts {
        callbacks.insert(
            account,
            Arc::new(|event| {
                info!(
                    "💰 {} | slot {} | balance {} SOL | change {} SOL",
                    event.account, event.slot, event.formatted_balance, event.formatted_delta
                );
            }),
        );
    }

    let settings = MultiMonitorSettings {
        update_interval_ms: config.watch.update_interval_ms,
        max_retries: config.watch.max_retries,
        retry_delay_ms: config.watch.retry_delay_ms,
    };

    let handle = start_multi_monitor(
        transport,
        &config.rpc.http_endpoint,
        &config.rpc.ws_endpoint,
        callbacks,
        config.watch.commitment,
        settings,
    );

    for (account, error) in handle.failures() {
        warn!("⚠️ Monitor for {} not started: {}", account, error);
    }
    if handle.started() == 0 {
        bail!("no monitor could be started");
    }

    info!("✅ {} monitor(s) running", handle.started());

    // Run until the duration elapses or SIGINT arrives
    let duration_secs = args.duration_secs.or(config.watch.duration_secs);
    if let Some(secs) = duration_secs {
        info!("⏱️ Running for {} seconds", secs);
    }
    run_event_loop(duration_secs, config.monitoring.stats_interval_secs, &handle).await?;

    // Explicit teardown: release every subscription before exiting
    info!("👋 Shutting down gracefully...");
    handle.stop_all();
    info!("📊 Final telemetry: {}", handle.metrics().snapshot_json());

    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        "account_monitor=debug,info"
    } else {
        "account_monitor=info,warn,error"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file_with_env(path)
            .with_context(|| format!("failed to load config from {}", path))
    } else {
        warn!("Config file '{}' not found, using defaults", path);
        Ok(Config::default())
    }
}

/// Wait for the run to end while periodically logging telemetry
async fn run_event_loop(
    duration_secs: Option<u64>,
    stats_interval_secs: u64,
    handle: &account_monitor::watcher::MultiStopHandle,
) -> Result<()> {
    let mut stats_interval =
        tokio::time::interval(Duration::from_secs(stats_interval_secs));
    // The first tick completes immediately; skip it
    stats_interval.tick().await;

    let deadline = async {
        match duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("⏱️ Configured duration elapsed");
                return Ok(());
            }

            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Received shutdown signal");
                return Ok(());
            }

            _ = stats_interval.tick() => {
                info!("📊 Telemetry: {}", handle.metrics().snapshot_json());
            }
        }
    }
}
