//! runclock - deadline and quota-retry timers
//!
//! CLI entry point for inspecting the backoff and simulating runs.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use eyre::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use runclock::backoff::BackoffPolicy;
use runclock::cli::{Cli, Command};
use runclock::config::Config;
use runclock::simulate::{RunOutcome, Scenario, simulate};

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };

    // Write to a log file so stdout stays clean for command output
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("runclock")
        .join("logs");
    let log_file = fs::create_dir_all(&log_dir).and_then(|_| fs::File::create(log_dir.join("runclock.log")));
    let (writer, fallback) = match log_file {
        Ok(log_file) => (BoxMakeWriter::new(log_file), None),
        Err(e) => (BoxMakeWriter::new(std::io::stderr), Some(e)),
    };

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install tracing subscriber: {}", e))?;

    if let Some(e) = fallback {
        warn!(log_dir = %log_dir.display(), error = %e, "Cannot open log file, logging to stderr");
    }
    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(
        "runclock loaded config: default_timeout_minutes={}, max_backoff_secs={}",
        config.timeouts.default_timeout_minutes, config.backoff.max_backoff_secs
    );

    match cli.command {
        Command::Backoff { attempts, seed } => cmd_backoff(&config, attempts, seed),
        Command::Simulate { scenario } => cmd_simulate(&config, &scenario).await,
    }
}

/// Print one sampled delay per attempt
fn cmd_backoff(config: &Config, attempts: u32, seed: Option<u64>) -> Result<()> {
    let policy = BackoffPolicy::from_config(&config.backoff);
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    println!("{:>8}  {:>12}  {:>10}", "ATTEMPT", "CEILING(s)", "DELAY(s)");
    for attempt in 1..=attempts {
        let delay = policy.delay_for(attempt, &mut rng);
        println!("{:>8}  {:>12}  {:>10}", attempt, policy.ceiling(attempt), delay.as_secs());
    }
    Ok(())
}

/// Run a scenario, stopping early on SIGINT/SIGTERM
async fn cmd_simulate(config: &Config, path: &Path) -> Result<()> {
    let scenario = Scenario::load(path)?;
    info!("Loaded scenario with {} runs from {}", scenario.runs.len(), path.display());

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    let signals = tokio::spawn(async move {
        wait_for_signal().await;
        warn!("Shutdown signal received");
        signal_token.cancel();
    });

    let report = simulate(&scenario, config, shutdown).await?;
    signals.abort();

    println!("{:<40}  {:>7}  OUTCOME", "RUN", "RETRIES");
    for (key, outcome) in &report.outcomes {
        let retries = report.retries.get(key).copied().unwrap_or(0);
        println!("{:<40}  {:>7}  {}", key, retries, outcome);
    }
    println!();
    println!(
        "{} finished, {} timed out, {} abandoned",
        report.count(&RunOutcome::Finished),
        report.count(&RunOutcome::TimedOut),
        report.count(&RunOutcome::Abandoned)
    );
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut sigint), Ok(mut sigterm)) = (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) else {
        warn!("Failed to install signal handlers");
        std::future::pending::<()>().await;
        return;
    };
    tokio::select! {
        _ = sigint.recv() => warn!("SIGINT received"),
        _ = sigterm.recv() => warn!("SIGTERM received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
