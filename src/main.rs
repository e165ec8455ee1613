//! # Adoption Watch
//!
//! Watches a shelter's adoption listing and emails one digest per run for
//! animals that are newly listed and match the configured age and gender
//! thresholds. Every notified animal is recorded so it is never reported
//! twice.
//!
//! ## Usage
//!
//! ```sh
//! adoption_watch --database-url sqlite://data/items.db
//! ```
//!
//! ## Architecture
//!
//! 1. **Startup**: create the record store schema, retrying a bounded number
//!    of times; give up with a non-zero exit
//! 2. **Scheduling**: tick on a fixed interval, skip ticks outside the active
//!    window, never run two checks at once
//! 3. **Change detection**: scan the listing, skip known links, fetch and
//!    extract facts for the rest, filter, insert the survivors
//! 4. **Notification**: send a single digest of the run's new items

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod eligibility;
mod engine;
mod error;
mod extract;
mod health;
mod models;
mod outputs;
mod retry;
mod scheduler;
mod scrapers;
mod store;
mod utils;

use cli::{Cli, Command};
use engine::ChangeDetector;
use outputs::DigestNotifier;
use outputs::mail::HttpMailTransport;
use scheduler::{RunGate, Scheduler, initialize_store};
use scrapers::sfspca::SfSpcaSource;
use store::{RecordStore, SqliteRecordStore};
use utils::{days_before, ensure_database_dir};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let args = Cli::parse();
    info!(listing_url = %args.listing_url, "adoption_watch starting up");

    match args.resolved_command() {
        Command::Watch => watch_forever(&args).await,
        Command::RunOnce => run_once(&args).await,
        Command::List { days } => list_items(&args, days).await,
    }
}

async fn open_store(args: &Cli) -> anyhow::Result<Arc<SqliteRecordStore>> {
    ensure_database_dir(&args.database_url)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to prepare database directory")?;

    let store = SqliteRecordStore::connect(&args.database_url, &args.pool_settings())
        .context("Invalid DATABASE_URL")?;
    initialize_store(&store, &args.init_policy())
        .await
        .context("Record store unreachable; giving up")?;
    Ok(Arc::new(store))
}

fn build_detector(args: &Cli, store: Arc<SqliteRecordStore>) -> anyhow::Result<ChangeDetector> {
    let source = SfSpcaSource::new(&args.listing_url, args.fetch_timeout())
        .context("Failed to build listing source")?;

    let notifier = match args.mail_credentials() {
        Some(credentials) => {
            let transport =
                HttpMailTransport::new(&args.mail.mail_api_url, credentials, args.fetch_timeout())
                    .context("Failed to build mail transport")?;
            DigestNotifier::new(Arc::new(transport))
        }
        None => {
            warn!("Mail credentials incomplete; digests will be logged and skipped");
            DigestNotifier::unconfigured()
        }
    };

    let extractor = args.extractor().context("Invalid fact pattern")?;

    let filter = args.eligibility();
    info!(
        max_age_months = filter.max_age_months,
        genders = ?filter.accepted_genders,
        "Eligibility configured"
    );

    Ok(ChangeDetector::new(
        Arc::new(source),
        store,
        Arc::new(extractor),
        filter,
        Arc::new(notifier),
    ))
}

async fn watch_forever(args: &Cli) -> anyhow::Result<()> {
    let listener = health::bind(args.watch.health_addr)
        .await
        .with_context(|| format!("Failed to bind health endpoint on {}", args.watch.health_addr))?;
    let store = open_store(args).await?;
    let gate = RunGate::new(Arc::new(build_detector(args, store)?));
    let scheduler = Scheduler::new(gate.clone(), args.watch.interval(), args.watch.window());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let health = tokio::spawn({
        let gate = gate.clone();
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = health::serve(listener, gate, shutdown).await {
                error!(error = %e, "Health endpoint failed");
            }
        }
    });

    scheduler.run_until(shutdown_rx).await;

    if let Err(e) = health.await {
        error!(error = %e, "Health endpoint task aborted");
    }
    info!("adoption_watch stopped");
    Ok(())
}

async fn run_once(args: &Cli) -> anyhow::Result<()> {
    let store = open_store(args).await?;
    let gate = RunGate::new(Arc::new(build_detector(args, store)?));
    let report = gate.run_exclusive().await.context("Check failed")?;
    println!(
        "Checked {} entries: {} new, {} already known, {} ineligible, {} skipped on errors",
        report.entries_seen,
        report.new_items.len(),
        report.tally.already_known,
        report.tally.ineligible,
        report.tally.fetch_failed + report.tally.store_failed + report.tally.unparseable,
    );
    for item in &report.new_items {
        println!("  {}  {}", item.name, item.link);
    }
    Ok(())
}

async fn list_items(args: &Cli, days: Option<i64>) -> anyhow::Result<()> {
    let store = open_store(args).await?;
    let records = match days {
        Some(days) => {
            let cutoff = days_before(Utc::now(), days)
                .with_context(|| format!("--days {} is out of range", days))?;
            store.list_since(cutoff).await?
        }
        None => store.list_all().await?,
    };
    if records.is_empty() {
        println!("No items recorded.");
        return Ok(());
    }
    for r in &records {
        let age = r.age.map(|a| format!("{} mo", a)).unwrap_or_else(|| "?".into());
        let gender = r.gender.map(|g| g.to_string()).unwrap_or_else(|| "?".into());
        println!(
            "{:>5}  {}  {:<20} {:>6} {:<7} {}",
            r.id,
            r.discovered_at.format("%Y-%m-%d %H:%M"),
            r.name,
            age,
            gender,
            r.link
        );
    }
    println!("{} item(s)", records.len());
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
