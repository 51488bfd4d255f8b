//! # Shopfeed Feed Worker
//!
//! Runs the incremental, full and prune jobs on their configured intervals
//! until Ctrl-C.
//!
//! ## Usage
//! ```bash
//! # Config from the platform config dir (feed.toml)
//! feed-worker
//!
//! # Explicit config, one incremental pass, then exit
//! feed-worker --config ./feed.toml --once
//! ```
//!
//! `RUST_LOG` controls verbosity (default: `info`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use shopfeed_db::{Database, DbConfig};
use shopfeed_sync::{FeedConfig, FeedJobs, FeedUploader, GraphClient};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args = Args::parse();
    let config = Arc::new(FeedConfig::load(args.config)?);
    info!(
        stores = config.stores.len(),
        database = %config.database.path.display(),
        "Configuration loaded"
    );

    let db = Database::new(DbConfig::new(&config.database.path)).await?;
    if !db.health_check().await {
        error!("Database is not answering queries");
        db.close().await;
        return Err("database health check failed".into());
    }
    let sink = Arc::new(GraphClient::new(&config.graph)?);
    let jobs = FeedJobs::new(FeedUploader::new(db.clone(), sink, config.clone()));

    if args.once {
        for report in jobs.incremental_tick().await {
            info!(store_id = %report.store_id, state = ?report.state, submitted = report.submitted, "Cycle finished");
        }
        db.close().await;
        return Ok(());
    }

    run(&jobs, &config).await;

    db.close().await;
    info!("Feed worker stopped");
    Ok(())
}

/// Drives the three jobs until Ctrl-C. Ticks never overlap.
async fn run(jobs: &FeedJobs, config: &FeedConfig) {
    let schedule = &config.schedule;
    let mut incremental = interval(Duration::from_secs(schedule.incremental_interval_secs.max(1)));
    let mut full = interval(Duration::from_secs(schedule.full_interval_secs.max(1)));
    let mut prune = interval(Duration::from_secs(schedule.prune_interval_secs.max(1)));
    for timer in [&mut incremental, &mut full, &mut prune] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    }

    info!(
        incremental_secs = schedule.incremental_interval_secs,
        full_secs = schedule.full_interval_secs,
        prune_secs = schedule.prune_interval_secs,
        "Feed worker started"
    );

    loop {
        tokio::select! {
            _ = incremental.tick() => {
                let reports = jobs.incremental_tick().await;
                let failed = reports.iter().filter(|r| r.error.is_some()).count();
                if failed > 0 {
                    warn!(failed, "Incremental cycle had failing stores");
                }
            }

            _ = full.tick() => {
                for report in jobs.full_tick().await {
                    info!(
                        store_id = %report.store_id,
                        kind = ?report.kind,
                        state = ?report.state,
                        built = report.built,
                        skipped = report.skipped,
                        "Full cycle finished"
                    );
                }
            }

            _ = prune.tick() => {
                jobs.prune_tick().await;
            }

            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(?e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown requested");
                break;
            }
        }
    }
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=shopfeed_sync=trace` - Trace the sync crate only
/// - Default: INFO level
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Command line flags.
struct Args {
    config: Option<PathBuf>,
    once: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = Args {
            config: None,
            once: false,
        };

        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" | "-c" => args.config = iter.next().map(PathBuf::from),
                "--once" => args.once = true,
                other => warn!(arg = other, "Ignoring unknown argument"),
            }
        }

        args
    }
}
