//! CLI command implementations

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backtest;
use crate::cli::WorkerKind;
use crate::config::Config;
use crate::notifier::build_sink;
use crate::scoring::ScoringAggregator;
use crate::signals::{BatchContext, SignalEngine};
use crate::store::{queries, Store};
use crate::{ingest, notifier, profiling, scoring, signals};

/// Start the selected worker(s) and run until SIGINT/SIGTERM. Workers finish
/// their in-flight transaction before exiting.
pub async fn run(config: &Config, worker: WorkerKind, dry_run: bool) -> Result<()> {
    let mut cfg = config.clone();
    if dry_run {
        warn!("running notifier in dry-run mode; no messages will be sent");
        cfg.notifier.dry_run = true;
    }

    let store = Store::open(&cfg.database.path)?;
    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let mut handles = Vec::new();
    let wants = |kind: WorkerKind| worker == WorkerKind::All || worker == kind;

    if wants(WorkerKind::Ingestion) {
        handles.push(tokio::spawn(ingest::worker::run(
            store.clone(),
            cfg.ingestion.clone(),
            shutdown.clone(),
        )));
    }
    if wants(WorkerKind::Signals) {
        handles.push(tokio::spawn(signals::worker::run(
            store.clone(),
            cfg.signals.clone(),
            shutdown.clone(),
        )));
    }
    if wants(WorkerKind::Profiler) {
        handles.push(tokio::spawn(profiling::worker::run(
            store.clone(),
            cfg.profiler.clone(),
            shutdown.clone(),
        )));
    }
    if wants(WorkerKind::Scoring) {
        handles.push(tokio::spawn(scoring::worker::run(
            store.clone(),
            cfg.scoring.clone(),
            shutdown.clone(),
        )));
    }
    if wants(WorkerKind::Notifier) {
        let sink = build_sink(&cfg.notifier, cfg.ingestion.client_timeout_seconds)?;
        handles.push(tokio::spawn(notifier::worker::run(
            store.clone(),
            cfg.notifier.clone(),
            sink,
            shutdown.clone(),
        )));
    }

    if handles.is_empty() {
        anyhow::bail!("no worker selected");
    }
    info!(workers = handles.len(), "pipeline running");

    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "worker exited with error"),
            Err(e) => error!(error = %e, "worker task panicked"),
        }
    }
    Ok(())
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(term) => term,
                Err(e) => {
                    warn!(error = %e, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {},
                _ = term.recv() => {},
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown requested");
        shutdown.cancel();
    });
}

/// Create (or migrate) the schema. Idempotent.
pub fn init_db(config: &Config) -> Result<()> {
    Store::open(&config.database.path)?;
    info!(path = %config.database.path, "database initialized");
    Ok(())
}

/// Truncate derived state and re-run the signal engine plus scoring over the
/// stored trades in [start, end].
pub fn replay(
    config: &Config,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    batch_size: usize,
) -> Result<()> {
    let store = Store::open(&config.database.path)?;
    let engine = SignalEngine::new(config.signals.detectors.clone());
    let aggregator =
        ScoringAggregator::new(chrono::Duration::hours(config.scoring.window_hours as i64));

    store.with_tx(|tx| queries::reset_derived(tx))?;
    info!(start = %start, end = %end, "starting replay");

    let mut offset = 0usize;
    loop {
        let processed = store.with_tx(|tx| {
            let batch = queries::fetch_trades_in_range(tx, &start, &end, offset, batch_size)?;
            if batch.is_empty() {
                return Ok(0);
            }
            let mut ctx = BatchContext::load(tx, &batch, engine.config())?;
            let emitted = engine.evaluate(&mut ctx, &batch);
            queries::insert_signals(tx, &emitted)?;
            let last_at = batch.last().map(|t| t.traded_at).unwrap_or(end);
            aggregator.process(tx, last_at)?;
            Ok(batch.len())
        })?;
        if processed == 0 {
            break;
        }
        offset += processed;
    }

    info!(processed_trades = offset, "replay complete");
    Ok(())
}

/// Evaluate all alerts into backtest_results.
pub fn run_backtest(config: &Config) -> Result<()> {
    let store = Store::open(&config.database.path)?;
    let total = backtest::evaluate_alerts(&store)?;
    info!(alerts = total, "backtest complete");
    Ok(())
}

/// Print the effective configuration with secrets masked.
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}
