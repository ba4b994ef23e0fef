//! Signal worker: pull ordered trade batches after the durable cursor,
//! evaluate detectors, persist signals and the cursor in one transaction.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SignalsConfig;
use crate::error::Result;
use crate::runtime::{sleep_unless_shutdown, Backoff};
use crate::signals::{BatchContext, SignalEngine};
use crate::store::{queries, Store};

#[derive(Debug, Clone, Copy)]
pub struct PassSummary {
    pub trades: usize,
    pub signals: usize,
    pub cursor: DateTime<Utc>,
}

/// One batch pass. Returns None when no trades sit past the cursor; the
/// cursor only advances when a batch was evaluated, in the same transaction
/// as the emitted signals.
pub fn run_once(
    store: &Store,
    engine: &SignalEngine,
    batch_size: usize,
) -> Result<Option<PassSummary>> {
    store.with_tx(|tx| {
        let cursor = queries::get_ts_cursor(tx, queries::SIGNAL_CURSOR_KEY)?;
        let trades = queries::fetch_trades_after(tx, cursor, batch_size)?;
        let Some(last) = trades.last() else {
            return Ok(None);
        };
        let cursor = last.traded_at;

        let mut ctx = BatchContext::load(tx, &trades, engine.config())?;
        let signals = engine.evaluate(&mut ctx, &trades);
        let inserted = queries::insert_signals(tx, &signals)?;
        queries::set_ts_cursor(tx, queries::SIGNAL_CURSOR_KEY, &cursor)?;

        Ok(Some(PassSummary { trades: trades.len(), signals: inserted, cursor }))
    })
}

pub async fn run(store: Store, cfg: SignalsConfig, shutdown: CancellationToken) -> Result<()> {
    info!("starting signals worker");
    let engine = SignalEngine::new(cfg.detectors.clone());
    let mut backoff = Backoff::new(
        Duration::from_secs(cfg.backoff_base_seconds),
        Duration::from_secs(cfg.backoff_max_seconds),
    );

    while !shutdown.is_cancelled() {
        match run_once(&store, &engine, cfg.batch_size) {
            Ok(Some(summary)) => {
                backoff.reset();
                info!(
                    trades = summary.trades,
                    signals = summary.signals,
                    cursor = %summary.cursor,
                    "processed trades for signals"
                );
            }
            Ok(None) => {
                backoff.reset();
                if !sleep_unless_shutdown(&shutdown, Duration::from_secs(cfg.idle_seconds)).await {
                    break;
                }
            }
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(error = %e, delay_secs = delay.as_secs(), "signals worker error");
                if !sleep_unless_shutdown(&shutdown, delay).await {
                    break;
                }
            }
        }
    }
    info!("signals worker stopped");
    Ok(())
}
