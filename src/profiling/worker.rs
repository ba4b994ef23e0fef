//! Profiling worker: every few minutes, score the trades whose horizons
//! have fully elapsed and fold them into wallet_stats.
//!
//! Best-effort by design: a missing stats row only suppresses the
//! smart-wallet detector for that wallet.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ProfilerConfig;
use crate::error::Result;
use crate::profiling::WalletAccuracyScorer;
use crate::runtime::sleep_unless_shutdown;
use crate::store::{queries, Store};

/// One profiling pass. Evaluates trades past the cursor that are old enough
/// to score, and advances the cursor in the same transaction as the stats.
pub fn run_once(
    store: &Store,
    scorer: &WalletAccuracyScorer,
    batch_size: usize,
    now: DateTime<Utc>,
) -> Result<usize> {
    store.with_tx(|tx| {
        let cursor = queries::get_ts_cursor(tx, queries::PROFILER_CURSOR_KEY)?;
        let upper = scorer.horizon_cutoff(now);
        let trades = queries::fetch_trades_for_scoring(tx, cursor, &upper, batch_size)?;
        let Some(last) = trades.last() else {
            return Ok(0);
        };
        let last_at = last.traded_at;
        let updated = scorer.score_batch(tx, &trades)?;
        queries::set_ts_cursor(tx, queries::PROFILER_CURSOR_KEY, &last_at)?;
        Ok(updated)
    })
}

pub async fn run(store: Store, cfg: ProfilerConfig, shutdown: CancellationToken) -> Result<()> {
    info!("starting profiling worker (wallet accuracy)");
    let scorer = WalletAccuracyScorer::default();

    while !shutdown.is_cancelled() {
        match run_once(&store, &scorer, cfg.batch_size, Utc::now()) {
            Ok(updated) => {
                if updated > 0 {
                    info!(updated_wallets = updated, "profiling iteration");
                }
                if !sleep_unless_shutdown(&shutdown, Duration::from_secs(cfg.interval_seconds))
                    .await
                {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "profiling worker error");
                if !sleep_unless_shutdown(
                    &shutdown,
                    Duration::from_secs(cfg.error_sleep_seconds),
                )
                .await
                {
                    break;
                }
            }
        }
    }
    info!("profiling worker stopped");
    Ok(())
}
