//! Scoring worker. The signal-id cursor only gates whether a pass is
//! needed; the pass itself always re-reads the whole window, so older
//! signals keep contributing until they age out.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ScoringConfig;
use crate::error::Result;
use crate::runtime::{sleep_unless_shutdown, Backoff};
use crate::scoring::ScoringAggregator;
use crate::store::{queries, Store};

/// One gated pass. Returns None when no signal id sits past the cursor.
pub fn run_once(
    store: &Store,
    aggregator: &ScoringAggregator,
    now: DateTime<Utc>,
) -> Result<Option<(usize, i64)>> {
    store.with_tx(|tx| {
        let cursor = queries::get_int_cursor(tx, queries::SCORING_CURSOR_KEY)?;
        let Some(max_id) = queries::max_signal_id(tx, cursor)? else {
            return Ok(None);
        };
        let written = aggregator.process(tx, now)?;
        queries::set_int_cursor(tx, queries::SCORING_CURSOR_KEY, max_id)?;
        Ok(Some((written, max_id)))
    })
}

pub async fn run(store: Store, cfg: ScoringConfig, shutdown: CancellationToken) -> Result<()> {
    info!("starting scoring worker");
    let aggregator = ScoringAggregator::new(chrono::Duration::hours(cfg.window_hours as i64));
    let mut backoff = Backoff::new(
        Duration::from_secs(cfg.backoff_base_seconds),
        Duration::from_secs(cfg.backoff_max_seconds),
    );

    while !shutdown.is_cancelled() {
        match run_once(&store, &aggregator, Utc::now()) {
            Ok(Some((written, cursor))) => {
                backoff.reset();
                info!(alerts = written, cursor = cursor, "scoring iteration");
            }
            Ok(None) => {
                backoff.reset();
                if !sleep_unless_shutdown(&shutdown, Duration::from_secs(cfg.idle_seconds)).await {
                    break;
                }
            }
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(error = %e, delay_secs = delay.as_secs(), "scoring worker error");
                if !sleep_unless_shutdown(&shutdown, delay).await {
                    break;
                }
            }
        }
    }
    info!("scoring worker stopped");
    Ok(())
}
