//! Offline alert evaluation: for each alert, record the trade-derived price
//! at alert time and at +15m/+1h/+4h with raw deltas. One row per alert.

use chrono::Duration;
use tracing::info;

use crate::error::Result;
use crate::store::models::BacktestRow;
use crate::store::{queries, Store};

/// Evaluate every alert; existing rows are refreshed. Returns the number of
/// alerts evaluated.
pub fn evaluate_alerts(store: &Store) -> Result<usize> {
    store.with_tx(|tx| {
        let alerts = queries::all_alerts(tx)?;
        let mut total = 0usize;
        for alert in alerts {
            let t0 = alert.created_at;
            let price_t0 = queries::price_at_or_before(tx, alert.market_id, &t0)?;
            let price_15m =
                queries::price_at_or_before(tx, alert.market_id, &(t0 + Duration::minutes(15)))?;
            let price_1h =
                queries::price_at_or_before(tx, alert.market_id, &(t0 + Duration::hours(1)))?;
            let price_4h =
                queries::price_at_or_before(tx, alert.market_id, &(t0 + Duration::hours(4)))?;

            let delta = |later: Option<rust_decimal::Decimal>| match (price_t0, later) {
                (Some(p0), Some(pn)) => Some(pn - p0),
                _ => None,
            };

            queries::upsert_backtest(
                tx,
                &BacktestRow {
                    alert_id: alert.id,
                    market_id: alert.market_id,
                    side: alert.side,
                    score: alert.score,
                    alert_time: t0,
                    price_t0,
                    price_15m,
                    price_1h,
                    price_4h,
                    delta_15m: delta(price_15m),
                    delta_1h: delta(price_1h),
                    delta_4h: delta(price_4h),
                },
            )?;
            total += 1;
        }
        info!(alerts = total, "computed backtest results");
        Ok(total)
    })
}
