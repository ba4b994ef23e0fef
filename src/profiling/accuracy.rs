//! Wallet accuracy scoring.
//!
//! Evaluates wallet trades and tracks how often they "call it right":
//! position before the price moves in their favor at 15m, 1h and 4h.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::error::Result;
use crate::store::models::{Side, TradeRow, WalletStatsRow};
use crate::store::queries;

/// Minimum favorable move to count a horizon as correct.
pub const MIN_FAVORABLE_DELTA: Decimal = dec!(0.05);

/// Horizon weights for the aggregate accuracy score.
const WEIGHT_15M: Decimal = dec!(0.2);
const WEIGHT_1H: Decimal = dec!(0.3);
const WEIGHT_4H: Decimal = dec!(0.5);

/// Longest horizon in minutes; trades younger than this are not scoreable.
const MAX_HORIZON_MINUTES: i64 = 240;

#[derive(Debug, Clone)]
pub struct AccuracyConfig {
    pub min_favorable_delta: Decimal,
    pub min_evaluated_trades: i64,
    pub min_notional: Decimal,
    pub tolerance_minutes: i64,
}

impl Default for AccuracyConfig {
    fn default() -> Self {
        Self {
            min_favorable_delta: MIN_FAVORABLE_DELTA,
            min_evaluated_trades: 5,
            min_notional: dec!(100),
            tolerance_minutes: 5,
        }
    }
}

/// Did the price move favorably for the position, by at least the default
/// threshold? Buys profit from the price going up, sells from going down.
pub fn is_favorable_move(side: Side, entry_price: Decimal, later_price: Decimal) -> bool {
    favorable_with_threshold(side, entry_price, later_price, MIN_FAVORABLE_DELTA)
}

fn favorable_with_threshold(
    side: Side,
    entry_price: Decimal,
    later_price: Decimal,
    threshold: Decimal,
) -> bool {
    let delta = later_price - entry_price;
    match side {
        Side::Buy => delta >= threshold,
        Side::Sell => delta <= -threshold,
    }
}

/// Signed delta where positive always means favorable for the side.
pub fn signed_delta(side: Side, entry_price: Decimal, later_price: Decimal) -> Decimal {
    let raw = later_price - entry_price;
    match side {
        Side::Buy => raw,
        Side::Sell => -raw,
    }
}

/// Result of evaluating a single trade against its three horizons.
#[derive(Debug, Clone)]
pub struct TradeOutcome {
    pub trade_id: i64,
    pub wallet_address: String,
    pub side: Side,
    pub traded_at: DateTime<Utc>,
    pub notional: Decimal,
    pub correct_15m: bool,
    pub correct_1h: bool,
    pub correct_4h: bool,
    pub delta_15m: Option<Decimal>,
    pub delta_1h: Option<Decimal>,
    pub delta_4h: Option<Decimal>,
}

/// Per-wallet accumulation over one batch.
#[derive(Debug, Default)]
struct WalletBatch {
    total: i64,
    evaluated: i64,
    correct_15m: i64,
    correct_1h: i64,
    correct_4h: i64,
    notional: Decimal,
    sum_delta_when_correct: Decimal,
    correct_with_delta: i64,
    // 4h outcomes in traded_at order, for the streak
    outcomes_4h: Vec<bool>,
}

pub struct WalletAccuracyScorer {
    cfg: AccuracyConfig,
}

impl WalletAccuracyScorer {
    pub fn new(cfg: AccuracyConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &AccuracyConfig {
        &self.cfg
    }

    /// Only trades whose longest horizon has fully elapsed are scoreable.
    pub fn horizon_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::minutes(MAX_HORIZON_MINUTES + self.cfg.tolerance_minutes)
    }

    /// The market price closest to `target` within the tolerance window.
    /// Ties resolve to the earliest observation.
    pub fn price_near(
        &self,
        conn: &Connection,
        market_id: i64,
        target: DateTime<Utc>,
    ) -> Result<Option<Decimal>> {
        let tolerance = Duration::minutes(self.cfg.tolerance_minutes);
        let points =
            queries::prices_between(conn, market_id, &(target - tolerance), &(target + tolerance))?;
        let mut best: Option<(Duration, Decimal)> = None;
        for (ts, price) in points {
            let distance = (ts - target).abs();
            if best.as_ref().map(|(d, _)| distance < *d).unwrap_or(true) {
                best = Some((distance, price));
            }
        }
        Ok(best.map(|(_, price)| price))
    }

    /// Evaluate one trade's outcome at 15m, 1h and 4h. Dust trades under the
    /// notional floor are skipped.
    pub fn evaluate_trade(&self, conn: &Connection, trade: &TradeRow) -> Result<Option<TradeOutcome>> {
        let notional = trade.notional();
        if notional < self.cfg.min_notional {
            return Ok(None);
        }

        let p0 = trade.price;
        let price_15m = self.price_near(conn, trade.market_id, trade.traded_at + Duration::minutes(15))?;
        let price_1h = self.price_near(conn, trade.market_id, trade.traded_at + Duration::hours(1))?;
        let price_4h = self.price_near(conn, trade.market_id, trade.traded_at + Duration::hours(4))?;

        let correct = |later: Option<Decimal>| {
            later
                .map(|p| favorable_with_threshold(trade.side, p0, p, self.cfg.min_favorable_delta))
                .unwrap_or(false)
        };

        Ok(Some(TradeOutcome {
            trade_id: trade.id,
            wallet_address: trade.wallet_address.clone(),
            side: trade.side,
            traded_at: trade.traded_at,
            notional,
            correct_15m: correct(price_15m),
            correct_1h: correct(price_1h),
            correct_4h: correct(price_4h),
            delta_15m: price_15m.map(|p| signed_delta(trade.side, p0, p)),
            delta_1h: price_1h.map(|p| signed_delta(trade.side, p0, p)),
            delta_4h: price_4h.map(|p| signed_delta(trade.side, p0, p)),
        }))
    }

    /// Weighted accuracy from accumulated counts; null below the evaluated
    /// floor, otherwise in [0, 1].
    pub fn accuracy_score(
        &self,
        evaluated: i64,
        correct_15m: i64,
        correct_1h: i64,
        correct_4h: i64,
    ) -> Option<Decimal> {
        if evaluated < self.cfg.min_evaluated_trades {
            return None;
        }
        let denom = Decimal::from(evaluated);
        Some(
            Decimal::from(correct_15m) / denom * WEIGHT_15M
                + Decimal::from(correct_1h) / denom * WEIGHT_1H
                + Decimal::from(correct_4h) / denom * WEIGHT_4H,
        )
    }

    /// Evaluate a trade batch and fold the outcomes into wallet_stats.
    /// Returns the number of wallets touched. Runs inside the caller's
    /// transaction so the read-merge-upsert is atomic.
    pub fn score_batch(&self, conn: &Connection, trades: &[TradeRow]) -> Result<usize> {
        let mut batches: BTreeMap<String, WalletBatch> = BTreeMap::new();

        for trade in trades {
            let batch = batches.entry(trade.wallet_address.clone()).or_default();
            batch.total += 1;
            let Some(outcome) = self.evaluate_trade(conn, trade)? else {
                continue;
            };
            batch.evaluated += 1;
            batch.notional += outcome.notional;
            if outcome.correct_15m {
                batch.correct_15m += 1;
            }
            if outcome.correct_1h {
                batch.correct_1h += 1;
            }
            if outcome.correct_4h {
                batch.correct_4h += 1;
                if let Some(delta) = outcome.delta_4h {
                    batch.sum_delta_when_correct += delta;
                    batch.correct_with_delta += 1;
                }
            }
            batch.outcomes_4h.push(outcome.correct_4h);
        }

        let mut updated = 0usize;
        for (wallet, batch) in batches {
            if batch.evaluated == 0 && batch.total == 0 {
                continue;
            }
            let mut stats = queries::get_wallet_stats(conn, &wallet)?.unwrap_or(WalletStatsRow {
                wallet_address: wallet.clone(),
                ..Default::default()
            });

            // Average favorable 4h delta, weighted across old and new wins
            let old_weight = Decimal::from(stats.correct_4h);
            let new_weight = Decimal::from(batch.correct_with_delta);
            stats.avg_delta_when_correct = match (stats.avg_delta_when_correct, new_weight.is_zero())
            {
                (old, true) => old,
                (None, false) => Some(batch.sum_delta_when_correct / new_weight),
                (Some(old_avg), false) => {
                    Some((old_avg * old_weight + batch.sum_delta_when_correct) / (old_weight + new_weight))
                }
            };

            stats.total_trades += batch.total;
            stats.evaluated_trades += batch.evaluated;
            stats.correct_15m += batch.correct_15m;
            stats.correct_1h += batch.correct_1h;
            stats.correct_4h += batch.correct_4h;
            stats.total_notional += batch.notional;
            stats.accuracy_score = self.accuracy_score(
                stats.evaluated_trades,
                stats.correct_15m,
                stats.correct_1h,
                stats.correct_4h,
            );

            // Run-length 4h streak carried across batches
            for correct in &batch.outcomes_4h {
                if *correct {
                    stats.current_streak += 1;
                    stats.best_streak = stats.best_streak.max(stats.current_streak);
                } else {
                    stats.current_streak = 0;
                }
            }

            queries::upsert_wallet_stats(conn, &stats)?;
            debug!(
                wallet = %stats.wallet_address,
                evaluated = stats.evaluated_trades,
                accuracy = ?stats.accuracy_score,
                "updated wallet stats"
            );
            updated += 1;
        }
        Ok(updated)
    }
}

impl Default for WalletAccuracyScorer {
    fn default() -> Self {
        Self::new(AccuracyConfig::default())
    }
}
