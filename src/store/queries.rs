//! SQL for every entity, as plain functions over a connection.
//!
//! Callers decide transaction scope through [`super::Store::with_tx`];
//! cursor writes always share the transaction of the rows they acknowledge.

use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use rust_decimal::Decimal;

use crate::error::Result;
use crate::store::models::{
    format_dec, format_ts, parse_dec, parse_ts, AlertRow, AlertStatus, BacktestRow,
    MarketSnapshot, NewAlert, NewMarket, NewSignal, NewTrade, Severity, Side, SignalKind,
    SignalRow, TradeRow, WalletStatsRow,
};

pub const TRADE_CURSOR_PREFIX: &str = "cursor:trades:";
pub const SIGNAL_CURSOR_KEY: &str = "cursor:signals:last_trade_at";
pub const SCORING_CURSOR_KEY: &str = "cursor:scoring:last_signal_id";
pub const NOTIFIER_CURSOR_KEY: &str = "cursor:notifier:last_alert_ts";
pub const PROFILER_CURSOR_KEY: &str = "cursor:profiler:last_trade_at";

/// Alerts produced by the scoring aggregator carry this event type.
pub const SCORING_EVENT_TYPE: &str = "scoring";

pub fn trade_cursor_key(market_external_id: &str) -> String {
    format!("{TRADE_CURSOR_PREFIX}{market_external_id}")
}

// ---------------------------------------------------------------- app_state

pub fn get_state(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM app_state WHERE key = ?1", [key], |row| {
            row.get::<_, Option<String>>(0)
        })
        .optional()?;
    Ok(value.flatten())
}

pub fn set_state(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO app_state (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Timestamp cursor; unparsable stored values read as absent.
pub fn get_ts_cursor(conn: &Connection, key: &str) -> Result<Option<DateTime<Utc>>> {
    Ok(get_state(conn, key)?.and_then(|v| parse_ts(&v).ok()))
}

pub fn set_ts_cursor(conn: &Connection, key: &str, value: &DateTime<Utc>) -> Result<()> {
    set_state(conn, key, &format_ts(value))
}

pub fn get_int_cursor(conn: &Connection, key: &str) -> Result<Option<i64>> {
    Ok(get_state(conn, key)?.and_then(|v| v.parse().ok()))
}

pub fn set_int_cursor(conn: &Connection, key: &str, value: i64) -> Result<()> {
    set_state(conn, key, &value.to_string())
}

// ------------------------------------------------------------------ markets

/// Upsert the refreshed market set by external id and return snapshots for
/// every upserted market.
pub fn upsert_markets(
    conn: &Connection,
    markets: &[NewMarket],
) -> Result<HashMap<String, MarketSnapshot>> {
    let mut snapshots = HashMap::new();
    if markets.is_empty() {
        return Ok(snapshots);
    }

    {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO markets (external_id, name, category, status, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(external_id) DO UPDATE SET
                 name = excluded.name,
                 category = excluded.category,
                 status = excluded.status,
                 resolved_at = excluded.resolved_at",
        )?;
        for market in markets {
            stmt.execute(params![
                market.external_id,
                market.name,
                market.category,
                market.status.as_str(),
                market.resolved_at.as_ref().map(format_ts),
            ])?;
        }
    }

    let mut stmt =
        conn.prepare_cached("SELECT id, status FROM markets WHERE external_id = ?1")?;
    for market in markets {
        let row = stmt
            .query_row([&market.external_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?;
        if let Some((id, status)) = row {
            snapshots.insert(
                market.external_id.clone(),
                MarketSnapshot {
                    id,
                    external_id: market.external_id.clone(),
                    status: crate::store::models::MarketStatus::from_upstream(&status),
                },
            );
        }
    }
    Ok(snapshots)
}

/// Market display name and external id, for the notifier header.
pub fn market_header(conn: &Connection, market_id: i64) -> Result<Option<(String, String)>> {
    let row = conn
        .query_row(
            "SELECT name, external_id FROM markets WHERE id = ?1",
            [market_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;
    Ok(row)
}

// ------------------------------------------------------------------- trades

/// Insert normalized trades, ignoring duplicates under either unique key.
/// Returns the accepted row count and the max traded_at of the batch.
pub fn insert_trades(
    conn: &Connection,
    trades: &[NewTrade],
    markets: &HashMap<String, MarketSnapshot>,
) -> Result<(usize, Option<DateTime<Utc>>)> {
    if trades.is_empty() {
        return Ok((0, None));
    }

    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO trades
             (market_id, wallet_address, side, shares, price, traded_at, trade_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;

    let mut inserted = 0usize;
    let mut latest: Option<DateTime<Utc>> = None;
    for trade in trades {
        let Some(market) = markets.get(&trade.market_external_id) else {
            continue;
        };
        latest = Some(match latest {
            Some(current) if current >= trade.traded_at => current,
            _ => trade.traded_at,
        });
        inserted += stmt.execute(params![
            market.id,
            trade.wallet_address,
            trade.side.as_str(),
            format_dec(&trade.shares),
            format_dec(&trade.price),
            format_ts(&trade.traded_at),
            trade.trade_hash,
        ])?;
    }
    Ok((inserted, latest))
}

fn trade_from_raw(
    id: i64,
    market_id: i64,
    wallet: String,
    side: String,
    shares: String,
    price: String,
    traded_at: String,
) -> Result<TradeRow> {
    Ok(TradeRow {
        id,
        market_id,
        wallet_address: wallet,
        side: Side::from_str(&side)?,
        shares: parse_dec(&shares)?,
        price: parse_dec(&price)?,
        traded_at: parse_ts(&traded_at)?,
    })
}

/// Trades strictly after the cursor in (traded_at, id) order.
pub fn fetch_trades_after(
    conn: &Connection,
    cursor: Option<DateTime<Utc>>,
    limit: usize,
) -> Result<Vec<TradeRow>> {
    let floor = cursor.map(|c| format_ts(&c)).unwrap_or_default();
    let mut stmt = conn.prepare_cached(
        "SELECT id, market_id, wallet_address, side, shares, price, traded_at
         FROM trades
         WHERE traded_at > ?1
         ORDER BY traded_at, id
         LIMIT ?2",
    )?;
    let raw: Vec<(i64, i64, String, String, String, String, String)> = stmt
        .query_map(params![floor, limit as i64], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?
        .collect::<rusqlite::Result<_>>()?;

    raw.into_iter()
        .map(|(id, m, w, s, sh, p, t)| trade_from_raw(id, m, w, s, sh, p, t))
        .collect()
}

/// Trades strictly after `after` and no later than `upper`, in (traded_at,
/// id) order. The profiler uses this to pick up trades whose horizons have
/// fully elapsed.
pub fn fetch_trades_for_scoring(
    conn: &Connection,
    after: Option<DateTime<Utc>>,
    upper: &DateTime<Utc>,
    limit: usize,
) -> Result<Vec<TradeRow>> {
    let floor = after.map(|c| format_ts(&c)).unwrap_or_default();
    let mut stmt = conn.prepare_cached(
        "SELECT id, market_id, wallet_address, side, shares, price, traded_at
         FROM trades
         WHERE traded_at > ?1 AND traded_at <= ?2
         ORDER BY traded_at, id
         LIMIT ?3",
    )?;
    let raw: Vec<(i64, i64, String, String, String, String, String)> = stmt
        .query_map(params![floor, format_ts(upper), limit as i64], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?
        .collect::<rusqlite::Result<_>>()?;

    raw.into_iter()
        .map(|(id, m, w, s, sh, p, t)| trade_from_raw(id, m, w, s, sh, p, t))
        .collect()
}

/// Trades in a closed traded_at range, paged, in (traded_at, id) order.
pub fn fetch_trades_in_range(
    conn: &Connection,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
    offset: usize,
    limit: usize,
) -> Result<Vec<TradeRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, market_id, wallet_address, side, shares, price, traded_at
         FROM trades
         WHERE traded_at >= ?1 AND traded_at <= ?2
         ORDER BY traded_at, id
         LIMIT ?3 OFFSET ?4",
    )?;
    let raw: Vec<(i64, i64, String, String, String, String, String)> = stmt
        .query_map(
            params![format_ts(start), format_ts(end), limit as i64, offset as i64],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            },
        )?
        .collect::<rusqlite::Result<_>>()?;

    raw.into_iter()
        .map(|(id, m, w, s, sh, p, t)| trade_from_raw(id, m, w, s, sh, p, t))
        .collect()
}

/// First-seen timestamp and 24h-window trade count per wallet, over trades
/// strictly before `before`. Wallets with no prior trades are absent.
pub fn load_wallet_activity(
    conn: &Connection,
    wallets: &HashSet<String>,
    before: &DateTime<Utc>,
    recent_cutoff: &DateTime<Utc>,
) -> Result<HashMap<String, (DateTime<Utc>, u32)>> {
    let mut out = HashMap::new();
    if wallets.is_empty() {
        return Ok(out);
    }

    let placeholders = vec!["?"; wallets.len()].join(", ");
    let sql = format!(
        "SELECT wallet_address,
                MIN(traded_at),
                SUM(CASE WHEN traded_at >= ?1 THEN 1 ELSE 0 END)
         FROM trades
         WHERE traded_at < ?2 AND wallet_address IN ({placeholders})
         GROUP BY wallet_address"
    );

    let mut args: Vec<String> = Vec::with_capacity(wallets.len() + 2);
    args.push(format_ts(recent_cutoff));
    args.push(format_ts(before));
    args.extend(wallets.iter().cloned());

    let mut stmt = conn.prepare(&sql)?;
    let raw: Vec<(String, String, i64)> = stmt
        .query_map(params_from_iter(args), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<rusqlite::Result<_>>()?;

    for (wallet, first_seen, recent) in raw {
        out.insert(wallet, (parse_ts(&first_seen)?, recent.max(0) as u32));
    }
    Ok(out)
}

/// The last `depth` (traded_at, price) observations per market before
/// `before`, oldest first.
pub fn load_price_history(
    conn: &Connection,
    market_ids: &HashSet<i64>,
    before: &DateTime<Utc>,
    depth: usize,
) -> Result<HashMap<i64, VecDeque<(DateTime<Utc>, Decimal)>>> {
    let mut out = HashMap::new();
    let mut stmt = conn.prepare_cached(
        "SELECT traded_at, price FROM trades
         WHERE market_id = ?1 AND traded_at < ?2
         ORDER BY traded_at DESC, id DESC
         LIMIT ?3",
    )?;
    for &market_id in market_ids {
        let raw: Vec<(String, String)> = stmt
            .query_map(params![market_id, format_ts(before), depth as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<_>>()?;
        let mut history = VecDeque::with_capacity(depth);
        for (traded_at, price) in raw.into_iter().rev() {
            history.push_back((parse_ts(&traded_at)?, parse_dec(&price)?));
        }
        out.insert(market_id, history);
    }
    Ok(out)
}

/// (traded_at, price) points for one market inside a closed range.
pub fn prices_between(
    conn: &Connection,
    market_id: i64,
    lower: &DateTime<Utc>,
    upper: &DateTime<Utc>,
) -> Result<Vec<(DateTime<Utc>, Decimal)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT traded_at, price FROM trades
         WHERE market_id = ?1 AND traded_at >= ?2 AND traded_at <= ?3
         ORDER BY traded_at, id",
    )?;
    let raw: Vec<(String, String)> = stmt
        .query_map(params![market_id, format_ts(lower), format_ts(upper)], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<rusqlite::Result<_>>()?;
    raw.into_iter()
        .map(|(t, p)| Ok((parse_ts(&t)?, parse_dec(&p)?)))
        .collect()
}

/// Most recent trade price at or before `at`.
pub fn price_at_or_before(
    conn: &Connection,
    market_id: i64,
    at: &DateTime<Utc>,
) -> Result<Option<Decimal>> {
    let price: Option<String> = conn
        .query_row(
            "SELECT price FROM trades
             WHERE market_id = ?1 AND traded_at <= ?2
             ORDER BY traded_at DESC, id DESC
             LIMIT 1",
            params![market_id, format_ts(at)],
            |row| row.get(0),
        )
        .optional()?;
    price.map(|p| parse_dec(&p)).transpose()
}

// ------------------------------------------------------------ signal events

pub fn insert_signals(conn: &Connection, signals: &[NewSignal]) -> Result<usize> {
    if signals.is_empty() {
        return Ok(0);
    }
    let mut stmt = conn.prepare_cached(
        "INSERT INTO signal_events
             (market_id, wallet_address, side, signal_type, severity, score,
              details_json, observed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for signal in signals {
        stmt.execute(params![
            signal.market_id,
            signal.wallet_address,
            signal.side.as_str(),
            signal.kind.as_str(),
            signal.severity.as_str(),
            format_dec(&signal.score),
            serde_json::to_string(&signal.details)
                .map_err(|e| crate::error::Error::Serialization(e.to_string()))?,
            format_ts(&signal.observed_at),
        ])?;
    }
    Ok(signals.len())
}

/// Max signal id, optionally only counting ids above a floor. Used as the
/// "is there work?" gate for the scoring worker.
pub fn max_signal_id(conn: &Connection, above: Option<i64>) -> Result<Option<i64>> {
    let max: Option<i64> = match above {
        Some(floor) => conn.query_row(
            "SELECT MAX(id) FROM signal_events WHERE id > ?1",
            [floor],
            |row| row.get(0),
        )?,
        None => conn.query_row("SELECT MAX(id) FROM signal_events", [], |row| row.get(0))?,
    };
    Ok(max)
}

fn signal_from_raw(
    row: (
        i64,
        i64,
        String,
        String,
        String,
        String,
        String,
        Option<String>,
        Option<String>,
        String,
    ),
) -> Result<SignalRow> {
    let (id, market_id, wallet, side, kind, severity, score, details, observed_at, created_at) =
        row;
    Ok(SignalRow {
        id,
        market_id,
        wallet_address: wallet,
        side: Side::from_str(&side)?,
        kind: SignalKind::from_str(&kind)?,
        severity: Severity::from_str(&severity)?,
        score: parse_dec(&score)?,
        details: details
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| crate::error::Error::Serialization(e.to_string()))?
            .unwrap_or(serde_json::Value::Null),
        observed_at: observed_at.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&created_at)?,
    })
}

const SIGNAL_COLUMNS: &str = "id, market_id, wallet_address, side, signal_type, severity, \
                              score, details_json, observed_at, created_at";

type RawSignal = (
    i64,
    i64,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
);

fn raw_signal(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSignal> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

/// Every signal observed or created at/after `cutoff`, in id order.
pub fn signals_since(conn: &Connection, cutoff: &DateTime<Utc>) -> Result<Vec<SignalRow>> {
    let cutoff = format_ts(cutoff);
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SIGNAL_COLUMNS} FROM signal_events
         WHERE observed_at >= ?1 OR created_at >= ?1
         ORDER BY id"
    ))?;
    let raw: Vec<RawSignal> = stmt
        .query_map([cutoff], raw_signal)?
        .collect::<rusqlite::Result<_>>()?;
    raw.into_iter().map(signal_from_raw).collect()
}

/// Most recent signals on one (market, side), newest observation first.
pub fn recent_signals_for(
    conn: &Connection,
    market_id: i64,
    side: Side,
    limit: usize,
) -> Result<Vec<SignalRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SIGNAL_COLUMNS} FROM signal_events
         WHERE market_id = ?1 AND side = ?2
         ORDER BY observed_at DESC, created_at DESC
         LIMIT ?3"
    ))?;
    let raw: Vec<RawSignal> = stmt
        .query_map(params![market_id, side.as_str(), limit as i64], raw_signal)?
        .collect::<rusqlite::Result<_>>()?;
    raw.into_iter().map(signal_from_raw).collect()
}

// ------------------------------------------------------------------- alerts

/// Upsert alerts under the (market, side, event_type) identity. An existing
/// row keeps its id; the update path fires the updated_at trigger, which is
/// what re-surfaces the alert to the notifier.
pub fn upsert_alerts(conn: &Connection, alerts: &[NewAlert]) -> Result<usize> {
    if alerts.is_empty() {
        return Ok(0);
    }
    let mut stmt = conn.prepare_cached(
        "INSERT INTO alerts (market_id, side, event_type, status, score, why_json, message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(market_id, side, event_type) DO UPDATE SET
             status = excluded.status,
             score = excluded.score,
             why_json = excluded.why_json,
             message = excluded.message",
    )?;
    for alert in alerts {
        stmt.execute(params![
            alert.market_id,
            alert.side.as_str(),
            alert.event_type,
            alert.status.as_str(),
            format_dec(&alert.score),
            serde_json::to_string(&alert.why)
                .map_err(|e| crate::error::Error::Serialization(e.to_string()))?,
            alert.message,
        ])?;
    }
    Ok(alerts.len())
}

fn alert_from_raw(
    row: (
        i64,
        i64,
        String,
        String,
        String,
        String,
        Option<String>,
        Option<String>,
        String,
        String,
    ),
) -> Result<AlertRow> {
    let (id, market_id, side, event_type, status, score, why, message, created_at, updated_at) =
        row;
    Ok(AlertRow {
        id,
        market_id,
        side: Side::from_str(&side)?,
        event_type,
        status: AlertStatus::from_str(&status)?,
        score: parse_dec(&score)?,
        why: why
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| crate::error::Error::Serialization(e.to_string()))?
            .unwrap_or(serde_json::Value::Null),
        message,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

const ALERT_COLUMNS: &str = "id, market_id, side, event_type, status, score, why_json, \
                             message, created_at, updated_at";

type RawAlert = (
    i64,
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
);

fn raw_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAlert> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

/// Alerts touched after the cursor, oldest update first.
pub fn alerts_updated_after(
    conn: &Connection,
    cursor: Option<DateTime<Utc>>,
    limit: usize,
) -> Result<Vec<AlertRow>> {
    let floor = cursor.map(|c| format_ts(&c)).unwrap_or_default();
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {ALERT_COLUMNS} FROM alerts
         WHERE updated_at > ?1
         ORDER BY updated_at, id
         LIMIT ?2"
    ))?;
    let raw: Vec<RawAlert> = stmt
        .query_map(params![floor, limit as i64], raw_alert)?
        .collect::<rusqlite::Result<_>>()?;
    raw.into_iter().map(alert_from_raw).collect()
}

/// Every alert, oldest first. Used by the offline backtest pass.
pub fn all_alerts(conn: &Connection) -> Result<Vec<AlertRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {ALERT_COLUMNS} FROM alerts ORDER BY created_at, id"
    ))?;
    let raw: Vec<RawAlert> = stmt.query_map([], raw_alert)?.collect::<rusqlite::Result<_>>()?;
    raw.into_iter().map(alert_from_raw).collect()
}

// ------------------------------------------------------------- wallet stats

pub fn get_wallet_stats(conn: &Connection, wallet: &str) -> Result<Option<WalletStatsRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT wallet_address, total_trades, evaluated_trades, correct_15m, correct_1h,
                correct_4h, accuracy_score, avg_delta_when_correct, total_notional,
                current_streak, best_streak
         FROM wallet_stats WHERE wallet_address = ?1",
    )?;
    let raw = stmt
        .query_row([wallet], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, i64>(9)?,
                row.get::<_, i64>(10)?,
            ))
        })
        .optional()?;

    let Some((
        wallet_address,
        total_trades,
        evaluated_trades,
        correct_15m,
        correct_1h,
        correct_4h,
        accuracy,
        avg_delta,
        total_notional,
        current_streak,
        best_streak,
    )) = raw
    else {
        return Ok(None);
    };

    Ok(Some(WalletStatsRow {
        wallet_address,
        total_trades,
        evaluated_trades,
        correct_15m,
        correct_1h,
        correct_4h,
        accuracy_score: accuracy.as_deref().map(parse_dec).transpose()?,
        avg_delta_when_correct: avg_delta.as_deref().map(parse_dec).transpose()?,
        total_notional: total_notional
            .as_deref()
            .map(parse_dec)
            .transpose()?
            .unwrap_or_default(),
        current_streak,
        best_streak,
    }))
}

/// Stats rows for a wallet set; callers filter qualification on `Decimal`.
pub fn load_wallet_stats_for(
    conn: &Connection,
    wallets: &HashSet<String>,
) -> Result<HashMap<String, WalletStatsRow>> {
    let mut out = HashMap::new();
    for wallet in wallets {
        if let Some(stats) = get_wallet_stats(conn, wallet)? {
            out.insert(wallet.clone(), stats);
        }
    }
    Ok(out)
}

/// Full-row upsert; the profiler computes the merged row inside the same
/// transaction it read the previous one in.
pub fn upsert_wallet_stats(conn: &Connection, stats: &WalletStatsRow) -> Result<()> {
    conn.execute(
        "INSERT INTO wallet_stats
             (wallet_address, total_trades, evaluated_trades, correct_15m, correct_1h,
              correct_4h, accuracy_score, avg_delta_when_correct, total_notional,
              current_streak, best_streak)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(wallet_address) DO UPDATE SET
             total_trades = excluded.total_trades,
             evaluated_trades = excluded.evaluated_trades,
             correct_15m = excluded.correct_15m,
             correct_1h = excluded.correct_1h,
             correct_4h = excluded.correct_4h,
             accuracy_score = excluded.accuracy_score,
             avg_delta_when_correct = excluded.avg_delta_when_correct,
             total_notional = excluded.total_notional,
             current_streak = excluded.current_streak,
             best_streak = excluded.best_streak",
        params![
            stats.wallet_address,
            stats.total_trades,
            stats.evaluated_trades,
            stats.correct_15m,
            stats.correct_1h,
            stats.correct_4h,
            stats.accuracy_score.as_ref().map(format_dec),
            stats.avg_delta_when_correct.as_ref().map(format_dec),
            format_dec(&stats.total_notional),
            stats.current_streak,
            stats.best_streak,
        ],
    )?;
    Ok(())
}

// ----------------------------------------------------------------- backtest

pub fn upsert_backtest(conn: &Connection, row: &BacktestRow) -> Result<()> {
    conn.execute(
        "INSERT INTO backtest_results
             (alert_id, market_id, side, score, alert_time, price_t0, price_15m,
              price_1h, price_4h, delta_15m, delta_1h, delta_4h)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(alert_id) DO UPDATE SET
             price_t0 = excluded.price_t0,
             price_15m = excluded.price_15m,
             price_1h = excluded.price_1h,
             price_4h = excluded.price_4h,
             delta_15m = excluded.delta_15m,
             delta_1h = excluded.delta_1h,
             delta_4h = excluded.delta_4h",
        params![
            row.alert_id,
            row.market_id,
            row.side.as_str(),
            format_dec(&row.score),
            format_ts(&row.alert_time),
            row.price_t0.as_ref().map(format_dec),
            row.price_15m.as_ref().map(format_dec),
            row.price_1h.as_ref().map(format_dec),
            row.price_4h.as_ref().map(format_dec),
            row.delta_15m.as_ref().map(format_dec),
            row.delta_1h.as_ref().map(format_dec),
            row.delta_4h.as_ref().map(format_dec),
        ],
    )?;
    Ok(())
}

// -------------------------------------------------------------- maintenance

/// Drop everything derived from trades so the signal and scoring stages can
/// be re-run from scratch (replay harness).
pub fn reset_derived(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM signal_events", [])?;
    conn.execute("DELETE FROM alerts", [])?;
    conn.execute(
        "DELETE FROM app_state WHERE key IN (?1, ?2)",
        params![SIGNAL_CURSOR_KEY, SCORING_CURSOR_KEY],
    )?;
    Ok(())
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    // Table names come from internal callers only.
    let count: i64 =
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(count)
}
