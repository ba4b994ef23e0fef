//! Embedded store shared by every worker.
//!
//! One SQLite connection behind a mutex; workers are serial loops, so the
//! lock is only ever contested across stages. Multi-row writes and their
//! cursor updates run inside a single transaction via [`Store::with_tx`].

pub mod models;
pub mod queries;
mod schema;

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, Transaction};
use tracing::info;

use crate::error::Result;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.execute_batch(schema::SCHEMA_SQL)?;
        info!(path = %path, "store opened");
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// In-memory store, used by tests and the replay harness.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Run read-only (or single-statement) work against the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside one transaction; commit on Ok, roll back on Err.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::models::*;
    use super::queries;
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn seeded_market(store: &Store) -> HashMap<String, MarketSnapshot> {
        store
            .with_tx(|tx| {
                queries::upsert_markets(
                    tx,
                    &[NewMarket {
                        external_id: "m1".into(),
                        name: "Test Market".into(),
                        category: None,
                        status: MarketStatus::Active,
                        resolved_at: None,
                    }],
                )
            })
            .unwrap()
    }

    fn trade(wallet: &str, secs: u32) -> NewTrade {
        NewTrade {
            market_external_id: "m1".into(),
            wallet_address: wallet.into(),
            side: Side::Buy,
            shares: dec!(100),
            price: dec!(0.5),
            traded_at: Utc.with_ymd_and_hms(2026, 1, 4, 12, 0, secs).unwrap(),
            trade_hash: None,
        }
    }

    #[test]
    fn test_trade_insert_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let markets = seeded_market(&store);
        let trades = vec![trade("w1", 0), trade("w1", 1)];

        let (first, latest) = store
            .with_tx(|tx| queries::insert_trades(tx, &trades, &markets))
            .unwrap();
        assert_eq!(first, 2);
        assert_eq!(latest.unwrap(), trades[1].traded_at);

        let (second, _) = store
            .with_tx(|tx| queries::insert_trades(tx, &trades, &markets))
            .unwrap();
        assert_eq!(second, 0);
        assert_eq!(
            store.with_conn(|c| queries::count_rows(c, "trades")).unwrap(),
            2
        );
    }

    #[test]
    fn test_trade_hash_dedupes_independently() {
        let store = Store::open_in_memory().unwrap();
        let markets = seeded_market(&store);
        let mut a = trade("w1", 0);
        a.trade_hash = Some("0xabc".into());
        let mut b = trade("w2", 30);
        b.trade_hash = Some("0xabc".into());

        let (inserted, _) = store
            .with_tx(|tx| queries::insert_trades(tx, &[a, b], &markets))
            .unwrap();
        assert_eq!(inserted, 1);
    }

    #[test]
    fn test_alert_upsert_keeps_single_row() {
        let store = Store::open_in_memory().unwrap();
        let markets = seeded_market(&store);
        let market_id = markets["m1"].id;

        let alert = NewAlert {
            market_id,
            side: Side::Buy,
            event_type: queries::SCORING_EVENT_TYPE.into(),
            status: AlertStatus::Watch,
            score: dec!(6.5),
            why: serde_json::json!({"score": "6.5"}),
            message: "score=6.50 status=watch".into(),
        };
        store.with_tx(|tx| queries::upsert_alerts(tx, &[alert.clone()])).unwrap();

        let mut bumped = alert;
        bumped.status = AlertStatus::High;
        bumped.score = dec!(14);
        store.with_tx(|tx| queries::upsert_alerts(tx, &[bumped])).unwrap();

        let alerts = store
            .with_conn(|c| queries::alerts_updated_after(c, None, 10))
            .unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].status, AlertStatus::High);
        assert_eq!(alerts[0].score, dec!(14));
    }

    #[test]
    fn test_cursor_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let ts = Utc.with_ymd_and_hms(2026, 1, 4, 12, 0, 0).unwrap();
        store
            .with_tx(|tx| queries::set_ts_cursor(tx, queries::SIGNAL_CURSOR_KEY, &ts))
            .unwrap();
        let read = store
            .with_conn(|c| queries::get_ts_cursor(c, queries::SIGNAL_CURSOR_KEY))
            .unwrap();
        assert_eq!(read, Some(ts));

        store
            .with_tx(|tx| queries::set_int_cursor(tx, queries::SCORING_CURSOR_KEY, 42))
            .unwrap();
        assert_eq!(
            store
                .with_conn(|c| queries::get_int_cursor(c, queries::SCORING_CURSOR_KEY))
                .unwrap(),
            Some(42)
        );
    }

    #[test]
    fn test_open_on_disk_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("polywatch.db");
        let path = path.to_str().unwrap();

        {
            let store = Store::open(path).unwrap();
            let markets = seeded_market(&store);
            let (inserted, _) = store
                .with_tx(|tx| queries::insert_trades(tx, &[trade("w1", 0)], &markets))
                .unwrap();
            assert_eq!(inserted, 1);
            let ts = Utc.with_ymd_and_hms(2026, 1, 4, 12, 0, 0).unwrap();
            store
                .with_tx(|tx| queries::set_ts_cursor(tx, queries::SIGNAL_CURSOR_KEY, &ts))
                .unwrap();
        }

        // reopening applies the schema idempotently and sees the same rows
        let reopened = Store::open(path).unwrap();
        assert_eq!(
            reopened.with_conn(|c| queries::count_rows(c, "trades")).unwrap(),
            1
        );
        let cursor = reopened
            .with_conn(|c| queries::get_ts_cursor(c, queries::SIGNAL_CURSOR_KEY))
            .unwrap();
        assert_eq!(cursor, Some(Utc.with_ymd_and_hms(2026, 1, 4, 12, 0, 0).unwrap()));

        // the file-backed connection really runs in WAL mode
        let journal_mode: String = reopened
            .with_conn(|c| {
                Ok(c.query_row("PRAGMA journal_mode", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_wallet_activity_window() {
        let store = Store::open_in_memory().unwrap();
        let markets = seeded_market(&store);
        let now = Utc.with_ymd_and_hms(2026, 1, 4, 12, 0, 0).unwrap();

        let mut old = trade("w1", 0);
        old.traded_at = now - chrono::Duration::days(3);
        let mut recent = trade("w1", 1);
        recent.traded_at = now - chrono::Duration::hours(2);
        store
            .with_tx(|tx| queries::insert_trades(tx, &[old.clone(), recent], &markets))
            .unwrap();

        let wallets = std::collections::HashSet::from(["w1".to_string()]);
        let cutoff = now - chrono::Duration::hours(24);
        let activity = store
            .with_conn(|c| queries::load_wallet_activity(c, &wallets, &now, &cutoff))
            .unwrap();
        let (first_seen, recent_count) = activity["w1"];
        assert_eq!(first_seen, old.traded_at);
        assert_eq!(recent_count, 1);
    }
}
