//! End-to-end pipeline tests over an in-memory store: trades flow through
//! the signal engine and scoring aggregator into alerts, the notifier
//! dispatches them, and a full replay reproduces identical output.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use polywatch::error::Result;
use polywatch::notifier::AlertSink;
use polywatch::scoring::ScoringAggregator;
use polywatch::signals::{DetectorConfig, SignalEngine};
use polywatch::store::models::{
    format_dec, AlertStatus, MarketStatus, NewMarket, NewTrade, Side, SignalKind, WalletStatsRow,
};
use polywatch::store::{queries, Store};
use polywatch::{notifier, scoring, signals};

// Splits the tape into two batches: the burst wallets, then the repeats.
const BATCH_SIZE: usize = 4;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 4, 12, 0, 0).unwrap()
}

fn trade(wallet: &str, shares: Decimal, price: Decimal, offset_secs: i64) -> NewTrade {
    NewTrade {
        market_external_id: "m1".into(),
        wallet_address: wallet.into(),
        side: Side::Buy,
        shares,
        price,
        traded_at: base_time() + Duration::seconds(offset_secs),
        trade_hash: None,
    }
}

/// Seed one market, a smart wallet, and a trade tape that trips every
/// detector at least once.
fn seed(store: &Store) {
    let markets = store
        .with_tx(|tx| {
            queries::upsert_markets(
                tx,
                &[NewMarket {
                    external_id: "m1".into(),
                    name: "Test Market".into(),
                    category: Some("politics".into()),
                    status: MarketStatus::Active,
                    resolved_at: None,
                }],
            )
        })
        .unwrap();

    store
        .with_tx(|tx| {
            queries::upsert_wallet_stats(
                tx,
                &WalletStatsRow {
                    wallet_address: "w_smart".into(),
                    total_trades: 20,
                    evaluated_trades: 15,
                    correct_15m: 10,
                    correct_1h: 11,
                    correct_4h: 12,
                    accuracy_score: Some(dec!(0.75)),
                    avg_delta_when_correct: Some(dec!(0.08)),
                    total_notional: dec!(5000),
                    current_streak: 3,
                    best_streak: 5,
                },
            )
        })
        .unwrap();

    let tape = vec![
        // fresh whale: notional 1200
        trade("w_new", dec!(2000), dec!(0.6), 0),
        // two more wallets inside the clustering window
        trade("w_a", dec!(600), dec!(0.5), 60),
        trade("w_b", dec!(600), dec!(0.5), 120),
        // smart wallet position, notional 300
        trade("w_smart", dec!(500), dec!(0.6), 180),
        // repeated entries by one wallet on the same side
        trade("w1", dec!(10), dec!(0.5), 240),
        trade("w1", dec!(10), dec!(0.5), 360),
        trade("w1", dec!(10), dec!(0.5), 480),
    ];
    let (inserted, _) = store
        .with_tx(|tx| queries::insert_trades(tx, &tape, &markets))
        .unwrap();
    assert_eq!(inserted, tape.len());
}

fn drain_signal_engine(store: &Store, engine: &SignalEngine) {
    while signals::worker::run_once(store, engine, BATCH_SIZE)
        .unwrap()
        .is_some()
    {}
}

/// Stable projection of the emitted signal stream for equality checks.
fn signal_snapshot(store: &Store) -> Vec<(String, String, String, String, String, String)> {
    let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
    store
        .with_conn(|c| queries::signals_since(c, &epoch))
        .unwrap()
        .iter()
        .map(|s| {
            (
                s.kind.as_str().to_string(),
                s.wallet_address.clone(),
                s.side.as_str().to_string(),
                s.observed_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                format_dec(&s.score),
                s.details.to_string(),
            )
        })
        .collect()
}

fn alert_snapshot(store: &Store) -> Vec<(i64, String, String, String)> {
    store
        .with_conn(|c| queries::alerts_updated_after(c, None, 100))
        .unwrap()
        .iter()
        .map(|a| {
            (
                a.market_id,
                a.side.as_str().to_string(),
                a.status.as_str().to_string(),
                format_dec(&a.score),
            )
        })
        .collect()
}

#[test]
fn pipeline_emits_signals_and_one_alert_per_market_side() {
    let store = Store::open_in_memory().unwrap();
    seed(&store);

    let engine = SignalEngine::new(DetectorConfig::default());
    drain_signal_engine(&store, &engine);

    let signals = signal_snapshot(&store);
    let kinds: std::collections::HashSet<&str> =
        signals.iter().map(|s| s.0.as_str()).collect();
    assert!(kinds.contains(SignalKind::FreshWalletBigSize.as_str()));
    assert!(kinds.contains(SignalKind::LowActivityWalletBigSize.as_str()));
    assert!(kinds.contains(SignalKind::Clustering.as_str()));
    assert!(kinds.contains(SignalKind::EarlyPositioning.as_str()));
    assert!(kinds.contains(SignalKind::RepeatEntries.as_str()));

    // signal cursor sits at the last trade
    let cursor = store
        .with_conn(|c| queries::get_ts_cursor(c, queries::SIGNAL_CURSOR_KEY))
        .unwrap();
    assert_eq!(cursor, Some(base_time() + Duration::seconds(480)));

    // scoring produces exactly one alert for (m1, buy)
    let aggregator = ScoringAggregator::default();
    let now = base_time() + Duration::minutes(10);
    let outcome = scoring::worker::run_once(&store, &aggregator, now).unwrap();
    assert!(outcome.is_some());

    let alerts = alert_snapshot(&store);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].1, "buy");
    assert_eq!(alerts[0].2, AlertStatus::High.as_str());

    // no new signals: the cursor gate reports nothing to do
    assert!(scoring::worker::run_once(&store, &aggregator, now)
        .unwrap()
        .is_none());

    // a second full aggregation pass changes neither status nor score
    let before = alert_snapshot(&store);
    store.with_tx(|tx| aggregator.process(tx, now)).unwrap();
    assert_eq!(before, alert_snapshot(&store));
}

#[test]
fn replay_reproduces_identical_signals_and_alerts() {
    let store = Store::open_in_memory().unwrap();
    seed(&store);

    let engine = SignalEngine::new(DetectorConfig::default());
    let aggregator = ScoringAggregator::default();
    let now = base_time() + Duration::minutes(10);

    drain_signal_engine(&store, &engine);
    scoring::worker::run_once(&store, &aggregator, now).unwrap();
    let signals_first = signal_snapshot(&store);
    let alerts_first = alert_snapshot(&store);
    assert!(!signals_first.is_empty());
    assert!(!alerts_first.is_empty());

    store.with_tx(|tx| queries::reset_derived(tx)).unwrap();
    assert!(signal_snapshot(&store).is_empty());
    assert!(alert_snapshot(&store).is_empty());

    drain_signal_engine(&store, &engine);
    scoring::worker::run_once(&store, &aggregator, now).unwrap();

    assert_eq!(signals_first, signal_snapshot(&store));
    assert_eq!(alerts_first, alert_snapshot(&store));
}

struct CapturingSink {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl AlertSink for CapturingSink {
    fn name(&self) -> &'static str {
        "capturing"
    }

    async fn send(&self, text: &str) -> Result<()> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn notifier_dispatches_and_renotifies_on_updates() {
    let store = Store::open_in_memory().unwrap();
    seed(&store);

    let engine = SignalEngine::new(DetectorConfig::default());
    let aggregator = ScoringAggregator::default();
    let now = base_time() + Duration::minutes(10);
    drain_signal_engine(&store, &engine);
    scoring::worker::run_once(&store, &aggregator, now).unwrap();

    let sink = CapturingSink { messages: Mutex::new(Vec::new()) };

    let first = notifier::worker::run_once(&store, &sink, 50).await.unwrap();
    let (sent, cursor) = first.expect("one alert to dispatch");
    assert_eq!(sent, 1);
    {
        let messages = sink.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Test Market"));
        assert!(messages[0].contains("BUY"));
        assert!(messages[0].contains("reasons:"));
    }

    // cursor advanced: nothing new to send
    assert!(notifier::worker::run_once(&store, &sink, 50)
        .await
        .unwrap()
        .is_none());
    let stored = store
        .with_conn(|c| queries::get_ts_cursor(c, queries::NOTIFIER_CURSOR_KEY))
        .unwrap();
    assert_eq!(stored, Some(cursor));

    // an aggregator pass that rewrites the same content still bumps
    // updated_at, and that intentionally re-notifies
    std::thread::sleep(std::time::Duration::from_millis(5));
    store.with_tx(|tx| aggregator.process(tx, now)).unwrap();
    let again = notifier::worker::run_once(&store, &sink, 50).await.unwrap();
    assert!(again.is_some());
    assert_eq!(sink.messages.lock().unwrap().len(), 2);
}

#[test]
fn ingestion_shaped_reseed_is_idempotent_and_cursors_monotone() {
    let store = Store::open_in_memory().unwrap();
    seed(&store);

    // same tape again: zero new rows
    let markets = store
        .with_tx(|tx| {
            queries::upsert_markets(
                tx,
                &[NewMarket {
                    external_id: "m1".into(),
                    name: "Test Market".into(),
                    category: Some("politics".into()),
                    status: MarketStatus::Active,
                    resolved_at: None,
                }],
            )
        })
        .unwrap();
    let tape: Vec<NewTrade> = vec![
        trade("w_new", dec!(2000), dec!(0.6), 0),
        trade("w_a", dec!(600), dec!(0.5), 60),
    ];
    let (inserted, _) = store
        .with_tx(|tx| queries::insert_trades(tx, &tape, &markets))
        .unwrap();
    assert_eq!(inserted, 0);

    // cursors only move forward as batches drain
    let engine = SignalEngine::new(DetectorConfig::default());
    let mut cursors: Vec<DateTime<Utc>> = Vec::new();
    while let Some(summary) =
        signals::worker::run_once(&store, &engine, BATCH_SIZE).unwrap()
    {
        cursors.push(summary.cursor);
    }
    assert!(cursors.windows(2).all(|w| w[0] <= w[1]));

    // market upsert keeps a single row per external id
    let markets_again = store
        .with_tx(|tx| {
            queries::upsert_markets(
                tx,
                &[NewMarket {
                    external_id: "m1".into(),
                    name: "Renamed Market".into(),
                    category: None,
                    status: MarketStatus::Closed,
                    resolved_at: None,
                }],
            )
        })
        .unwrap();
    let snapshot = &markets_again["m1"];
    assert_eq!(snapshot.status, MarketStatus::Closed);
    let ids: HashMap<String, i64> =
        markets_again.iter().map(|(k, v)| (k.clone(), v.id)).collect();
    assert_eq!(ids["m1"], markets["m1"].id);
}
