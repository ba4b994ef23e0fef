//! Weighted aggregation of recent signals into per-(market, side) alerts.
//!
//! The pass is idempotent: the same signal set always derives the same
//! (status, score) per group, and the alert upsert is keyed on the
//! (market, side, event_type) unique index.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

use crate::error::Result;
use crate::store::models::{format_dec, format_ts, AlertStatus, NewAlert, Severity, Side, SignalKind, SignalRow};
use crate::store::queries;

const EXAMPLE_LIMIT: usize = 5;

pub struct ScoringAggregator {
    window: Duration,
    weights: HashMap<SignalKind, Decimal>,
    severity_multipliers: HashMap<Severity, Decimal>,
    bonus_per_extra_type: Decimal,
    high_threshold: Decimal,
    watch_threshold: Decimal,
}

impl ScoringAggregator {
    pub fn new(window: Duration) -> Self {
        let weights = HashMap::from([
            (SignalKind::FreshWalletBigSize, dec!(5.0)),
            (SignalKind::LowActivityWalletBigSize, dec!(3.0)),
            (SignalKind::RepeatEntries, dec!(2.0)),
            (SignalKind::ThinMarketImpact, dec!(4.0)),
            (SignalKind::Clustering, dec!(3.5)),
            // highest weight: historically accurate wallets
            (SignalKind::EarlyPositioning, dec!(6.0)),
        ]);
        let severity_multipliers = HashMap::from([
            (Severity::High, dec!(2.0)),
            (Severity::Medium, dec!(1.0)),
            (Severity::Low, dec!(0.5)),
        ]);
        Self {
            window,
            weights,
            severity_multipliers,
            bonus_per_extra_type: dec!(2.5),
            high_threshold: dec!(12.0),
            watch_threshold: dec!(4.0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn score_signal(&self, signal: &SignalRow) -> Decimal {
        let weight = self.weights.get(&signal.kind).copied().unwrap_or(Decimal::ONE);
        let multiplier = self
            .severity_multipliers
            .get(&signal.severity)
            .copied()
            .unwrap_or(Decimal::ONE);
        weight * multiplier
    }

    fn build_why(&self, signals: &[&SignalRow], score: Decimal) -> serde_json::Value {
        let mut ordered: Vec<&SignalRow> = signals.to_vec();
        ordered.sort_by_key(|s| (s.effective_at(), s.id));

        let mut counts: BTreeMap<&'static str, u32> = BTreeMap::new();
        let mut example_wallets: Vec<String> = Vec::new();
        let mut examples = Vec::new();
        for signal in &ordered {
            *counts.entry(signal.kind.as_str()).or_insert(0) += 1;
            if example_wallets.len() < EXAMPLE_LIMIT
                && !example_wallets.contains(&signal.wallet_address)
            {
                example_wallets.push(signal.wallet_address.clone());
            }
            if examples.len() < EXAMPLE_LIMIT {
                examples.push(json!({
                    "signal_type": signal.kind.as_str(),
                    "wallet": signal.wallet_address,
                    "side": signal.side.as_str(),
                    "severity": signal.severity.as_str(),
                    "observed_at": format_ts(&signal.effective_at()),
                }));
            }
        }

        json!({
            "score": format_dec(&score),
            "counts_by_signal": counts,
            "distinct_types": counts.keys().collect::<Vec<_>>(),
            "example_wallets": example_wallets,
            "examples": examples,
            "window_hours": self.window.num_hours(),
        })
    }

    /// Pure aggregation over a signal set. Groups below the watch threshold
    /// are dropped.
    pub fn aggregate(&self, signals: &[SignalRow]) -> Vec<NewAlert> {
        let mut grouped: BTreeMap<(i64, Side), Vec<&SignalRow>> = BTreeMap::new();
        for signal in signals {
            grouped
                .entry((signal.market_id, signal.side))
                .or_default()
                .push(signal);
        }

        let mut alerts = Vec::new();
        for ((market_id, side), members) in grouped {
            let base: Decimal = members.iter().map(|s| self.score_signal(s)).sum();
            let distinct_types = members
                .iter()
                .map(|s| s.kind)
                .collect::<std::collections::HashSet<_>>()
                .len();
            let bonus =
                self.bonus_per_extra_type * Decimal::from(distinct_types.saturating_sub(1));
            let score = base + bonus;
            if score < self.watch_threshold {
                continue;
            }
            let status = if score >= self.high_threshold {
                AlertStatus::High
            } else {
                AlertStatus::Watch
            };
            alerts.push(NewAlert {
                market_id,
                side,
                event_type: queries::SCORING_EVENT_TYPE.into(),
                status,
                score,
                why: self.build_why(&members, score),
                message: format!("score={score:.2} status={status}"),
            });
        }
        alerts
    }

    /// One full pass: read the window, aggregate, upsert. Returns the number
    /// of alerts written.
    pub fn process(&self, conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.window;
        let signals = queries::signals_since(conn, &cutoff)?;
        let alerts = self.aggregate(&signals);
        queries::upsert_alerts(conn, &alerts)
    }
}

impl Default for ScoringAggregator {
    fn default() -> Self {
        Self::new(Duration::hours(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn signal(
        id: i64,
        kind: SignalKind,
        severity: Severity,
        wallet: &str,
        observed_at: DateTime<Utc>,
    ) -> SignalRow {
        SignalRow {
            id,
            market_id: 1,
            wallet_address: wallet.into(),
            side: Side::Buy,
            kind,
            severity,
            score: dec!(1),
            details: serde_json::Value::Null,
            observed_at: Some(observed_at),
            created_at: observed_at,
        }
    }

    #[test]
    fn test_group_score_with_distinct_type_bonus() {
        let aggregator = ScoringAggregator::default();
        let at = Utc.with_ymd_and_hms(2026, 1, 4, 12, 0, 0).unwrap();
        // two fresh-wallet highs and one clustering medium:
        // 5*2 + 5*2 + 3.5*1 + 2.5*(2-1) = 26.0
        let signals = vec![
            signal(1, SignalKind::FreshWalletBigSize, Severity::High, "w1", at),
            signal(2, SignalKind::FreshWalletBigSize, Severity::High, "w2", at),
            signal(3, SignalKind::Clustering, Severity::Medium, "w3", at),
        ];

        let alerts = aggregator.aggregate(&signals);
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.score, dec!(26.0));
        assert_eq!(alert.status, AlertStatus::High);
        assert_eq!(alert.message, "score=26.00 status=high");
        assert_eq!(alert.why["counts_by_signal"]["FRESH_WALLET_BIG_SIZE"], 2);
        assert_eq!(alert.why["example_wallets"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_groups_below_watch_threshold_are_dropped() {
        let aggregator = ScoringAggregator::default();
        let at = Utc.with_ymd_and_hms(2026, 1, 4, 12, 0, 0).unwrap();
        // a single low repeat: 2 * 0.5 = 1.0 < 4.0
        let signals = vec![signal(1, SignalKind::RepeatEntries, Severity::Low, "w1", at)];
        assert!(aggregator.aggregate(&signals).is_empty());
    }

    #[test]
    fn test_watch_band() {
        let aggregator = ScoringAggregator::default();
        let at = Utc.with_ymd_and_hms(2026, 1, 4, 12, 0, 0).unwrap();
        // one clustering medium: 3.5, below watch; add a repeat medium: +2.0
        // and the distinct-type bonus 2.5 -> 8.0, watch band
        let signals = vec![
            signal(1, SignalKind::Clustering, Severity::Medium, "w1", at),
            signal(2, SignalKind::RepeatEntries, Severity::Medium, "w1", at),
        ];
        let alerts = aggregator.aggregate(&signals);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].score, dec!(8.0));
        assert_eq!(alerts[0].status, AlertStatus::Watch);
    }

    #[test]
    fn test_aggregate_is_idempotent_per_signal_set() {
        let aggregator = ScoringAggregator::default();
        let at = Utc.with_ymd_and_hms(2026, 1, 4, 12, 0, 0).unwrap();
        let signals = vec![
            signal(1, SignalKind::FreshWalletBigSize, Severity::High, "w1", at),
            signal(2, SignalKind::Clustering, Severity::Medium, "w2", at),
        ];
        let first = aggregator.aggregate(&signals);
        let second = aggregator.aggregate(&signals);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].score, second[0].score);
        assert_eq!(first[0].status, second[0].status);
        assert_eq!(first[0].why, second[0].why);
    }
}
