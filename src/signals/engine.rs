//! Signal engine: stateful detectors over one timestamp-ordered trade batch.
//!
//! Pre-batch history (wallet first-seen, 24h recency, market price rings,
//! qualifying wallet stats) is loaded read-only before the batch's earliest
//! timestamp; rolling windows inside the batch are owned deques. Given the
//! same ordered trades and the same wallet stats, the engine emits the same
//! signal sequence.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use serde_json::json;

use crate::error::Result;
use crate::store::models::{
    format_dec, NewSignal, Severity, Side, SignalKind, TradeRow, WalletStatsRow,
};
use crate::store::queries;

/// Detector thresholds. Monetary thresholds are decimals; windows are
/// wall-clock durations.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_big_notional")]
    pub big_notional: Decimal,
    #[serde(default = "default_low_activity_window_hours")]
    pub low_activity_window_hours: i64,
    #[serde(default = "default_low_activity_max_trades")]
    pub low_activity_max_trades: u32,
    #[serde(default = "default_repeat_window_minutes")]
    pub repeat_window_minutes: i64,
    #[serde(default = "default_repeat_min_count")]
    pub repeat_min_count: usize,
    #[serde(default = "default_impact_deviation")]
    pub impact_deviation: Decimal,
    #[serde(default = "default_impact_min_notional")]
    pub impact_min_notional: Decimal,
    #[serde(default = "default_cluster_window_minutes")]
    pub cluster_window_minutes: i64,
    #[serde(default = "default_cluster_min_wallets")]
    pub cluster_min_wallets: usize,
    #[serde(default = "default_cluster_min_notional")]
    pub cluster_min_notional_per_wallet: Decimal,
    #[serde(default = "default_smart_min_accuracy")]
    pub smart_min_accuracy: Decimal,
    #[serde(default = "default_smart_high_accuracy")]
    pub smart_high_accuracy: Decimal,
    #[serde(default = "default_smart_min_trades")]
    pub smart_min_trades: i64,
    #[serde(default = "default_smart_min_notional")]
    pub smart_min_notional: Decimal,
    #[serde(default = "default_price_history_depth")]
    pub price_history_depth: usize,
    #[serde(default = "default_baseline_depth")]
    pub baseline_depth: usize,
}

fn default_big_notional() -> Decimal {
    dec!(1000)
}
fn default_low_activity_window_hours() -> i64 {
    24
}
fn default_low_activity_max_trades() -> u32 {
    2
}
fn default_repeat_window_minutes() -> i64 {
    10
}
fn default_repeat_min_count() -> usize {
    3
}
fn default_impact_deviation() -> Decimal {
    dec!(0.05)
}
fn default_impact_min_notional() -> Decimal {
    dec!(500)
}
fn default_cluster_window_minutes() -> i64 {
    5
}
fn default_cluster_min_wallets() -> usize {
    3
}
fn default_cluster_min_notional() -> Decimal {
    dec!(200)
}
fn default_smart_min_accuracy() -> Decimal {
    dec!(0.60)
}
fn default_smart_high_accuracy() -> Decimal {
    dec!(0.75)
}
fn default_smart_min_trades() -> i64 {
    5
}
fn default_smart_min_notional() -> Decimal {
    dec!(100)
}
fn default_price_history_depth() -> usize {
    50
}
fn default_baseline_depth() -> usize {
    10
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            big_notional: default_big_notional(),
            low_activity_window_hours: default_low_activity_window_hours(),
            low_activity_max_trades: default_low_activity_max_trades(),
            repeat_window_minutes: default_repeat_window_minutes(),
            repeat_min_count: default_repeat_min_count(),
            impact_deviation: default_impact_deviation(),
            impact_min_notional: default_impact_min_notional(),
            cluster_window_minutes: default_cluster_window_minutes(),
            cluster_min_wallets: default_cluster_min_wallets(),
            cluster_min_notional_per_wallet: default_cluster_min_notional(),
            smart_min_accuracy: default_smart_min_accuracy(),
            smart_high_accuracy: default_smart_high_accuracy(),
            smart_min_trades: default_smart_min_trades(),
            smart_min_notional: default_smart_min_notional(),
            price_history_depth: default_price_history_depth(),
            baseline_depth: default_baseline_depth(),
        }
    }
}

/// Pre-batch wallet history: earliest trade and count inside the recency
/// window. Mutated as the batch progresses so later trades see earlier ones.
#[derive(Debug, Clone, Default)]
pub struct WalletActivity {
    pub first_seen: Option<DateTime<Utc>>,
    pub recent: u32,
}

/// Context loaded from the store before evaluating a batch.
#[derive(Debug, Default)]
pub struct BatchContext {
    pub wallet_activity: HashMap<String, WalletActivity>,
    pub price_history: HashMap<i64, VecDeque<(DateTime<Utc>, Decimal)>>,
    pub smart_wallets: HashMap<String, WalletStatsRow>,
}

impl BatchContext {
    /// Load everything the detectors need about history strictly before the
    /// batch's earliest timestamp.
    pub fn load(conn: &Connection, trades: &[TradeRow], cfg: &DetectorConfig) -> Result<Self> {
        let Some(earliest) = trades.iter().map(|t| t.traded_at).min() else {
            return Ok(Self::default());
        };

        let wallets: HashSet<String> =
            trades.iter().map(|t| t.wallet_address.clone()).collect();
        let markets: HashSet<i64> = trades.iter().map(|t| t.market_id).collect();
        let recent_cutoff = earliest - Duration::hours(cfg.low_activity_window_hours);

        let mut wallet_activity = HashMap::new();
        for (wallet, (first_seen, recent)) in
            queries::load_wallet_activity(conn, &wallets, &earliest, &recent_cutoff)?
        {
            wallet_activity.insert(wallet, WalletActivity { first_seen: Some(first_seen), recent });
        }

        let price_history =
            queries::load_price_history(conn, &markets, &earliest, cfg.price_history_depth)?;

        let mut smart_wallets = HashMap::new();
        for (wallet, stats) in queries::load_wallet_stats_for(conn, &wallets)? {
            let qualifies = stats.evaluated_trades >= cfg.smart_min_trades
                && stats
                    .accuracy_score
                    .map(|acc| acc >= cfg.smart_min_accuracy)
                    .unwrap_or(false);
            if qualifies {
                smart_wallets.insert(wallet, stats);
            }
        }

        Ok(Self { wallet_activity, price_history, smart_wallets })
    }

    /// Seed a context directly (tests and replays over known state).
    pub fn with_smart_wallets(stats: Vec<WalletStatsRow>) -> Self {
        let mut ctx = Self::default();
        for row in stats {
            ctx.smart_wallets.insert(row.wallet_address.clone(), row);
        }
        ctx
    }
}

pub struct SignalEngine {
    cfg: DetectorConfig,
}

impl SignalEngine {
    pub fn new(cfg: DetectorConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.cfg
    }

    fn baseline_price(&self, history: &VecDeque<(DateTime<Utc>, Decimal)>) -> Option<Decimal> {
        if history.is_empty() {
            return None;
        }
        let depth = self.cfg.baseline_depth.min(history.len());
        let tail = history.iter().skip(history.len() - depth);
        let sum: Decimal = tail.map(|(_, price)| *price).sum();
        Some(sum / Decimal::from(depth))
    }

    /// Evaluate one batch in (traded_at, id) order. Mutates the context's
    /// recency counters and price rings so later trades in the batch see
    /// the earlier ones.
    pub fn evaluate(&self, ctx: &mut BatchContext, trades: &[TradeRow]) -> Vec<NewSignal> {
        let mut ordered: Vec<&TradeRow> = trades.iter().collect();
        ordered.sort_by_key(|t| (t.traded_at, t.id));

        let mut repeat_windows: HashMap<(String, i64, Side), VecDeque<DateTime<Utc>>> =
            HashMap::new();
        let mut cluster_windows: HashMap<(i64, Side), VecDeque<(DateTime<Utc>, String, Decimal)>> =
            HashMap::new();

        let mut signals = Vec::new();

        for trade in ordered {
            let notional = trade.notional();
            let wallet = trade.wallet_address.clone();
            let activity = ctx.wallet_activity.entry(wallet.clone()).or_default();

            // FRESH_WALLET_BIG_SIZE
            if activity.first_seen.is_none() && notional >= self.cfg.big_notional {
                signals.push(NewSignal {
                    market_id: trade.market_id,
                    wallet_address: wallet.clone(),
                    side: trade.side,
                    kind: SignalKind::FreshWalletBigSize,
                    severity: Severity::High,
                    score: notional,
                    details: json!({
                        "notional": format_dec(&notional),
                        "shares": format_dec(&trade.shares),
                        "price": format_dec(&trade.price),
                        "thresholds": {"big_notional": format_dec(&self.cfg.big_notional)},
                        "why": "First time wallet seen with large trade",
                    }),
                    observed_at: trade.traded_at,
                });
            }

            // LOW_ACTIVITY_WALLET_BIG_SIZE
            if activity.recent <= self.cfg.low_activity_max_trades
                && notional >= self.cfg.big_notional
            {
                signals.push(NewSignal {
                    market_id: trade.market_id,
                    wallet_address: wallet.clone(),
                    side: trade.side,
                    kind: SignalKind::LowActivityWalletBigSize,
                    severity: Severity::Medium,
                    score: notional,
                    details: json!({
                        "notional": format_dec(&notional),
                        "shares": format_dec(&trade.shares),
                        "price": format_dec(&trade.price),
                        "recent_trades": activity.recent,
                        "window_hours": self.cfg.low_activity_window_hours,
                        "thresholds": {
                            "max_recent_trades": self.cfg.low_activity_max_trades,
                            "big_notional": format_dec(&self.cfg.big_notional),
                        },
                        "why": "Low activity wallet executed a large trade",
                    }),
                    observed_at: trade.traded_at,
                });
            }

            // REPEAT_ENTRIES
            let repeat_key = (wallet.clone(), trade.market_id, trade.side);
            let repeat_window = repeat_windows.entry(repeat_key).or_default();
            repeat_window.push_back(trade.traded_at);
            let repeat_span = Duration::minutes(self.cfg.repeat_window_minutes);
            while repeat_window
                .front()
                .map(|first| trade.traded_at - *first > repeat_span)
                .unwrap_or(false)
            {
                repeat_window.pop_front();
            }
            if repeat_window.len() >= self.cfg.repeat_min_count {
                signals.push(NewSignal {
                    market_id: trade.market_id,
                    wallet_address: wallet.clone(),
                    side: trade.side,
                    kind: SignalKind::RepeatEntries,
                    severity: Severity::Medium,
                    score: Decimal::from(repeat_window.len()),
                    details: json!({
                        "count": repeat_window.len(),
                        "window_minutes": self.cfg.repeat_window_minutes,
                        "why": "Multiple entries by same wallet/side in short window",
                    }),
                    observed_at: trade.traded_at,
                });
            }

            // THIN_MARKET_IMPACT; the baseline never includes the trade itself
            let history = ctx.price_history.entry(trade.market_id).or_default();
            if let Some(baseline) = self.baseline_price(history) {
                if baseline > Decimal::ZERO && notional >= self.cfg.impact_min_notional {
                    let deviation = (trade.price - baseline).abs() / baseline;
                    if deviation >= self.cfg.impact_deviation {
                        let severity = if deviation >= self.cfg.impact_deviation * dec!(2) {
                            Severity::High
                        } else {
                            Severity::Medium
                        };
                        signals.push(NewSignal {
                            market_id: trade.market_id,
                            wallet_address: wallet.clone(),
                            side: trade.side,
                            kind: SignalKind::ThinMarketImpact,
                            severity,
                            score: deviation,
                            details: json!({
                                "price": format_dec(&trade.price),
                                "baseline_price": format_dec(&baseline),
                                "deviation_pct": format_dec(&deviation),
                                "notional": format_dec(&notional),
                                "thresholds": {
                                    "impact_deviation": format_dec(&self.cfg.impact_deviation),
                                    "min_notional": format_dec(&self.cfg.impact_min_notional),
                                },
                                "why": "Trade price deviates from recent baseline",
                            }),
                            observed_at: trade.traded_at,
                        });
                    }
                }
            }
            while history.len() >= self.cfg.price_history_depth.max(1) {
                history.pop_front();
            }
            history.push_back((trade.traded_at, trade.price));

            // CLUSTERING
            let cluster_window = cluster_windows
                .entry((trade.market_id, trade.side))
                .or_default();
            cluster_window.push_back((trade.traded_at, wallet.clone(), notional));
            let cluster_cutoff =
                trade.traded_at - Duration::minutes(self.cfg.cluster_window_minutes);
            while cluster_window
                .front()
                .map(|(ts, _, _)| *ts < cluster_cutoff)
                .unwrap_or(false)
            {
                cluster_window.pop_front();
            }
            let unique_wallets: HashSet<&str> =
                cluster_window.iter().map(|(_, w, _)| w.as_str()).collect();
            if unique_wallets.len() >= self.cfg.cluster_min_wallets {
                let total_notional: Decimal =
                    cluster_window.iter().map(|(_, _, n)| *n).sum();
                let floor = self.cfg.cluster_min_notional_per_wallet
                    * Decimal::from(unique_wallets.len());
                if total_notional >= floor {
                    signals.push(NewSignal {
                        market_id: trade.market_id,
                        wallet_address: wallet.clone(),
                        side: trade.side,
                        kind: SignalKind::Clustering,
                        severity: Severity::Medium,
                        score: total_notional,
                        details: json!({
                            "unique_wallets": unique_wallets.len(),
                            "window_minutes": self.cfg.cluster_window_minutes,
                            "total_notional": format_dec(&total_notional),
                            "thresholds": {
                                "min_wallets": self.cfg.cluster_min_wallets,
                                "min_notional_per_wallet":
                                    format_dec(&self.cfg.cluster_min_notional_per_wallet),
                            },
                            "why": "Multiple wallets trading same side in short window",
                        }),
                        observed_at: trade.traded_at,
                    });
                }
            }

            // EARLY_POSITIONING
            if let Some(stats) = ctx.smart_wallets.get(&wallet) {
                if notional >= self.cfg.smart_min_notional {
                    let accuracy = stats.accuracy_score.unwrap_or_default();
                    let severity = if accuracy >= self.cfg.smart_high_accuracy {
                        Severity::High
                    } else {
                        Severity::Medium
                    };
                    signals.push(NewSignal {
                        market_id: trade.market_id,
                        wallet_address: wallet.clone(),
                        side: trade.side,
                        kind: SignalKind::EarlyPositioning,
                        severity,
                        score: accuracy * notional,
                        details: json!({
                            "notional": format_dec(&notional),
                            "wallet_accuracy": format_dec(&accuracy),
                            "wallet_evaluated_trades": stats.evaluated_trades,
                            "wallet_correct_4h": stats.correct_4h,
                            "wallet_total_notional": format_dec(&stats.total_notional),
                            "wallet_best_streak": stats.best_streak,
                            "thresholds": {
                                "min_accuracy": format_dec(&self.cfg.smart_min_accuracy),
                                "min_trades": self.cfg.smart_min_trades,
                                "min_notional": format_dec(&self.cfg.smart_min_notional),
                            },
                            "why": format!(
                                "Wallet has {:.0}% historical accuracy over {} trades",
                                accuracy * dec!(100),
                                stats.evaluated_trades
                            ),
                        }),
                        observed_at: trade.traded_at,
                    });
                }
            }

            // Later trades in the batch see this one as history
            let activity = ctx.wallet_activity.entry(wallet).or_default();
            activity.recent += 1;
            activity.first_seen.get_or_insert(trade.traded_at);
        }

        signals
    }
}

impl Default for SignalEngine {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}
