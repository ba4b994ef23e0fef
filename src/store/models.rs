//! Row types and domain enums shared across the pipeline.
//!
//! Timestamps are stored as fixed-width UTC text so lexicographic order in
//! SQL equals chronological order. Decimals are stored as canonical text and
//! parsed back on read; threshold comparisons always happen on `Decimal`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Format a timestamp for storage. Fixed width, millisecond precision.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// Parse a stored (or upstream ISO) timestamp back into UTC.
pub fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    let fixed = DateTime::parse_from_rfc3339(value)
        .map_err(|e| Error::Timestamp(format!("{value}: {e}")))?;
    Ok(fixed.with_timezone(&Utc))
}

/// Canonical text form of a decimal (no trailing zeros) for storage and
/// for the trade dedupe key.
pub fn format_dec(value: &Decimal) -> String {
    value.normalize().to_string()
}

pub fn parse_dec(value: &str) -> Result<Decimal> {
    Decimal::from_str(value).map_err(|e| Error::Decimal(format!("{value}: {e}")))
}

/// Trade side in the market's outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(Error::Payload(format!("unknown trade side: {other}"))),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Active,
    Resolved,
    Closed,
    Inactive,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Active => "active",
            MarketStatus::Resolved => "resolved",
            MarketStatus::Closed => "closed",
            MarketStatus::Inactive => "inactive",
        }
    }

    /// Markets keep getting their trade feed polled unless terminal.
    pub fn is_pollable(&self) -> bool {
        matches!(self, MarketStatus::Active)
    }

    /// Unknown upstream statuses stay pollable, so they map to `Active`.
    pub fn from_upstream(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "resolved" => MarketStatus::Resolved,
            "closed" => MarketStatus::Closed,
            "inactive" => MarketStatus::Inactive,
            _ => MarketStatus::Active,
        }
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detector emission kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    FreshWalletBigSize,
    LowActivityWalletBigSize,
    RepeatEntries,
    ThinMarketImpact,
    Clustering,
    EarlyPositioning,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::FreshWalletBigSize => "FRESH_WALLET_BIG_SIZE",
            SignalKind::LowActivityWalletBigSize => "LOW_ACTIVITY_WALLET_BIG_SIZE",
            SignalKind::RepeatEntries => "REPEAT_ENTRIES",
            SignalKind::ThinMarketImpact => "THIN_MARKET_IMPACT",
            SignalKind::Clustering => "CLUSTERING",
            SignalKind::EarlyPositioning => "EARLY_POSITIONING",
        }
    }
}

impl FromStr for SignalKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "FRESH_WALLET_BIG_SIZE" => Ok(SignalKind::FreshWalletBigSize),
            "LOW_ACTIVITY_WALLET_BIG_SIZE" => Ok(SignalKind::LowActivityWalletBigSize),
            "REPEAT_ENTRIES" => Ok(SignalKind::RepeatEntries),
            "THIN_MARKET_IMPACT" => Ok(SignalKind::ThinMarketImpact),
            "CLUSTERING" => Ok(SignalKind::Clustering),
            "EARLY_POSITIONING" => Ok(SignalKind::EarlyPositioning),
            other => Err(Error::Payload(format!("unknown signal type: {other}"))),
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(Error::Payload(format!("unknown severity: {other}"))),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated alert status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Watch,
    High,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Watch => "watch",
            AlertStatus::High => "high",
        }
    }
}

impl FromStr for AlertStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "watch" => Ok(AlertStatus::Watch),
            "high" => Ok(AlertStatus::High),
            other => Err(Error::Payload(format!("unknown alert status: {other}"))),
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized market from the upstream index, ready to upsert
#[derive(Debug, Clone)]
pub struct NewMarket {
    pub external_id: String,
    pub name: String,
    pub category: Option<String>,
    pub status: MarketStatus,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Minimal market identity the ingestion loop schedules against
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub id: i64,
    pub external_id: String,
    pub status: MarketStatus,
}

/// Normalized trade from the upstream feed, ready to insert
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub market_external_id: String,
    pub wallet_address: String,
    pub side: Side,
    pub shares: Decimal,
    pub price: Decimal,
    pub traded_at: DateTime<Utc>,
    pub trade_hash: Option<String>,
}

impl NewTrade {
    pub fn notional(&self) -> Decimal {
        self.shares * self.price
    }
}

/// A stored trade
#[derive(Debug, Clone)]
pub struct TradeRow {
    pub id: i64,
    pub market_id: i64,
    pub wallet_address: String,
    pub side: Side,
    pub shares: Decimal,
    pub price: Decimal,
    pub traded_at: DateTime<Utc>,
}

impl TradeRow {
    pub fn notional(&self) -> Decimal {
        self.shares * self.price
    }
}

/// A detector emission ready to persist
#[derive(Debug, Clone)]
pub struct NewSignal {
    pub market_id: i64,
    pub wallet_address: String,
    pub side: Side,
    pub kind: SignalKind,
    pub severity: Severity,
    pub score: Decimal,
    pub details: serde_json::Value,
    pub observed_at: DateTime<Utc>,
}

/// A stored signal event
#[derive(Debug, Clone)]
pub struct SignalRow {
    pub id: i64,
    pub market_id: i64,
    pub wallet_address: String,
    pub side: Side,
    pub kind: SignalKind,
    pub severity: Severity,
    pub score: Decimal,
    pub details: serde_json::Value,
    pub observed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SignalRow {
    /// Timestamp used for ordering and windowing: observation time when the
    /// detector recorded one, insertion time otherwise.
    pub fn effective_at(&self) -> DateTime<Utc> {
        self.observed_at.unwrap_or(self.created_at)
    }
}

/// Aggregated alert ready to upsert under (market, side, event_type)
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub market_id: i64,
    pub side: Side,
    pub event_type: String,
    pub status: AlertStatus,
    pub score: Decimal,
    pub why: serde_json::Value,
    pub message: String,
}

/// A stored alert
#[derive(Debug, Clone)]
pub struct AlertRow {
    pub id: i64,
    pub market_id: i64,
    pub side: Side,
    pub event_type: String,
    pub status: AlertStatus,
    pub score: Decimal,
    pub why: serde_json::Value,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-wallet accuracy record maintained by the profiler
#[derive(Debug, Clone, Default)]
pub struct WalletStatsRow {
    pub wallet_address: String,
    pub total_trades: i64,
    pub evaluated_trades: i64,
    pub correct_15m: i64,
    pub correct_1h: i64,
    pub correct_4h: i64,
    pub accuracy_score: Option<Decimal>,
    pub avg_delta_when_correct: Option<Decimal>,
    pub total_notional: Decimal,
    pub current_streak: i64,
    pub best_streak: i64,
}

/// Offline evaluation row: market price at alert time and three horizons
#[derive(Debug, Clone)]
pub struct BacktestRow {
    pub alert_id: i64,
    pub market_id: i64,
    pub side: Side,
    pub score: Decimal,
    pub alert_time: DateTime<Utc>,
    pub price_t0: Option<Decimal>,
    pub price_15m: Option<Decimal>,
    pub price_1h: Option<Decimal>,
    pub price_4h: Option<Decimal>,
    pub delta_15m: Option<Decimal>,
    pub delta_1h: Option<Decimal>,
    pub delta_4h: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ts_round_trip_preserves_order() {
        let a = Utc.with_ymd_and_hms(2026, 1, 4, 12, 0, 0).unwrap();
        let b = a + chrono::Duration::milliseconds(1);
        let (sa, sb) = (format_ts(&a), format_ts(&b));
        assert!(sa < sb);
        assert_eq!(parse_ts(&sa).unwrap(), a);
        assert_eq!(parse_ts(&sb).unwrap(), b);
    }

    #[test]
    fn test_dec_canonical_form() {
        assert_eq!(format_dec(&dec!(1200.00)), "1200");
        assert_eq!(format_dec(&dec!(0.50)), "0.5");
        assert_eq!(parse_dec("0.5").unwrap(), dec!(0.5));
    }

    #[test]
    fn test_side_parsing_is_strict() {
        assert_eq!(Side::from_str("BUY").unwrap(), Side::Buy);
        assert_eq!(Side::from_str("sell").unwrap(), Side::Sell);
        assert!(Side::from_str("unknown").is_err());
    }

    #[test]
    fn test_market_status_unknown_stays_pollable() {
        assert_eq!(MarketStatus::from_upstream("RESOLVED"), MarketStatus::Resolved);
        assert!(MarketStatus::from_upstream("weird").is_pollable());
        assert!(!MarketStatus::from_upstream("closed").is_pollable());
    }

    #[test]
    fn test_signal_kind_round_trip() {
        for kind in [
            SignalKind::FreshWalletBigSize,
            SignalKind::LowActivityWalletBigSize,
            SignalKind::RepeatEntries,
            SignalKind::ThinMarketImpact,
            SignalKind::Clustering,
            SignalKind::EarlyPositioning,
        ] {
            assert_eq!(SignalKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }
}
