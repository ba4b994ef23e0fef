// Upstream API client: markets index and per-market trade feed
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::config::IngestionConfig;
use crate::error::{Error, Result};
use crate::store::models::{MarketStatus, NewMarket, NewTrade, Side};

const USER_AGENT: &str = "polymarket-watch/0.1";

/// Above this magnitude a numeric timestamp is taken as milliseconds.
const UNIX_MS_THRESHOLD: f64 = 10_000_000_000.0;

pub struct FeedClient {
    client: reqwest::Client,
    markets_url: String,
    trades_url: String,
}

impl FeedClient {
    pub fn new(cfg: &IngestionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.client_timeout_seconds))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            markets_url: cfg.markets_url.clone(),
            trades_url: cfg.trades_url.clone(),
        })
    }

    /// Fetch and normalize the active-market index.
    pub async fn fetch_markets(&self) -> Result<Vec<NewMarket>> {
        let resp = self.client.get(&self.markets_url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: self.markets_url.clone(),
            });
        }
        let payload: Value = resp.json().await?;
        Ok(normalize_markets(&payload))
    }

    /// Fetch and normalize trades for one market since a cursor timestamp.
    /// A 404 from the feed means "no trades", not an error.
    pub async fn fetch_recent_trades(
        &self,
        market_external_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<NewTrade>> {
        let mut query: Vec<(&str, String)> = vec![("asset", market_external_id.to_string())];
        if let Some(since) = since {
            query.push(("startTime", since.timestamp_millis().to_string()));
        }

        let resp = self.client.get(&self.trades_url).query(&query).send().await?;
        let status = resp.status();
        if status.as_u16() == 404 {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: self.trades_url.clone(),
            });
        }
        let payload: Value = resp.json().await?;
        Ok(normalize_trades(market_external_id, &payload))
    }
}

/// The index endpoint returns either a bare array or `{"markets": [...]}`.
fn entries<'a>(payload: &'a Value, key: &str) -> Vec<&'a Value> {
    match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

pub fn normalize_markets(payload: &Value) -> Vec<NewMarket> {
    let mut normalized = Vec::new();
    for item in entries(payload, "markets") {
        let Some(external_id) = first_string(
            item,
            &["conditionId", "condition_id", "slug", "id", "marketId", "address", "uuid"],
        ) else {
            continue;
        };
        let status = first_string(item, &["status"]).unwrap_or_else(|| "active".into());
        normalized.push(NewMarket {
            external_id,
            name: first_string(item, &["question", "name", "title"]).unwrap_or_default(),
            category: first_string(item, &["category"]),
            status: MarketStatus::from_upstream(&status),
            resolved_at: first_value(
                item,
                &["resolved_at", "resolvedAt", "resolutionTime", "closed_time"],
            )
            .and_then(parse_timestamp),
        });
    }
    normalized
}

/// Rows with no wallet, no parsable timestamp, an unknown side, or a price
/// outside [0, 1] are dropped with a warning; they never halt the batch.
pub fn normalize_trades(market_external_id: &str, payload: &Value) -> Vec<NewTrade> {
    let mut normalized = Vec::new();
    for item in entries(payload, "trades") {
        let wallet = first_string(item, &["proxyWallet", "wallet", "wallet_address", "address"]);
        let traded_at = first_value(item, &["timestamp", "traded_at", "created_at", "time"])
            .and_then(parse_timestamp);
        let (Some(wallet), Some(traded_at)) = (wallet, traded_at) else {
            warn!(market = %market_external_id, "dropping trade without wallet or timestamp");
            continue;
        };

        let side_raw = first_string(item, &["side", "type"]).unwrap_or_default();
        let side = match Side::from_str(&side_raw) {
            Ok(side) => side,
            Err(_) => {
                warn!(market = %market_external_id, side = %side_raw, "dropping trade with unknown side");
                continue;
            }
        };

        let shares = first_decimal(item, &["shares", "amount", "size"]).unwrap_or_default();
        let price = first_decimal(item, &["price", "fill_price", "avg_price"]).unwrap_or_default();
        if price < Decimal::ZERO || price > Decimal::ONE {
            warn!(market = %market_external_id, price = %price, "dropping trade with out-of-range price");
            continue;
        }

        normalized.push(NewTrade {
            market_external_id: market_external_id.to_string(),
            wallet_address: wallet,
            side,
            shares,
            price,
            traded_at,
            trade_hash: first_string(item, &["transactionHash", "hash", "id", "txid"]),
        });
    }
    normalized
}

fn first_value<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| item.get(key))
        .find(|v| !v.is_null())
}

/// First non-empty value under any of `keys`, stringified. Numeric ids are
/// accepted and rendered as text.
fn first_string(item: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match item.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Parse a decimal field that upstream may send as string or number. Going
/// through the number's text form keeps "0.6" exact.
fn first_decimal(item: &Value, keys: &[&str]) -> Option<Decimal> {
    for key in keys {
        let parsed = match item.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Decimal::from_str(s.trim()).ok(),
            Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
            _ => None,
        };
        if parsed.is_some() {
            return parsed;
        }
    }
    None
}

/// Timestamps arrive as ISO-8601 strings, numeric Unix seconds, or numeric
/// Unix milliseconds (anything above 1e10 is treated as ms).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_unix),
        Value::String(s) if !s.is_empty() => {
            if let Ok(numeric) = s.trim().parse::<f64>() {
                return from_unix(numeric);
            }
            if let Ok(fixed) = DateTime::parse_from_rfc3339(s) {
                return Some(fixed.with_timezone(&Utc));
            }
            // Naive ISO timestamps are taken as UTC
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        _ => None,
    }
}

fn from_unix(value: f64) -> Option<DateTime<Utc>> {
    let seconds = if value > UNIX_MS_THRESHOLD { value / 1000.0 } else { value };
    let millis = (seconds * 1000.0).round();
    if !millis.is_finite() || millis < 0.0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis as i64).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_timestamp_unix_seconds_and_millis() {
        let seconds = parse_timestamp(&json!(1_767_225_600)).unwrap();
        let millis = parse_timestamp(&json!(1_767_225_600_000i64)).unwrap();
        assert_eq!(seconds, millis);
        assert_eq!(seconds.timestamp(), 1_767_225_600);
    }

    #[test]
    fn test_parse_timestamp_numeric_string_and_iso() {
        let from_string = parse_timestamp(&json!("1767225600")).unwrap();
        let from_iso = parse_timestamp(&json!("2026-01-01T00:00:00Z")).unwrap();
        assert_eq!(from_string, from_iso);
        // naive timestamps are UTC
        let naive = parse_timestamp(&json!("2026-01-01T00:00:00")).unwrap();
        assert_eq!(naive, from_iso);
    }

    #[test]
    fn test_market_id_precedence() {
        let payload = json!([
            {"conditionId": "0xcond", "slug": "ignored", "question": "Will it?"},
            {"slug": "fallback-slug", "name": "By slug"},
            {"id": 991, "title": "Numeric id"},
            {"category": "no id at all"}
        ]);
        let markets = normalize_markets(&payload);
        assert_eq!(markets.len(), 3);
        assert_eq!(markets[0].external_id, "0xcond");
        assert_eq!(markets[0].name, "Will it?");
        assert_eq!(markets[1].external_id, "fallback-slug");
        assert_eq!(markets[2].external_id, "991");
    }

    #[test]
    fn test_markets_object_wrapper() {
        let payload = json!({"markets": [{"conditionId": "c1", "question": "Q", "status": "closed"}]});
        let markets = normalize_markets(&payload);
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].status, MarketStatus::Closed);
    }

    #[test]
    fn test_trade_normalization_and_drops() {
        let payload = json!([
            {"proxyWallet": "0xw1", "side": "BUY", "size": "2000", "price": 0.6,
             "timestamp": 1767225600, "transactionHash": "0xh1"},
            {"side": "buy", "size": "10", "price": 0.5, "timestamp": 1767225601},
            {"wallet": "0xw2", "side": "buy", "size": "10", "price": 0.5},
            {"wallet": "0xw3", "side": "hold", "size": "10", "price": 0.5, "timestamp": 1767225602},
            {"wallet": "0xw4", "side": "sell", "size": "10", "price": 1.2, "timestamp": 1767225603}
        ]);
        let trades = normalize_trades("m1", &payload);
        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.wallet_address, "0xw1");
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.shares, dec!(2000));
        assert_eq!(trade.price, dec!(0.6));
        assert_eq!(trade.notional(), dec!(1200));
        assert_eq!(trade.trade_hash.as_deref(), Some("0xh1"));
    }

    #[test]
    fn test_trade_field_fallbacks() {
        let payload = json!({"trades": [
            {"wallet_address": "0xw1", "type": "sell", "amount": 5, "avg_price": "0.25",
             "time": "2026-01-01T00:00:00Z", "txid": 77}
        ]});
        let trades = normalize_trades("m1", &payload);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, Side::Sell);
        assert_eq!(trades[0].shares, dec!(5));
        assert_eq!(trades[0].price, dec!(0.25));
        assert_eq!(trades[0].trade_hash.as_deref(), Some("77"));
    }
}
