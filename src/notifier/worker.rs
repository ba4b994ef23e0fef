//! Notifier dispatch: stream newly updated alerts to the sink, enriched
//! with supporting signals and wallet accuracy.
//!
//! Delivery is at-least-once: the cursor advances only after the batch's
//! messages went out, so a crash in between re-sends.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::NotifierConfig;
use crate::error::Result;
use crate::notifier::AlertSink;
use crate::runtime::{sleep_unless_shutdown, Backoff};
use crate::store::models::{format_ts, AlertRow, SignalRow, WalletStatsRow};
use crate::store::{queries, Store};

/// Supporting signals shown per alert
pub const WALLETS_LIMIT: usize = 3;
/// Signal-type reasons shown per alert
pub const REASONS_LIMIT: usize = 3;

/// Render one alert with its supporting signals into a chat message.
pub fn build_message(
    alert: &AlertRow,
    market: Option<&(String, String)>,
    signals: &[(SignalRow, Option<WalletStatsRow>)],
) -> String {
    let market_name = market
        .map(|(name, _)| name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("market {}", alert.market_id));

    let mut lines = vec![
        format!(
            "[{}] {} - {}",
            alert.status.as_str().to_uppercase(),
            market_name,
            alert.side.as_str().to_uppercase()
        ),
        format!("score={:.2}", alert.score),
    ];

    // Top signal-type counts from the explanation blob
    if let Some(counts) = alert.why.get("counts_by_signal").and_then(|v| v.as_object()) {
        let mut reasons: Vec<(&String, u64)> = counts
            .iter()
            .filter_map(|(kind, count)| count.as_u64().map(|c| (kind, c)))
            .collect();
        reasons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        let rendered: Vec<String> = reasons
            .iter()
            .take(REASONS_LIMIT)
            .map(|(kind, count)| format!("{kind} x{count}"))
            .collect();
        if !rendered.is_empty() {
            lines.push(format!("reasons: {}", rendered.join(", ")));
        }
    }

    if signals.is_empty() {
        lines.push("no supporting trader details available".into());
    }
    for (signal, stats) in signals {
        let details = &signal.details;
        let shares = details
            .get("shares")
            .and_then(|v| v.as_str())
            .unwrap_or("n/a");
        let price = details
            .get("price")
            .and_then(|v| v.as_str())
            .unwrap_or("n/a");
        let notional = details
            .get("notional")
            .or_else(|| details.get("total_notional"))
            .and_then(|v| v.as_str())
            .unwrap_or("n/a");
        let accuracy = stats
            .as_ref()
            .and_then(|s| {
                s.accuracy_score
                    .map(|acc| format!("winrate {:.1}% over {} trades", acc * rust_decimal::Decimal::from(100), s.total_trades))
            })
            .unwrap_or_else(|| "winrate n/a".into());
        lines.push(format!(
            "{} {} {}@{} notional={} at {} ({})",
            signal.wallet_address,
            signal.side.as_str(),
            shares,
            price,
            notional,
            format_ts(&signal.effective_at()),
            accuracy,
        ));
    }

    if let Some((_, external_id)) = market {
        lines.push(format!("https://polymarket.com/market/{external_id}"));
    }

    lines.join("\n")
}

/// One dispatch pass. Returns None when no alert sits past the cursor.
pub async fn run_once(
    store: &Store,
    sink: &dyn AlertSink,
    batch_size: usize,
) -> Result<Option<(usize, DateTime<Utc>)>> {
    let cursor = store.with_conn(|c| queries::get_ts_cursor(c, queries::NOTIFIER_CURSOR_KEY))?;
    let alerts = store.with_conn(|c| queries::alerts_updated_after(c, cursor, batch_size))?;
    let Some(latest) = alerts.iter().map(|a| a.updated_at).max() else {
        return Ok(None);
    };

    let mut sent = 0usize;
    for alert in &alerts {
        let (market, enriched) = store.with_conn(|c| {
            let market = queries::market_header(c, alert.market_id)?;
            let signals = queries::recent_signals_for(c, alert.market_id, alert.side, WALLETS_LIMIT)?;
            let mut enriched = Vec::with_capacity(signals.len());
            for signal in signals {
                let stats = queries::get_wallet_stats(c, &signal.wallet_address)?;
                enriched.push((signal, stats));
            }
            Ok((market, enriched))
        })?;

        let message = build_message(alert, market.as_ref(), &enriched);
        sink.send(&message).await?;
        sent += 1;
    }

    store.with_tx(|tx| queries::set_ts_cursor(tx, queries::NOTIFIER_CURSOR_KEY, &latest))?;
    Ok(Some((sent, latest)))
}

pub async fn run(
    store: Store,
    cfg: NotifierConfig,
    sink: std::sync::Arc<dyn AlertSink>,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(sink = sink.name(), "starting notifier worker");
    let mut backoff = Backoff::new(
        Duration::from_secs(cfg.backoff_base_seconds),
        Duration::from_secs(cfg.backoff_max_seconds),
    );

    while !shutdown.is_cancelled() {
        match run_once(&store, sink.as_ref(), cfg.batch_size).await {
            Ok(Some((sent, latest))) => {
                backoff.reset();
                info!(sent = sent, cursor = %latest, "dispatched alerts");
            }
            Ok(None) => {
                backoff.reset();
                if !sleep_unless_shutdown(&shutdown, Duration::from_secs(cfg.idle_seconds)).await {
                    break;
                }
            }
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(error = %e, delay_secs = delay.as_secs(), "notifier worker error");
                if !sleep_unless_shutdown(&shutdown, delay).await {
                    break;
                }
            }
        }
    }
    info!("notifier worker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{AlertStatus, Severity, Side, SignalKind};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn sample_alert(at: DateTime<Utc>) -> AlertRow {
        AlertRow {
            id: 1,
            market_id: 7,
            side: Side::Buy,
            event_type: "scoring".into(),
            status: AlertStatus::High,
            score: dec!(26),
            why: json!({
                "counts_by_signal": {
                    "FRESH_WALLET_BIG_SIZE": 2,
                    "CLUSTERING": 1,
                }
            }),
            message: Some("score=26.00 status=high".into()),
            created_at: at,
            updated_at: at,
        }
    }

    fn sample_signal(at: DateTime<Utc>) -> SignalRow {
        SignalRow {
            id: 11,
            market_id: 7,
            wallet_address: "0xw1".into(),
            side: Side::Buy,
            kind: SignalKind::FreshWalletBigSize,
            severity: Severity::High,
            score: dec!(1200),
            details: json!({"shares": "2000", "price": "0.6", "notional": "1200"}),
            observed_at: Some(at),
            created_at: at,
        }
    }

    #[test]
    fn test_build_message_with_market_and_stats() {
        let at = Utc.with_ymd_and_hms(2026, 1, 4, 12, 0, 0).unwrap();
        let market = ("Will it rain?".to_string(), "0xcond".to_string());
        let stats = WalletStatsRow {
            wallet_address: "0xw1".into(),
            total_trades: 20,
            evaluated_trades: 15,
            accuracy_score: Some(dec!(0.75)),
            ..Default::default()
        };

        let message = build_message(
            &sample_alert(at),
            Some(&market),
            &[(sample_signal(at), Some(stats))],
        );

        assert!(message.starts_with("[HIGH] Will it rain? - BUY"));
        assert!(message.contains("score=26.00"));
        assert!(message.contains("reasons: FRESH_WALLET_BIG_SIZE x2, CLUSTERING x1"));
        assert!(message.contains("0xw1 buy 2000@0.6 notional=1200"));
        assert!(message.contains("winrate 75.0% over 20 trades"));
        assert!(message.contains("https://polymarket.com/market/0xcond"));
    }

    #[test]
    fn test_build_message_falls_back_without_market() {
        let at = Utc.with_ymd_and_hms(2026, 1, 4, 12, 0, 0).unwrap();
        let message = build_message(&sample_alert(at), None, &[]);
        assert!(message.contains("market 7"));
        assert!(message.contains("no supporting trader details available"));
    }
}
