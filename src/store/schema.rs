//! Schema DDL. Executed as one batch on open; every statement is idempotent.

pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS markets (
    id INTEGER PRIMARY KEY,
    external_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    category TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    resolved_at TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);

CREATE INDEX IF NOT EXISTS ix_markets_status ON markets(status);

CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY,
    market_id INTEGER NOT NULL REFERENCES markets(id) ON DELETE CASCADE,
    wallet_address TEXT NOT NULL,
    side TEXT NOT NULL,
    shares TEXT NOT NULL,
    price TEXT NOT NULL,
    traded_at TEXT NOT NULL,
    trade_hash TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_trades_dedupe
    ON trades(market_id, wallet_address, traded_at, side, shares, price);

CREATE UNIQUE INDEX IF NOT EXISTS uq_trades_trade_hash
    ON trades(trade_hash) WHERE trade_hash IS NOT NULL;

CREATE INDEX IF NOT EXISTS ix_trades_market_time ON trades(market_id, traded_at);
CREATE INDEX IF NOT EXISTS ix_trades_wallet_time ON trades(wallet_address, traded_at);
CREATE INDEX IF NOT EXISTS ix_trades_traded_at ON trades(traded_at);

CREATE TABLE IF NOT EXISTS signal_events (
    id INTEGER PRIMARY KEY,
    market_id INTEGER REFERENCES markets(id) ON DELETE SET NULL,
    wallet_address TEXT,
    side TEXT,
    signal_type TEXT NOT NULL,
    severity TEXT,
    score TEXT,
    details_json TEXT,
    observed_at TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);

CREATE INDEX IF NOT EXISTS ix_signal_events_market_created
    ON signal_events(market_id, created_at);
CREATE INDEX IF NOT EXISTS ix_signal_events_observed ON signal_events(observed_at);
CREATE INDEX IF NOT EXISTS ix_signal_events_wallet_created
    ON signal_events(wallet_address, created_at);

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY,
    market_id INTEGER REFERENCES markets(id) ON DELETE SET NULL,
    side TEXT,
    event_type TEXT NOT NULL,
    message TEXT,
    status TEXT,
    score TEXT,
    why_json TEXT,
    sent_at TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_alerts_market_side_event
    ON alerts(market_id, side, event_type);
CREATE INDEX IF NOT EXISTS ix_alerts_updated_at ON alerts(updated_at);
CREATE INDEX IF NOT EXISTS ix_alerts_status ON alerts(status);

CREATE TABLE IF NOT EXISTS wallet_stats (
    id INTEGER PRIMARY KEY,
    wallet_address TEXT NOT NULL UNIQUE,
    total_trades INTEGER NOT NULL DEFAULT 0,
    evaluated_trades INTEGER NOT NULL DEFAULT 0,
    correct_15m INTEGER NOT NULL DEFAULT 0,
    correct_1h INTEGER NOT NULL DEFAULT 0,
    correct_4h INTEGER NOT NULL DEFAULT 0,
    accuracy_score TEXT,
    avg_delta_when_correct TEXT,
    total_notional TEXT,
    current_streak INTEGER NOT NULL DEFAULT 0,
    best_streak INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);

CREATE INDEX IF NOT EXISTS ix_wallet_stats_updated ON wallet_stats(updated_at);

CREATE TABLE IF NOT EXISTS backtest_results (
    alert_id INTEGER PRIMARY KEY REFERENCES alerts(id) ON DELETE CASCADE,
    market_id INTEGER,
    side TEXT,
    score TEXT,
    alert_time TEXT,
    price_t0 TEXT,
    price_15m TEXT,
    price_1h TEXT,
    price_4h TEXT,
    delta_15m TEXT,
    delta_1h TEXT,
    delta_4h TEXT
);

CREATE TABLE IF NOT EXISTS app_state (
    key TEXT PRIMARY KEY,
    value TEXT,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
) WITHOUT ROWID;

CREATE TRIGGER IF NOT EXISTS markets_touch_updated AFTER UPDATE ON markets
FOR EACH ROW BEGIN
    UPDATE markets SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
    WHERE id = NEW.id;
END;

CREATE TRIGGER IF NOT EXISTS alerts_touch_updated AFTER UPDATE ON alerts
FOR EACH ROW BEGIN
    UPDATE alerts SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
    WHERE id = NEW.id;
END;

CREATE TRIGGER IF NOT EXISTS wallet_stats_touch_updated AFTER UPDATE ON wallet_stats
FOR EACH ROW BEGIN
    UPDATE wallet_stats SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
    WHERE id = NEW.id;
END;

CREATE TRIGGER IF NOT EXISTS app_state_touch_updated AFTER UPDATE ON app_state
FOR EACH ROW BEGIN
    UPDATE app_state SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
    WHERE key = NEW.key;
END;
"#;
