//! Ingestion worker: refresh the market set, poll each active market's
//! trade feed behind a jittered schedule, insert deduplicated trades.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::IngestionConfig;
use crate::error::Result;
use crate::ingest::FeedClient;
use crate::runtime::{sleep_unless_shutdown, Backoff};
use crate::store::models::MarketSnapshot;
use crate::store::{queries, Store};

const IDLE_TICK: Duration = Duration::from_secs(1);

pub struct IngestionWorker {
    store: Store,
    client: FeedClient,
    cfg: IngestionConfig,
}

impl IngestionWorker {
    pub fn new(store: Store, cfg: IngestionConfig) -> Result<Self> {
        let client = FeedClient::new(&cfg)?;
        Ok(Self { store, client, cfg })
    }

    /// Pull the market index and upsert it; returns the fresh snapshots.
    async fn refresh_markets(&self) -> Result<HashMap<String, MarketSnapshot>> {
        let markets = self.client.fetch_markets().await?;
        let snapshots = self.store.with_tx(|tx| queries::upsert_markets(tx, &markets))?;
        info!(count = snapshots.len(), "refreshed markets");
        Ok(snapshots)
    }

    /// Poll one market's trade feed since its cursor. The cursor advance is
    /// part of the insert transaction.
    async fn poll_market(&self, market: &MarketSnapshot) -> Result<usize> {
        let cursor_key = queries::trade_cursor_key(&market.external_id);
        let since = self
            .store
            .with_conn(|conn| queries::get_ts_cursor(conn, &cursor_key))?;
        let trades = self
            .client
            .fetch_recent_trades(&market.external_id, since)
            .await?;

        let mut markets = HashMap::new();
        markets.insert(market.external_id.clone(), market.clone());

        let (inserted, latest) = self.store.with_tx(|tx| {
            let (inserted, latest) = queries::insert_trades(tx, &trades, &markets)?;
            if inserted > 0 {
                if let Some(latest) = latest {
                    queries::set_ts_cursor(tx, &cursor_key, &latest)?;
                }
            }
            Ok((inserted, latest))
        })?;

        info!(
            market = %market.external_id,
            inserted = inserted,
            latest_at = ?latest,
            "polled trades"
        );
        Ok(inserted)
    }

    fn next_poll_delay(&self) -> Duration {
        let (min, max) = (self.cfg.poll_min_seconds, self.cfg.poll_max_seconds);
        if max <= min {
            return Duration::from_secs(min);
        }
        let jittered = rand::thread_rng().gen_range(min as f64..=max as f64);
        Duration::from_secs_f64(jittered)
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!("starting ingestion worker");
        let mut markets_cache: HashMap<String, MarketSnapshot> = HashMap::new();
        let mut poll_schedule: HashMap<String, Instant> = HashMap::new();
        let mut next_refresh = Instant::now();
        let mut backoff = Backoff::new(
            Duration::from_secs(self.cfg.backoff_base_seconds),
            Duration::from_secs(self.cfg.backoff_max_seconds),
        );

        while !shutdown.is_cancelled() {
            match self
                .iteration(&mut markets_cache, &mut poll_schedule, &mut next_refresh)
                .await
            {
                Ok(()) => {
                    backoff.reset();
                    if !sleep_unless_shutdown(&shutdown, IDLE_TICK).await {
                        break;
                    }
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(error = %e, delay_secs = delay.as_secs(), "ingestion loop error");
                    if !sleep_unless_shutdown(&shutdown, delay).await {
                        break;
                    }
                }
            }
        }
        info!("ingestion worker stopped");
        Ok(())
    }

    async fn iteration(
        &self,
        markets_cache: &mut HashMap<String, MarketSnapshot>,
        poll_schedule: &mut HashMap<String, Instant>,
        next_refresh: &mut Instant,
    ) -> Result<()> {
        let now = Instant::now();
        if now >= *next_refresh {
            *markets_cache = self.refresh_markets().await?;
            *next_refresh = now + Duration::from_secs(self.cfg.markets_refresh_seconds);
            // Markets no longer in the index lose their poll slot
            poll_schedule.retain(|external_id, _| markets_cache.contains_key(external_id));
        }

        let active: Vec<MarketSnapshot> = markets_cache
            .values()
            .filter(|m| m.status.is_pollable())
            .cloned()
            .collect();
        if active.is_empty() {
            debug!("no active markets");
            return Ok(());
        }

        for market in &active {
            let due = poll_schedule
                .get(&market.external_id)
                .copied()
                .unwrap_or(now);
            if now < due {
                continue;
            }
            if let Err(e) = self.poll_market(market).await {
                // One bad market never aborts the sweep
                warn!(market = %market.external_id, error = %e, "failed to poll market trades");
            }
            poll_schedule.insert(market.external_id.clone(), Instant::now() + self.next_poll_delay());
        }
        Ok(())
    }
}

pub async fn run(store: Store, cfg: IngestionConfig, shutdown: CancellationToken) -> Result<()> {
    IngestionWorker::new(store, cfg)?.run(shutdown).await
}
