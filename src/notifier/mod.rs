//! Alert dispatch to subscribers through a pluggable sink.
//!
//! The chat transport is a collaborator behind [`AlertSink`]; without
//! credentials the pipeline degrades to a logging dry-run sink and keeps
//! advancing its cursor.

pub mod telegram;
pub mod worker;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::NotifierConfig;
use crate::error::Result;

/// Outbound message transport for formatted alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Sink name for logging
    fn name(&self) -> &'static str;

    /// Deliver one formatted message. At-least-once from the caller's side.
    async fn send(&self, text: &str) -> Result<()>;
}

/// Dry-run sink: logs the message and succeeds.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn send(&self, text: &str) -> Result<()> {
        info!(message = %text, "dry-run notifier message");
        Ok(())
    }
}

/// Pick the sink for the current configuration. Missing credentials mean
/// dry-run, never a startup failure.
pub fn build_sink(cfg: &NotifierConfig, timeout_seconds: u64) -> Result<Arc<dyn AlertSink>> {
    match (&cfg.telegram_bot_token, &cfg.telegram_chat_id) {
        (Some(token), Some(chat_id)) if !cfg.dry_run => Ok(Arc::new(
            telegram::TelegramSink::new(token.clone(), chat_id.clone(), timeout_seconds)?,
        )),
        _ => {
            info!("notifier credentials absent or dry_run set; using dry-run sink");
            Ok(Arc::new(LogSink))
        }
    }
}
