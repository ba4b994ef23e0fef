//! Telegram Bot API sink: one sendMessage POST per alert.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::notifier::AlertSink;

pub struct TelegramSink {
    client: reqwest::Client,
    send_url: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(token: String, chat_id: String, timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            send_url: format!("https://api.telegram.org/bot{token}/sendMessage"),
            chat_id,
        })
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, text: &str) -> Result<()> {
        let resp = self
            .client
            .post(&self.send_url)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": text,
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Notify(format!("telegram returned {status}: {body}")));
        }
        Ok(())
    }
}
