//! Alert delivery. Best effort: callers log failures and keep going.

use crate::error::MonitorError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::borrow::Cow;
use std::time::Duration;

pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Bot API limit on `sendMessage` text, in characters.
pub const TELEGRAM_MAX_CHARS: usize = 4096;

const TRUNCATION_MARK: &str = "\n[truncated]";

/// Cut `text` to at most `max` characters, marking the cut.
fn truncate_chars(text: &str, max: usize) -> Cow<'_, str> {
    if text.chars().count() <= max {
        return Cow::Borrowed(text);
    }
    let keep = max.saturating_sub(TRUNCATION_MARK.chars().count());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARK);
    Cow::Owned(out)
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<(), MonitorError>;
}

/// Posts alerts to a Telegram chat through the Bot API.
pub struct TelegramAlertSink {
    http_client: reqwest::Client,
    api_url: String,
    token: String,
    chat_id: String,
}

impl TelegramAlertSink {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self, MonitorError> {
        Self::with_api_url(TELEGRAM_API_URL, token, chat_id)
    }

    /// Same as [TelegramAlertSink::new] against another Bot API host.
    pub fn with_api_url(
        api_url: impl Into<String>,
        token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<Self, MonitorError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MonitorError::Alert(e.to_string()))?;
        Ok(Self {
            http_client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
        })
    }
}

#[async_trait]
impl AlertSink for TelegramAlertSink {
    async fn send_message(&self, text: &str) -> Result<(), MonitorError> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.token);
        let body = json!({
            "chat_id": self.chat_id,
            "text": truncate_chars(text, TELEGRAM_MAX_CHARS),
            "disable_web_page_preview": true,
        });
        let resp = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MonitorError::Alert(e.without_url().to_string()))?;
        let status = resp.status();
        let json: Value = resp
            .json()
            .await
            .map_err(|e| {
                let reason = e.without_url();
                MonitorError::Alert(format!("telegram response ({}): {}", status, reason))
            })?;
        if json.get("ok").and_then(|ok| ok.as_bool()) != Some(true) {
            let description = json
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("no description");
            return Err(MonitorError::Alert(format!("telegram ({}): {}", status, description)));
        }
        Ok(())
    }
}

/// Used when alerting is disabled: the alert only goes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send_message(&self, text: &str) -> Result<(), MonitorError> {
        tracing::warn!(alert = %text, "alert (delivery disabled)");
        Ok(())
    }
}
