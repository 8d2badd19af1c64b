use std::time::Duration;

use chrono::{DateTime, NaiveDateTime};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::config::TelegramConfig;
use crate::models::Message;
use crate::source::{MessageSource, SourceError};

/// Channel history client speaking the Bot API envelope. The official Bot
/// API does not expose channel history, so `api_base` points at a gateway
/// that does (tdlight's bot-api server with `getChatHistory`, or anything
/// wire compatible).
pub struct GatewayClient {
    client: Client,
    api_base: String,
    token: String,
}

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Deserialize)]
struct HistorySlice {
    messages: Vec<RemoteMessage>,
}

#[derive(Deserialize)]
struct RemoteMessage {
    message_id: i64,
    date: i64,
    text: Option<String>,
}

impl GatewayClient {
    pub fn new(config: &TelegramConfig) -> Result<Self, SourceError> {
        let token = config.resolve_bot_token();
        if token.is_empty() {
            return Err(SourceError::Request(
                "Telegram bot token required (config.toml [telegram] or BTCSHEET_BOT_TOKEN)."
                    .to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(5)))
            .build()
            .map_err(|e| SourceError::Request(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
        })
    }
}

impl MessageSource for GatewayClient {
    fn page(&self, channel: &str, offset_id: i64, limit: u32) -> Result<Vec<Message>, SourceError> {
        let url = format!("{}/bot{}/getChatHistory", self.api_base, self.token);
        let chat_id = format!("@{}", channel.trim_start_matches('@'));
        let offset = offset_id.to_string();
        let limit = limit.to_string();
        let resp = self
            .client
            .get(url)
            .query(&[
                ("chat_id", chat_id.as_str()),
                ("offset_message_id", offset.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .map_err(|e| SourceError::Request(e.to_string()))?;

        let status = resp.status();
        let body: ApiEnvelope<HistorySlice> = resp.json().map_err(|e| {
            SourceError::Request(format!("History fetch failed: HTTP {status}: {e}"))
        })?;
        if !body.ok {
            return Err(SourceError::Request(format!(
                "History fetch failed: {}",
                body.description.unwrap_or_else(|| format!("HTTP {status}"))
            )));
        }

        let messages = body.result.map(|slice| slice.messages).unwrap_or_default();
        Ok(messages.into_iter().map(to_message).collect())
    }
}

fn to_message(remote: RemoteMessage) -> Message {
    Message {
        id: remote.message_id,
        date: naive_from_unix(remote.date),
        text: remote.text,
    }
}

/// The gateway reports unix seconds; the sheet stores naive datetimes, so
/// the UTC zone marker is dropped here.
fn naive_from_unix(ts: i64) -> NaiveDateTime {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.naive_utc())
        .unwrap_or_default()
}
