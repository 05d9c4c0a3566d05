//! Telegram Bot API notification channel.
//!
//! Posts run notifications to a chat via `sendMessage`. Messages longer
//! than Telegram's limit are truncated rather than rejected.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::NotificationChannel;

/// Telegram rejects message text above this many characters
const MAX_MESSAGE_CHARS: usize = 4096;

const TRUNCATION_MARKER: &str = "\n[truncated]";

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

/// `notify.telegram` section of the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,

    /// Bot API server (self-hosted servers expose the same API)
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Deliver without a sound on the recipient's device
    #[serde(default)]
    pub silent: bool,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    description: Option<String>,
}

/// Delivers notifications to one Telegram chat
pub struct TelegramChannel {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self::from_config(TelegramConfig {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            api_base: default_api_base(),
            silent: false,
        })
    }

    pub fn from_config(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        )
    }

    fn payload(&self, message: &str) -> serde_json::Value {
        serde_json::json!({
            "chat_id": self.config.chat_id,
            "text": fit_message(message),
            "disable_notification": self.config.silent,
            "disable_web_page_preview": true,
        })
    }
}

/// Cut a message down to Telegram's limit on a char boundary
fn fit_message(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        return message.to_string();
    }

    let keep = MAX_MESSAGE_CHARS - TRUNCATION_MARKER.chars().count();
    let mut text: String = message.chars().take(keep).collect();
    text.push_str(TRUNCATION_MARKER);
    text
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &str) -> Result<()> {
        let reply: ApiReply = self
            .client
            .post(self.endpoint())
            .json(&self.payload(message))
            .send()
            .await
            .context("Failed to reach Telegram")?
            .json()
            .await
            .context("Failed to parse Telegram reply")?;

        if !reply.ok {
            anyhow::bail!(
                "Telegram rejected message for chat {}: {}",
                self.config.chat_id,
                reply.description.unwrap_or_default()
            );
        }

        debug!(chat_id = %self.config.chat_id, "Telegram message delivered");
        Ok(())
    }
}
