//! Generic webhook notification channel.
//!
//! POSTs `{"text": "<message>"}` as JSON, which Slack- and
//! Mattermost-style incoming webhooks accept.

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::NotificationChannel;

/// Incoming-webhook channel
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": message }))
            .send()
            .await
            .context("Failed to send webhook notification")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Webhook returned {}: {}", status, body.trim());
        }

        Ok(())
    }
}
