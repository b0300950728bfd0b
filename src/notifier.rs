use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::warn;

#[async_trait]
pub trait Notify: Send + Sync {
    async fn alert(&self, text: &str) -> Result<()>;
}

/// Spawns the alert and forgets it; failures are logged only.
pub fn fire_and_forget(notifier: &Arc<dyn Notify>, text: String) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(err) = notifier.alert(&text).await {
            warn!(error = %err, "notifier.alert.failed");
        }
    });
}

#[derive(Clone)]
pub struct Notifier {
    slack_webhook_url: Option<String>,
    telegram: Option<(String, String)>,
    http: Client,
}

#[derive(Serialize)]
struct SlackPayload<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct TelegramPayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

impl Notifier {
    pub fn new(
        slack_webhook_url: Option<String>,
        telegram_bot_token: Option<String>,
        telegram_chat_id: Option<String>,
    ) -> Self {
        let telegram = telegram_bot_token.zip(telegram_chat_id);
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { slack_webhook_url, telegram, http }
    }

    pub fn is_configured(&self) -> bool {
        self.slack_webhook_url.is_some() || self.telegram.is_some()
    }

    async fn slack(&self, url: &str, text: &str) -> Result<()> {
        let resp = self.http.post(url).json(&SlackPayload { text }).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("slack webhook failed: {}", resp.status()));
        }
        Ok(())
    }

    async fn telegram(&self, token: &str, chat_id: &str, text: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let resp = self
            .http
            .post(url)
            .json(&TelegramPayload { chat_id, text, parse_mode: "Markdown" })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("telegram sendMessage failed: {}", resp.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl Notify for Notifier {
    async fn alert(&self, text: &str) -> Result<()> {
        let mut errors = Vec::new();

        // In dev/test we allow missing alert config.
        if let Some(url) = self.slack_webhook_url.as_deref() {
            if let Err(e) = self.slack(url, text).await {
                errors.push(e.to_string());
            }
        }
        if let Some((token, chat)) = &self.telegram {
            if let Err(e) = self.telegram(token, chat, text).await {
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(errors.join("; ")))
        }
    }
}
