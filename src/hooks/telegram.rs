//! Telegram Bot API notifier

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use super::Notifier;

const TELEGRAM_API: &str = "https://api.telegram.org";

pub struct TelegramNotifier {
    bot_token: String,
    admin_chat_ids: Vec<i64>,
    api_base: String,
    client: Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, admin_chat_ids: Vec<i64>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .wrap_err("Failed to build HTTP client")?;
        Ok(Self {
            bot_token,
            admin_chat_ids,
            api_base: TELEGRAM_API.to_string(),
            client,
        })
    }

    /// Point at a different Bot API server
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });

        // reqwest errors include the URL, which carries the token
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| eyre!("Failed to send Telegram message: {}", e.without_url()))?;

        let status = response.status();
        let result: Value = response
            .json()
            .await
            .map_err(|e| eyre!("Failed to parse Telegram response: {}", e.without_url()))?;

        if !status.is_success() || !result["ok"].as_bool().unwrap_or(false) {
            let description = result["description"].as_str().unwrap_or("Unknown error");
            return Err(eyre!("Telegram API error ({}): {}", status, description));
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify_user(&self, user_id: i64, text: &str) -> Result<()> {
        // private chat id equals the user id
        self.send_message(user_id, text)
            .await
            .wrap_err_with(|| format!("Failed to notify user {}", user_id))
    }

    async fn notify_admins(&self, text: &str) -> Result<()> {
        let mut failures = 0;
        for chat_id in &self.admin_chat_ids {
            if let Err(e) = self.send_message(*chat_id, text).await {
                warn!(chat_id, error = %e, "Failed to notify admin");
                failures += 1;
            }
        }
        if failures > 0 && failures == self.admin_chat_ids.len() {
            return Err(eyre!("Failed to notify any of {} admins", failures));
        }
        Ok(())
    }
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("bot_token", &"<redacted>")
            .field("admin_chat_ids", &self.admin_chat_ids)
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let notifier = TelegramNotifier::new("123:secret".into(), vec![1, 2]).unwrap();
        let debug = format!("{:?}", notifier);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_no_admins_is_ok() {
        let notifier = TelegramNotifier::new("123:secret".into(), vec![])
            .unwrap()
            .with_api_base("http://127.0.0.1:9");
        assert!(notifier.notify_admins("hello").await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_api_error_hides_token() {
        let notifier = TelegramNotifier::new("123:secret".into(), vec![])
            .unwrap()
            .with_api_base("http://127.0.0.1:9");
        let err = notifier.notify_user(7, "hi").await.unwrap_err();
        assert!(!format!("{:#}", err).contains("secret"));
    }
}
