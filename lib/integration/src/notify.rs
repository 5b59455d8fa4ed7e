//! Notification delivery.
//!
//! Notify nodes hand a rendered message and a target to a [`Notifier`].
//! Delivery is best effort from the engine's point of view; the notifier
//! only reports whether the one request it made succeeded.

use crate::error::ConnectorError;
use crate::http::{check_status, transport_error};
use async_trait::async_trait;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, instrument};

/// Discord rejects message content longer than this.
const DISCORD_MAX_CONTENT: usize = 2000;

/// Default Telegram Bot API base URL.
const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Where a notification goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "notify_type", rename_all = "snake_case")]
pub enum NotificationTarget {
    /// Discord channel webhook.
    Discord {
        /// Full webhook URL.
        webhook_url: String,
    },
    /// Telegram chat, delivered through the platform bot.
    Telegram {
        /// Chat id (numeric id or `@channel` name).
        chat_id: String,
    },
    /// Arbitrary HTTP endpoint receiving a JSON body.
    Webhook {
        /// Endpoint URL.
        url: String,
    },
}

impl NotificationTarget {
    /// Returns the channel name used in logs and error messages.
    #[must_use]
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Discord { .. } => "discord",
            Self::Telegram { .. } => "telegram",
            Self::Webhook { .. } => "webhook",
        }
    }
}

/// A rendered notification ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Destination.
    pub target: NotificationTarget,
    /// Rendered message text.
    pub message: String,
    /// Structured context forwarded to webhook targets.
    pub context: JsonValue,
}

/// Trait for notification delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one notification.
    async fn send(&self, notification: &Notification) -> Result<(), Report<ConnectorError>>;
}

/// reqwest-backed notifier for every supported channel.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    telegram_bot_token: Option<String>,
    telegram_api_base: String,
}

impl HttpNotifier {
    /// Creates a notifier. Telegram delivery requires a bot token.
    #[must_use]
    pub fn new(client: reqwest::Client, telegram_bot_token: Option<String>) -> Self {
        Self {
            client,
            telegram_bot_token,
            telegram_api_base: TELEGRAM_API_BASE.to_string(),
        }
    }

    /// Overrides the Telegram API base URL.
    #[must_use]
    pub fn with_telegram_api_base(mut self, base: impl Into<String>) -> Self {
        self.telegram_api_base = base.into();
        self
    }

    async fn post_json(&self, url: &str, body: &JsonValue) -> Result<(), ConnectorError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[instrument(skip(self, notification), fields(channel = notification.target.channel()))]
    async fn send(&self, notification: &Notification) -> Result<(), Report<ConnectorError>> {
        match &notification.target {
            NotificationTarget::Discord { webhook_url } => {
                let content = truncate_chars(&notification.message, DISCORD_MAX_CONTENT);
                self.post_json(webhook_url, &json!({ "content": content }))
                    .await?;
            }
            NotificationTarget::Telegram { chat_id } => {
                let token =
                    self.telegram_bot_token
                        .as_deref()
                        .ok_or_else(|| ConnectorError::NotConfigured {
                            service: "telegram bot".to_string(),
                        })?;
                let url = format!("{}/bot{token}/sendMessage", self.telegram_api_base);
                self.post_json(
                    &url,
                    &json!({ "chat_id": chat_id, "text": notification.message }),
                )
                .await?;
            }
            NotificationTarget::Webhook { url } => {
                self.post_json(
                    url,
                    &json!({
                        "message": notification.message,
                        "context": notification.context,
                    }),
                )
                .await?;
            }
        }

        debug!("notification delivered");
        Ok(())
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_deserializes_from_tagged_object() {
        let target: NotificationTarget = serde_json::from_value(json!({
            "notify_type": "discord",
            "webhook_url": "https://discord.com/api/webhooks/1/abc"
        }))
        .expect("deserialize");

        assert_eq!(target.channel(), "discord");
    }

    #[test]
    fn target_ignores_unrelated_fields() {
        let target: NotificationTarget = serde_json::from_value(json!({
            "notify_type": "telegram",
            "chat_id": "@alerts",
            "template": "ignored here"
        }))
        .expect("deserialize");

        assert_eq!(
            target,
            NotificationTarget::Telegram {
                chat_id: "@alerts".to_string()
            }
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "ééééé";
        assert_eq!(truncate_chars(text, 2), "éé");
        assert_eq!(truncate_chars(text, 10), text);
    }

    #[tokio::test]
    async fn telegram_without_token_is_not_configured() {
        let notifier = HttpNotifier::new(reqwest::Client::new(), None);
        let notification = Notification {
            target: NotificationTarget::Telegram {
                chat_id: "42".to_string(),
            },
            message: "hello".to_string(),
            context: JsonValue::Null,
        };

        let err = notifier.send(&notification).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConnectorError::NotConfigured { .. }
        ));
    }
}
