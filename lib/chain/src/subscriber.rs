//! Subscription types and the subscriber trait.

use crate::error::ChainError;
use async_trait::async_trait;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::fmt;

/// Locally assigned subscription handle.
///
/// Handles are never reused and stay stable for the life of the client.
/// After a reconnect every previous handle is dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionHandle(pub u64);

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptionRequest {
    /// Changes to one account's lamports or data.
    Account { address: String },
    /// Transactions whose logs mention an address.
    Logs { mentions: String },
}

impl SubscriptionRequest {
    #[must_use]
    pub fn subscribe_method(&self) -> &'static str {
        match self {
            Self::Account { .. } => "accountSubscribe",
            Self::Logs { .. } => "logsSubscribe",
        }
    }

    #[must_use]
    pub fn unsubscribe_method(&self) -> &'static str {
        match self {
            Self::Account { .. } => "accountUnsubscribe",
            Self::Logs { .. } => "logsUnsubscribe",
        }
    }

    /// JSON-RPC params at `commitment`.
    #[must_use]
    pub fn params(&self, commitment: &str) -> JsonValue {
        match self {
            Self::Account { address } => json!([
                address,
                { "encoding": "jsonParsed", "commitment": commitment }
            ]),
            Self::Logs { mentions } => json!([
                { "mentions": [mentions] },
                { "commitment": commitment }
            ]),
        }
    }
}

/// A notification delivered for a live subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainNotification {
    pub handle: SubscriptionHandle,
    pub slot: u64,
    /// The notification's `value`: account info or `{signature, err, logs}`.
    pub payload: JsonValue,
}

/// Everything the connection reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    Notification(ChainNotification),
    /// The connection was re-established; all earlier handles are dead.
    Reconnected,
}

/// Opens and closes blockchain subscriptions.
#[async_trait]
pub trait ChainSubscriber: Send + Sync {
    /// Opens a subscription. Notifications arrive tagged with the handle.
    async fn subscribe(
        &self,
        request: SubscriptionRequest,
    ) -> Result<SubscriptionHandle, Report<ChainError>>;

    /// Closes a subscription. Unknown handles are ignored.
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), Report<ChainError>>;
}
