//! Exchange client for order placement.
//!
//! Order actions on prediction markets go through an [`OrderClient`]. The
//! read-only lookups (`market`, `position`) feed the pre-trade safety checks;
//! `place_order` is the only side-effecting call.

use crate::error::ConnectorError;
use crate::http::{check_status, transport_error};
use async_trait::async_trait;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

/// Contract side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Yes,
    No,
}

impl OrderSide {
    /// Wire name of the side.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
        }
    }
}

/// A limit buy order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Market ticker.
    pub market_ticker: String,
    /// Side to buy.
    pub side: OrderSide,
    /// Number of contracts.
    pub count: u32,
    /// Limit price per contract in cents (1..=99).
    pub limit_price_cents: u32,
    /// Client order id, stable across redeliveries.
    pub client_order_id: String,
}

impl OrderRequest {
    /// Maximum cost of the order in cents.
    #[must_use]
    pub fn cost_cents(&self) -> u64 {
        u64::from(self.count) * u64::from(self.limit_price_cents)
    }
}

/// Market status as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketInfo {
    /// Market ticker.
    pub ticker: String,
    /// Exchange status string (`open`, `closed`, `settled`, ...).
    pub status: String,
}

impl MarketInfo {
    /// Returns true if the market accepts orders.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.status.as_str(), "open" | "active")
    }
}

/// Current holding in a market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Market ticker.
    pub ticker: String,
    /// Signed contract count (positive yes, negative no).
    pub position: i64,
    /// Current exposure in cents.
    pub market_exposure: i64,
}

/// Order acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReceipt {
    /// Exchange order id.
    pub order_id: String,
    /// Exchange order status.
    pub status: String,
}

/// Trait for exchange access.
#[async_trait]
pub trait OrderClient: Send + Sync {
    /// Looks up a market.
    async fn market(&self, ticker: &str) -> Result<MarketInfo, Report<ConnectorError>>;

    /// Looks up the current position in a market, if any.
    async fn position(&self, ticker: &str) -> Result<Option<Position>, Report<ConnectorError>>;

    /// Places an order.
    async fn place_order(&self, order: &OrderRequest)
    -> Result<OrderReceipt, Report<ConnectorError>>;
}

/// REST client for the exchange's trade API.
#[derive(Debug, Clone)]
pub struct HttpOrderClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct MarketEnvelope {
    market: MarketInfo,
}

#[derive(Deserialize)]
struct PositionsEnvelope {
    #[serde(default)]
    market_positions: Vec<Position>,
}

#[derive(Deserialize)]
struct OrderEnvelope {
    order: OrderReceipt,
}

impl HttpOrderClient {
    /// Creates an exchange client.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, ConnectorError> {
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ConnectorError::ProtocolError {
                reason: format!("invalid exchange response: {e}"),
            })
    }
}

#[async_trait]
impl OrderClient for HttpOrderClient {
    async fn market(&self, ticker: &str) -> Result<MarketInfo, Report<ConnectorError>> {
        let response = self
            .authorize(self.client.get(format!("{}/markets/{ticker}", self.base_url)))
            .send()
            .await
            .map_err(transport_error)?;
        let envelope: MarketEnvelope = Self::decode(response).await?;
        Ok(envelope.market)
    }

    async fn position(&self, ticker: &str) -> Result<Option<Position>, Report<ConnectorError>> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/portfolio/positions", self.base_url))
                    .query(&[("ticker", ticker)]),
            )
            .send()
            .await
            .map_err(transport_error)?;
        let envelope: PositionsEnvelope = Self::decode(response).await?;
        Ok(envelope
            .market_positions
            .into_iter()
            .find(|p| p.ticker == ticker))
    }

    #[instrument(skip(self, order), fields(ticker = %order.market_ticker, count = order.count))]
    async fn place_order(
        &self,
        order: &OrderRequest,
    ) -> Result<OrderReceipt, Report<ConnectorError>> {
        let price_field = match order.side {
            OrderSide::Yes => "yes_price",
            OrderSide::No => "no_price",
        };
        let mut body = json!({
            "ticker": order.market_ticker,
            "side": order.side.as_str(),
            "action": "buy",
            "type": "limit",
            "count": order.count,
            "client_order_id": order.client_order_id,
        });
        body[price_field] = json!(order.limit_price_cents);

        let response = self
            .authorize(
                self.client
                    .post(format!("{}/portfolio/orders", self.base_url))
                    .json(&body),
            )
            .send()
            .await
            .map_err(transport_error)?;
        let envelope: OrderEnvelope = Self::decode(response).await?;

        debug!(order_id = %envelope.order.order_id, "order placed");
        Ok(envelope.order)
    }
}
