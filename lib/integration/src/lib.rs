//! Integration layer for the chainflow platform.
//!
//! This crate provides the boundary to everything the workflow engine calls
//! out to:
//!
//! - **Notifier**: Discord, Telegram and generic webhook delivery
//! - **Transaction submitter**: on-chain transfers and program calls through
//!   an external signing relay (the platform never holds keys)
//! - **Order client**: market lookups and order placement on the exchange
//! - **Rate limiter**: fixed-window limiting for downstream APIs

pub mod error;
mod http;
pub mod notify;
pub mod orders;
pub mod rate_limit;
pub mod transaction;

pub use error::ConnectorError;
pub use notify::{HttpNotifier, Notification, NotificationTarget, Notifier};
pub use orders::{
    HttpOrderClient, MarketInfo, OrderClient, OrderReceipt, OrderRequest, OrderSide, Position,
};
pub use rate_limit::{RateLimitConfig, RateLimitResult, RateLimiter};
pub use transaction::{
    AccountMeta, HttpSigningRelay, TransactionReceipt, TransactionRequest, TransactionSubmitter,
};
