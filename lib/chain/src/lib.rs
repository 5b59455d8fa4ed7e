//! Solana pubsub access for the chainflow platform.
//!
//! [`SolanaPubsubClient`] keeps one websocket to a Solana RPC node, issues
//! `accountSubscribe`/`logsSubscribe` requests and turns notifications into
//! [`ChainEvent`]s. [`ChainSubscriber`] is the seam the listener depends on.

pub mod client;
pub mod error;
pub mod reconnect;
pub mod rpc;
pub mod subscriber;
pub mod testing;

pub use client::{PubsubConfig, SolanaPubsubClient};
pub use error::ChainError;
pub use reconnect::ReconnectConfig;
pub use subscriber::{
    ChainEvent, ChainNotification, ChainSubscriber, SubscriptionHandle, SubscriptionRequest,
};
