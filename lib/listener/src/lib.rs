//! Chain event listener for the chainflow platform.
//!
//! [`SubscriptionManager`] keeps one chain subscription per enabled
//! chain-event trigger, matches incoming notifications against the trigger's
//! configuration, and enqueues a deduplicated [`chainflow_queue::TriggerJob`]
//! for every match.

pub mod error;
pub mod event;
pub mod manager;
pub mod source;

pub use error::ListenerError;
pub use event::{Matched, TriggerMatcher, execution_id, request_for};
pub use manager::{
    DEFAULT_RESYNC_INTERVAL, ListenerStats, NotificationOutcome, ResyncSummary, SubscribeSummary,
    SubscriptionManager,
};
pub use source::WorkflowSource;
