//! Job queue for the chainflow platform.
//!
//! - **Jobs**: [`TriggerJob`] payloads on a durable at-least-once queue,
//!   deduplicated by execution id
//! - **Registry**: [`RepeatableJob`] entries describing cron registrations
//! - **Cache**: [`DedupCache`] markers for already processed executions
//!
//! [`nats`] holds the JetStream implementations, [`testing`] in-memory ones.

pub mod cache;
pub mod envelope;
pub mod error;
pub mod job;
pub mod nats;
pub mod registry;
pub mod testing;

pub use cache::{DedupCache, DedupMarker};
pub use envelope::{CURRENT_VERSION, Envelope, RawEnvelope};
pub use error::QueueError;
pub use job::{EnqueueOptions, EnqueueOutcome, JobQueue, JobSource, TriggerJob};
pub use nats::{
    ConsumerSettings, Delivery, JobConsumer, NatsConfig, NatsDedupCache, NatsJobQueue,
    NatsRepeatableJobStore, connect,
};
pub use registry::{RepeatableJob, RepeatableJobStore};
